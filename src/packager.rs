//! Converts a build target into an Index+Manifest pair (§4.4).
//!
//! Grounded on the teacher's `image/cache_manager.rs` (collect-then-persist
//! shape already reused by [`crate::builders::index::IndexDraft`]) plus
//! §4.4's own procedure, which this module follows step for step.

use crate::builders::index::IndexDraft;
use crate::builders::layer::Layer;
use crate::builders::manifest::{ManifestConfig, ManifestDraft};
use crate::concurrency::Budget;
use crate::digest::Digest;
use crate::error::{OciPkgError, Result};
use crate::oci::{layer_paths, ImageIndex};
use crate::platform::platform_checksum;
use crate::reference::Reference;
use crate::store::handler::Handler;
use std::path::PathBuf;

/// Host-build kconfig variables never meaningful inside the packaged image
/// (§4.4 step 6: "excluding a fixed skip-set that contains host-build
/// variables").
const KCONFIG_SKIP_SET: &[&str] = &[
    "CONFIG_UK_NAME",
    "CONFIG_UK_FULLVERSION",
    "CONFIG_UK_BASE",
    "CONFIG_UK_DEFCONFIG",
    "CONFIG_KRAFTKIT",
];

/// A build target: the inputs the Unikraft build system hands to the
/// packager. File paths are read as-is; their production is out of scope.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub kernel_path: PathBuf,
    pub kernel_dbg_path: Option<PathBuf>,
    pub initrd_path: Option<PathBuf>,
    pub kconfig: Vec<String>,
    pub architecture: String,
    pub platform: String,
    pub command: Option<Vec<String>>,
}

/// How an existing index at the target reference is reconciled against the
/// freshly-built manifest (§4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Fail with `ConflictExists` on a platform collision.
    Exit,
    /// Delete the colliding manifest, then append the new one.
    Merge,
    /// Always start a fresh index, deleting any pre-existing one (and its
    /// dependencies) first.
    Overwrite,
}

#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub merge_strategy: MergeStrategy,
    pub pack_kconfig: bool,
    pub pack_kernel_dbg: bool,
    pub kernel_version: Option<String>,
    /// Pins the manifest `created` annotation (§4.2/Manifest/Save step 3)
    /// instead of letting it default to the wall clock, so repeated
    /// packaging of identical inputs yields a byte-identical digest (§8
    /// Testable Property 1). `None` keeps the normal wall-clock behaviour.
    pub created: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            merge_strategy: MergeStrategy::Merge,
            pack_kconfig: true,
            pack_kernel_dbg: false,
            kernel_version: None,
            created: None,
        }
    }
}

pub struct Packager<'a> {
    handler: &'a dyn Handler,
    budget: Budget,
    default_registry: String,
}

impl<'a> Packager<'a> {
    pub fn new(handler: &'a dyn Handler, budget: Budget, default_registry: impl Into<String>) -> Self {
        Self {
            handler,
            budget,
            default_registry: default_registry.into(),
        }
    }

    /// Runs §4.4 steps 1-9 and returns the saved index digest.
    pub async fn package(
        &self,
        target: &Target,
        reference_name: &str,
        options: &PackageOptions,
    ) -> Result<(Digest, ImageIndex)> {
        // 1. Parse the reference; apply default registry and tag.
        let reference = Reference::parse(reference_name, None, &self.default_registry)?;

        // 2-4. Kernel, optional debug kernel, optional initrd layers.
        let mut config = ManifestConfig {
            architecture: target.architecture.clone(),
            os: target.platform.clone(),
            os_version: options.kernel_version.clone(),
            cmd: target.command.clone(),
            ..Default::default()
        };

        // 6. kconfig -> os.features, skipping host-build variables.
        if options.pack_kconfig {
            for entry in &target.kconfig {
                let name = entry.split('=').next().unwrap_or(entry);
                if KCONFIG_SKIP_SET.contains(&name) {
                    continue;
                }
                config.os_features.push(entry.clone());
            }
        }

        let mut draft = ManifestDraft::new(config.clone());
        draft.add_layer(Layer::from_file(&target.kernel_path, layer_paths::KERNEL, true)?);
        if options.pack_kernel_dbg {
            if let Some(dbg_path) = &target.kernel_dbg_path {
                draft.add_layer(Layer::from_file(dbg_path, layer_paths::KERNEL_DBG, true)?);
            }
        }
        if let Some(initrd_path) = &target.initrd_path {
            draft.add_layer(Layer::from_file(initrd_path, layer_paths::INITRD, false)?);
        }
        if let Some(kv) = &options.kernel_version {
            draft.set_kernel_version(kv.clone());
        }
        if let Some(created) = options.created {
            draft.set_created(created);
        }

        // 7-8. Resolve any pre-existing index and reconcile per merge
        // strategy, keyed by the new manifest's platform-checksum.
        let new_platform = crate::platform::canonical_platform_for(&config);
        let new_checksum = platform_checksum(&reference.storage_key(), &new_platform);

        let existing_index = self.handler.resolve_index(&reference).await.ok();

        let mut index_draft = IndexDraft::new();
        match (existing_index, options.merge_strategy) {
            (None, _) => {
                // absent: create.
            }
            (Some(index), MergeStrategy::Overwrite) => {
                // Overwrite always starts fresh, deleting the old index and
                // its dependencies first.
                self.handler.delete_index(&reference, true).await?;
                let _ = index;
            }
            (Some(index), strategy) => {
                let mut collision = false;
                for desc in index.manifests() {
                    let Some(platform) = desc.platform() else {
                        index_draft.carry_over(desc.clone());
                        continue;
                    };
                    let checksum = platform_checksum(&reference.storage_key(), platform);
                    if checksum == new_checksum {
                        collision = true;
                        match strategy {
                            MergeStrategy::Exit => {
                                return Err(OciPkgError::ConflictExists(format!(
                                    "manifest for platform already exists at {}",
                                    reference.storage_key()
                                )));
                            }
                            MergeStrategy::Merge => {
                                // Delete the colliding manifest; do not
                                // carry its descriptor forward.
                                if let Ok(d) = Digest::parse(desc.digest()) {
                                    self.handler.delete_manifest(&reference, &d).await.ok();
                                }
                            }
                            MergeStrategy::Overwrite => unreachable!(),
                        }
                    } else {
                        index_draft.carry_over(desc.clone());
                    }
                }
                let _ = collision;
            }
        }

        // 9. Add the new manifest and save the index.
        index_draft.add_manifest(draft);
        index_draft.save(self.handler, &reference, &self.budget).await
    }
}

/// Convenience entry point mirroring §4.4's single-call procedure.
pub async fn package(
    handler: &dyn Handler,
    budget: Budget,
    default_registry: &str,
    target: &Target,
    reference_name: &str,
    options: &PackageOptions,
) -> Result<(Digest, ImageIndex)> {
    Packager::new(handler, budget, default_registry)
        .package(target, reference_name, options)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsStore;
    use crate::transport::Transport;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn store(root: &Path) -> FsStore {
        let transport = Arc::new(Transport::new(crate::config::HostConfig::default()));
        FsStore::new(root, transport)
    }

    fn write_kernel(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("kernel");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn target(dir: &Path, bytes: &[u8], features: Vec<String>) -> Target {
        Target {
            kernel_path: write_kernel(dir, bytes),
            kernel_dbg_path: None,
            initrd_path: None,
            kconfig: features,
            architecture: "x86_64".to_string(),
            platform: "linux".to_string(),
            command: None,
        }
    }

    #[tokio::test]
    async fn s1_single_platform_package() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        let t = target(dir.path(), &[0x7fu8, 0x45, 0x4c, 0x46], vec!["CONFIG_APP=1".into()]);
        let (_, index) = package(
            &store,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t,
            "registry.local/hello:v1",
            &PackageOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(index.manifests().len(), 1);
        let manifest_digest = Digest::parse(index.manifests()[0].digest()).unwrap();
        let manifest = store.resolve_manifest(&manifest_digest).await.unwrap();
        assert_eq!(manifest.config().digest(), manifest.config().digest());
    }

    #[tokio::test]
    async fn s2_merge_replaces_same_platform_without_duplicating() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        let t = target(dir.path(), b"kernel-bytes", vec!["CONFIG_APP=1".into()]);
        let (_, index1) = package(
            &store,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t,
            "registry.local/hello:v1",
            &PackageOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(index1.manifests().len(), 1);
        let m1 = store
            .resolve_manifest(&Digest::parse(index1.manifests()[0].digest()).unwrap())
            .await
            .unwrap();
        let m1_config_digest = m1.config().digest().clone();
        let m1_layers = m1.layers().clone();

        let (_, index2) = package(
            &store,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t,
            "registry.local/hello:v1",
            &PackageOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(index2.manifests().len(), 1);
        let m2 = store
            .resolve_manifest(&Digest::parse(index2.manifests()[0].digest()).unwrap())
            .await
            .unwrap();
        assert_eq!(&m1_config_digest, m2.config().digest());
        assert_eq!(&m1_layers, m2.layers());
    }

    /// §8 Testable Property 1: two independent packaging runs over
    /// identical inputs yield byte-identical index and manifest digests,
    /// given a pinned `created` instant.
    #[tokio::test]
    async fn property1_deterministic_digests_given_identical_created() {
        let dir = tempdir().unwrap();
        let store1 = store(&dir.path().join("run1")).await;
        let store2 = store(&dir.path().join("run2")).await;
        let t = target(dir.path(), b"deterministic-kernel-bytes", vec!["CONFIG_APP=1".into()]);
        let created = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let options = PackageOptions {
            created: Some(created),
            ..Default::default()
        };

        let (digest1, index1) = package(
            &store1,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t,
            "registry.local/hello:v1",
            &options,
        )
        .await
        .unwrap();
        let (digest2, index2) = package(
            &store2,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t,
            "registry.local/hello:v1",
            &options,
        )
        .await
        .unwrap();

        assert_eq!(digest1, digest2, "index digest must be reproducible given identical inputs");
        assert_eq!(index1.manifests()[0].digest(), index2.manifests()[0].digest());
    }

    #[tokio::test]
    async fn s3_colliding_platform_replaces_manifest() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        let t1 = target(dir.path(), b"kernel-v1", vec!["CONFIG_APP=1".into()]);
        package(
            &store,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t1,
            "registry.local/hello:v1",
            &PackageOptions::default(),
        )
        .await
        .unwrap();

        let t2 = target(dir.path(), b"kernel-v2-different", vec!["CONFIG_APP=1".into()]);
        let (_, index) = package(
            &store,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t2,
            "registry.local/hello:v1",
            &PackageOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(index.manifests().len(), 1);
    }

    #[tokio::test]
    async fn s4_distinct_platforms_both_kept() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        let mut t1 = target(dir.path(), b"amd64-kernel", vec![]);
        t1.architecture = "x86_64".to_string();
        package(
            &store,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t1,
            "registry.local/hello:v1",
            &PackageOptions::default(),
        )
        .await
        .unwrap();

        let mut t2 = target(dir.path(), b"arm64-kernel", vec![]);
        t2.architecture = "arm64".to_string();
        let (_, index) = package(
            &store,
            Budget::default_for_host(),
            crate::reference::DEFAULT_REGISTRY,
            &t2,
            "registry.local/hello:v1",
            &PackageOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(index.manifests().len(), 2);
    }

    #[tokio::test]
    async fn exit_strategy_fails_on_collision() {
        let dir = tempdir().unwrap();
        let store = store(dir.path()).await;
        let t = target(dir.path(), b"kernel-bytes", vec![]);
        let opts = PackageOptions {
            merge_strategy: MergeStrategy::Exit,
            ..Default::default()
        };
        package(&store, Budget::default_for_host(), crate::reference::DEFAULT_REGISTRY, &t, "registry.local/hello:v1", &opts)
            .await
            .unwrap();
        let t2 = target(dir.path(), b"different-kernel", vec![]);
        let err = package(&store, Budget::default_for_host(), crate::reference::DEFAULT_REGISTRY, &t2, "registry.local/hello:v1", &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, OciPkgError::ConflictExists(_)));
    }
}
