//! Containerd-style content store (§9): `<root>/blobs/<alg>/<hex>` blobs,
//! `<root>/labels/<alg>/<hex>.json` gc-root labels, `<root>/tags/<reg>/
//! <repo>/<tag>` tag symlinks.
//!
//! Structurally identical to [`super::fs::FsStore`] (same teacher grounding:
//! `image/cache.rs`) except for its directory layout and its root-label
//! mechanism, which protects a freshly-saved manifest from a concurrent GC
//! sweep until its dependencies are also saved (§4.2 step 5, §9 open
//! question on containerd rollback — resolved in SPEC_FULL.md §9 as
//! "leave a dangling manifest, recover via `gc()`", not a rollback).

use super::blob_io;
use super::handler::{DigestInfo, Handler, PlatformSelector, ProgressFn, UnpackedImage};
use crate::concurrency::Budget;
use crate::digest::Digest;
use crate::error::{OciPkgError, Result};
use crate::oci::{self, Descriptor, ImageIndex, ImageManifest};
use crate::reference::{Reference, Version};
use crate::transport::Transport;
use async_trait::async_trait;
use oci_spec::image::MediaType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct RootLabel {
    root: bool,
}

pub struct ContainerdStore {
    root: PathBuf,
    namespace: String,
    transport: Arc<Transport>,
}

impl ContainerdStore {
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>, transport: Arc<Transport>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
            transport,
        }
    }

    /// Namespace-scoped root (§6: `$CONTAINERD_NAMESPACE` isolates storage).
    fn namespace_root(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    fn blobs_dir(&self) -> PathBuf {
        self.namespace_root().join("blobs")
    }

    fn labels_dir(&self) -> PathBuf {
        self.namespace_root().join("labels")
    }

    fn label_path(&self, digest: &Digest) -> PathBuf {
        self.labels_dir()
            .join(digest.algorithm())
            .join(format!("{}.json", digest.hex()))
    }

    fn tag_path(&self, reference: &Reference) -> Result<PathBuf> {
        let tag = reference.tag().ok_or_else(|| {
            OciPkgError::Validation("tag mapping requires a reference with a tag".into())
        })?;
        Ok(self
            .namespace_root()
            .join("tags")
            .join(&reference.registry)
            .join(&reference.repository)
            .join(tag))
    }

    async fn mark_root(&self, digest: &Digest) -> Result<()> {
        let path = self.label_path(digest);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| OciPkgError::io_at(dir, e))?;
        }
        let bytes = serde_json::to_vec(&RootLabel { root: true })?;
        tokio::fs::write(&path, bytes).await.map_err(|e| OciPkgError::io_at(path, e))
    }

    async fn unmark_root(&self, digest: &Digest) -> Result<()> {
        let path = self.label_path(digest);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OciPkgError::io_at(path, e)),
        }
    }

    async fn read_manifest(&self, digest: &Digest) -> Result<ImageManifest> {
        let bytes = blob_io::read_blob(&self.blobs_dir(), digest).await?;
        serde_json::from_slice(&bytes).map_err(|e| OciPkgError::Corrupt(e.to_string()))
    }

    async fn read_index(&self, digest: &Digest) -> Result<ImageIndex> {
        let bytes = blob_io::read_blob(&self.blobs_dir(), digest).await?;
        serde_json::from_slice(&bytes).map_err(|e| OciPkgError::Corrupt(e.to_string()))
    }

    async fn tag_digest(&self, reference: &Reference) -> Result<Digest> {
        let tag_path = self.tag_path(reference)?;
        let target = blob_io::resolve_tag(&tag_path)
            .await?
            .ok_or_else(|| OciPkgError::NotFound(reference.storage_key()))?;
        let hex = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OciPkgError::Corrupt(format!("malformed tag target: {target:?}")))?;
        Digest::parse(&format!("sha256:{hex}"))
    }

    async fn purge_manifest_blobs(&self, manifest: &ImageManifest, manifest_digest: &Digest) -> Result<()> {
        self.unmark_root(manifest_digest).await?;
        blob_io::remove_blob(&self.blobs_dir(), manifest_digest).await?;
        let config_digest = Digest::parse(manifest.config().digest())?;
        blob_io::remove_blob(&self.blobs_dir(), &config_digest).await?;
        for layer in manifest.layers() {
            let layer_digest = Digest::parse(layer.digest())?;
            blob_io::remove_blob(&self.blobs_dir(), &layer_digest).await?;
        }
        Ok(())
    }

    /// Reachability sweep: drop any blob under this namespace with no
    /// surviving root label and no referencing manifest. Recovers a
    /// dangling manifest left behind by a failed `save_descriptor` for one
    /// of its layers (§9).
    pub async fn gc(&self) -> Result<Vec<Digest>> {
        let mut reachable = std::collections::HashSet::new();
        for index_ref in self.list_indexes().await? {
            if let Ok(index) = self.resolve_index(&index_ref).await {
                for m in index.manifests() {
                    if let Ok(d) = Digest::parse(m.digest()) {
                        reachable.insert(d.clone());
                        if let Ok(manifest) = self.read_manifest(&d).await {
                            if let Ok(cd) = Digest::parse(manifest.config().digest()) {
                                reachable.insert(cd);
                            }
                            for layer in manifest.layers() {
                                if let Ok(ld) = Digest::parse(layer.digest()) {
                                    reachable.insert(ld);
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut collected = Vec::new();
        let sha_dir = self.blobs_dir().join("sha256");
        let mut entries = match tokio::fs::read_dir(&sha_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(collected),
            Err(e) => return Err(OciPkgError::io_at(&sha_dir, e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| OciPkgError::io_at(&sha_dir, e))? {
            let Ok(digest) = Digest::parse(&format!("sha256:{}", entry.file_name().to_string_lossy())) else {
                continue;
            };
            if reachable.contains(&digest) {
                continue;
            }
            if self.label_path(&digest).is_file() {
                continue; // transient root label still protects it
            }
            blob_io::remove_blob(&self.blobs_dir(), &digest).await?;
            collected.push(digest);
        }
        Ok(collected)
    }

    async fn extract_layer(&self, descriptor: &Descriptor, dest: &Path) -> Result<()> {
        let digest = Digest::parse(descriptor.digest())?;
        let bytes = blob_io::read_blob(&self.blobs_dir(), &digest).await?;
        let media_type = descriptor.media_type().clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || super::fs::extract_tar_entry(&bytes, &media_type, &dest))
            .await
            .map_err(|e| OciPkgError::Validation(format!("extraction task panicked: {e}")))??;
        Ok(())
    }
}

#[async_trait]
impl Handler for ContainerdStore {
    async fn digest_info(&self, digest: &Digest) -> Result<DigestInfo> {
        let path = blob_io::blob_path(&self.blobs_dir(), digest);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| OciPkgError::NotFound(digest.to_string()))?;
        Ok(DigestInfo {
            size: meta.len(),
            updated_at: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        })
    }

    async fn save_descriptor(
        &self,
        reference: &Reference,
        media_type: &MediaType,
        digest: &Digest,
        data: &[u8],
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<()> {
        digest.verify(data)?;
        if matches!(media_type, MediaType::ImageManifest) {
            // Transient root label: protects the manifest until its
            // dependencies are also saved (§4.2 step 5).
            self.mark_root(digest).await?;
        }
        blob_io::save_blob(&self.blobs_dir(), digest, data).await?;
        if let Some(progress) = on_progress {
            progress(data.len() as u64, data.len() as u64);
        }
        if matches!(media_type, MediaType::ImageIndex) && reference.tag().is_some() {
            let tag_path = self.tag_path(reference)?;
            let target = blob_io::blob_path(&self.blobs_dir(), digest);
            blob_io::repoint_tag(&tag_path, &target).await?;
        }
        Ok(())
    }

    async fn pull_digest(
        &self,
        reference: &Reference,
        digest: &Digest,
        selector: &PlatformSelector,
        on_progress: Option<&ProgressFn<'_>>,
        budget: &Budget,
    ) -> Result<()> {
        let (bytes, content_type) = self.transport.get_manifest(reference, digest.as_str()).await?;
        digest.verify(&bytes)?;
        let media_type = MediaType::from(content_type.as_str());

        match &media_type {
            MediaType::ImageIndex => {
                self.save_descriptor(reference, &media_type, digest, &bytes, on_progress)
                    .await?;
                let index: ImageIndex =
                    serde_json::from_slice(&bytes).map_err(|e| OciPkgError::Corrupt(e.to_string()))?;

                let requested = digest.clone();
                let candidates = index
                    .manifests()
                    .iter()
                    .filter(|desc| desc.platform().as_ref().map(|p| selector.matches(p)).unwrap_or(true))
                    .map(|desc| Ok::<_, OciPkgError>((Digest::parse(desc.digest())?, desc.platform())))
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                // Fan out the per-manifest pulls concurrently, gated by
                // `budget` (§5, §4.1.1 step 1); dropping the join on the
                // first error cancels the siblings still in flight.
                let fetches = candidates.iter().map(|(manifest_digest, _)| {
                    let manifest_digest = manifest_digest.clone();
                    async move {
                        budget
                            .run(Box::pin(self.pull_digest(
                                reference,
                                &manifest_digest,
                                selector,
                                on_progress,
                                budget,
                            )))
                            .await
                            .unwrap_or(Err(OciPkgError::Cancelled))
                    }
                });
                futures::future::try_join_all(fetches).await?;

                let pulled_checksums: Vec<Digest> = candidates
                    .iter()
                    .filter(|(manifest_digest, _)| *manifest_digest != requested)
                    .filter_map(|(_, platform)| {
                        platform
                            .as_ref()
                            .map(|p| crate::platform::platform_checksum(&reference.storage_key(), p))
                    })
                    .collect();

                // Merge with any locally-present index at the same tag
                // (§4.1.1): a local manifest whose platform-checksum matches
                // a freshly-pulled one is dropped in favour of remote.
                if reference.tag().is_some() {
                    if let Ok(local_digest) = self.tag_digest(reference).await {
                        if local_digest != *digest {
                            if let Ok(local_index) = self.read_index(&local_digest).await {
                                for m in local_index.manifests() {
                                    let Some(platform) = m.platform() else { continue };
                                    let checksum = crate::platform::platform_checksum(
                                        &reference.storage_key(),
                                        platform,
                                    );
                                    if pulled_checksums.contains(&checksum) {
                                        if let Ok(d) = Digest::parse(m.digest()) {
                                            let _ = self.delete_manifest(reference, &d).await;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(())
            }
            MediaType::ImageManifest => {
                if !blob_io::has_blob(&self.blobs_dir(), digest) {
                    self.save_descriptor(reference, &media_type, digest, &bytes, on_progress)
                        .await?;
                }
                let manifest: ImageManifest =
                    serde_json::from_slice(&bytes).map_err(|e| OciPkgError::Corrupt(e.to_string()))?;
                let config_digest = Digest::parse(manifest.config().digest())?;
                if !blob_io::has_blob(&self.blobs_dir(), &config_digest) {
                    let config_bytes = self.transport.get_blob(reference, &config_digest).await?;
                    self.save_descriptor(reference, manifest.config().media_type(), &config_digest, &config_bytes, on_progress)
                        .await?;
                }
                for layer in manifest.layers() {
                    let layer_digest = Digest::parse(layer.digest())?;
                    if !blob_io::has_blob(&self.blobs_dir(), &layer_digest) {
                        let layer_bytes = self.transport.get_blob(reference, &layer_digest).await?;
                        self.save_descriptor(reference, layer.media_type(), &layer_digest, &layer_bytes, None)
                            .await?;
                    }
                }
                self.unmark_root(digest).await?;
                Ok(())
            }
            other => Err(OciPkgError::ManifestUnsupported(format!("{other}"))),
        }
    }

    async fn resolve_manifest(&self, digest: &Digest) -> Result<ImageManifest> {
        self.read_manifest(digest).await
    }

    async fn resolve_index(&self, reference: &Reference) -> Result<ImageIndex> {
        let digest = match &reference.version {
            Version::Digest(d) => d.clone(),
            Version::Tag(_) => self.tag_digest(reference).await?,
        };
        self.read_index(&digest).await
    }

    async fn list_manifests(&self) -> Result<Vec<Digest>> {
        let mut out = Vec::new();
        let sha_dir = self.blobs_dir().join("sha256");
        let mut entries = match tokio::fs::read_dir(&sha_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(OciPkgError::io_at(&sha_dir, e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| OciPkgError::io_at(&sha_dir, e))? {
            let Ok(digest) = Digest::parse(&format!("sha256:{}", entry.file_name().to_string_lossy())) else {
                continue;
            };
            if let Ok(bytes) = tokio::fs::read(entry.path()).await {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                    if value.get("mediaType").and_then(|v| v.as_str())
                        == Some(&String::from(oci::media_type_manifest()))
                    {
                        out.push(digest);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn list_indexes(&self) -> Result<Vec<Reference>> {
        let mut out = Vec::new();
        let tags_dir = self.namespace_root().join("tags");
        let mut registries = match tokio::fs::read_dir(&tags_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(OciPkgError::io_at(&tags_dir, e)),
        };
        while let Some(registry_entry) = registries.next_entry().await.map_err(|e| OciPkgError::io_at(&tags_dir, e))? {
            let registry = registry_entry.file_name().to_string_lossy().into_owned();
            let mut repos = tokio::fs::read_dir(registry_entry.path())
                .await
                .map_err(|e| OciPkgError::io_at(registry_entry.path(), e))?;
            while let Some(repo_entry) = repos.next_entry().await.map_err(|e| OciPkgError::io_at(registry_entry.path(), e))? {
                let repository = repo_entry.file_name().to_string_lossy().into_owned();
                let mut tags = tokio::fs::read_dir(repo_entry.path())
                    .await
                    .map_err(|e| OciPkgError::io_at(repo_entry.path(), e))?;
                while let Some(tag_entry) = tags.next_entry().await.map_err(|e| OciPkgError::io_at(repo_entry.path(), e))? {
                    let tag = tag_entry.file_name().to_string_lossy().into_owned();
                    out.push(Reference {
                        registry: registry.clone(),
                        repository: repository.clone(),
                        version: Version::Tag(tag),
                    });
                }
            }
        }
        Ok(out)
    }

    async fn delete_manifest(&self, reference: &Reference, digest: &Digest) -> Result<()> {
        let manifest = self.read_manifest(digest).await?;
        let mut index = self.resolve_index(reference).await?;
        let remaining: Vec<Descriptor> = index
            .manifests()
            .iter()
            .filter(|d| Digest::parse(d.digest()).map(|x| x != *digest).unwrap_or(true))
            .cloned()
            .collect();

        self.purge_manifest_blobs(&manifest, digest).await?;

        if remaining.is_empty() {
            self.delete_index(reference, false).await?;
        } else {
            index.set_manifests(remaining);
            let new_digest = Digest::of_json(&index)?;
            let bytes = serde_json::to_vec(&serde_json::to_value(&index)?)?;
            self.save_descriptor(reference, &oci::media_type_index(), &new_digest, &bytes, None)
                .await?;
        }
        Ok(())
    }

    async fn delete_index(&self, reference: &Reference, deps: bool) -> Result<()> {
        if deps {
            if let Ok(index) = self.resolve_index(reference).await {
                for m in index.manifests() {
                    if let Ok(d) = Digest::parse(m.digest()) {
                        if let Ok(manifest) = self.read_manifest(&d).await {
                            let _ = self.purge_manifest_blobs(&manifest, &d).await;
                        }
                    }
                }
            }
        }
        if let Ok(index_digest) = self.tag_digest(reference).await {
            blob_io::remove_blob(&self.blobs_dir(), &index_digest).await?;
        }
        let tag_path = self.tag_path(reference)?;
        match tokio::fs::remove_file(&tag_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OciPkgError::io_at(tag_path, e)),
        }
    }

    async fn push_descriptor(&self, reference: &Reference, digest: &Digest) -> Result<()> {
        if let Ok(index) = self.read_index(digest).await {
            for desc in index.manifests() {
                let manifest_digest = Digest::parse(desc.digest())?;
                Box::pin(self.push_descriptor(reference, &manifest_digest)).await?;
            }
            let bytes = blob_io::read_blob(&self.blobs_dir(), digest).await?;
            self.transport
                .put_manifest(reference, digest.as_str(), &String::from(oci::media_type_index()), &bytes)
                .await?;
            if let Some(tag) = reference.tag() {
                self.transport.put_manifest(reference, tag, &String::from(oci::media_type_index()), &bytes).await?;
            }
            return Ok(());
        }
        if let Ok(manifest) = self.read_manifest(digest).await {
            let config_digest = Digest::parse(manifest.config().digest())?;
            if !self.transport.blob_exists(reference, &config_digest).await.unwrap_or(false) {
                let config_bytes = blob_io::read_blob(&self.blobs_dir(), &config_digest).await?;
                self.transport.put_blob(reference, &config_digest, &config_bytes).await?;
            }
            for layer in manifest.layers() {
                let layer_digest = Digest::parse(layer.digest())?;
                if !self.transport.blob_exists(reference, &layer_digest).await.unwrap_or(false) {
                    let layer_bytes = blob_io::read_blob(&self.blobs_dir(), &layer_digest).await?;
                    self.transport.put_blob(reference, &layer_digest, &layer_bytes).await?;
                }
            }
            let bytes = blob_io::read_blob(&self.blobs_dir(), digest).await?;
            self.transport
                .put_manifest(reference, digest.as_str(), &String::from(oci::media_type_manifest()), &bytes)
                .await?;
            return Ok(());
        }
        Err(OciPkgError::NotFound(digest.to_string()))
    }

    async fn unpack_image(&self, _reference: &Reference, digest: &Digest, dest: &Path) -> Result<UnpackedImage> {
        let manifest = self.read_manifest(digest).await?;
        tokio::fs::create_dir_all(dest).await.map_err(|e| OciPkgError::io_at(dest, e))?;
        for layer in manifest.layers() {
            let dest_path = layer
                .annotations()
                .as_ref()
                .and_then(|a| a.get(crate::builders::layer::DESTINATION_ANNOTATION))
                .map(|p| dest.join(p.trim_start_matches('/')))
                .ok_or_else(|| OciPkgError::Corrupt("layer missing destination annotation".into()))?;
            self.extract_layer(layer, &dest_path).await?;
        }
        Ok(UnpackedImage {
            dest: dest.to_path_buf(),
            manifest_digest: digest.clone(),
        })
    }
}

/// The namespace this store operates in — honours `$CONTAINERD_NAMESPACE`
/// (§6) when the caller builds it from [`crate::config::HostConfig`].
impl ContainerdStore {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use tempfile::tempdir;

    fn store(root: &Path, namespace: &str) -> ContainerdStore {
        let transport = Arc::new(Transport::new(HostConfig::default()));
        ContainerdStore::new(root, namespace, transport)
    }

    #[test]
    fn different_namespaces_resolve_to_disjoint_paths() {
        let root = tempdir().unwrap();
        let a = store(root.path(), "ns-a");
        let b = store(root.path(), "ns-b");
        assert_ne!(a.blobs_dir(), b.blobs_dir());
        assert_ne!(a.labels_dir(), b.labels_dir());
        assert!(a.blobs_dir().starts_with(root.path().join("ns-a")));
        assert!(b.blobs_dir().starts_with(root.path().join("ns-b")));
    }

    #[tokio::test]
    async fn saved_blob_is_isolated_to_its_namespace() {
        let root = tempdir().unwrap();
        let a = store(root.path(), "ns-a");
        let b = store(root.path(), "ns-b");
        let data = b"namespace-scoped-bytes".to_vec();
        let digest = Digest::of_bytes(&data);

        a.save_descriptor(
            &Reference::parse("registry.local/hello:v1", None, crate::reference::DEFAULT_REGISTRY).unwrap(),
            &MediaType::ImageLayer,
            &digest,
            &data,
            None,
        )
        .await
        .unwrap();

        assert!(a.digest_info(&digest).await.is_ok());
        assert!(b.digest_info(&digest).await.is_err());
    }
}
