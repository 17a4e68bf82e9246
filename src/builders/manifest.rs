//! Draft manifest accumulation and `Save` (§4.2/Manifest).
//!
//! Grounded on the teacher's `image/manifest.rs` (draft-then-persist shape)
//! and `image/cache_manager.rs` (manifest-before-dependencies persist
//! order). The RFC3339 `created` timestamp uses `chrono`, already in the
//! teacher's dependency table; `set_created` lets a caller pin it so
//! `save()` stays reproducible across independent runs of identical inputs.

use super::layer::Layer;
use crate::concurrency::Budget;
use crate::digest::Digest;
use crate::error::Result;
use crate::oci::{
    self, annotations, Arch, Descriptor, ImageConfigurationBuilder, ImageExecConfigBuilder,
    ImageManifest, ImageManifestBuilder, Os, Platform, PlatformBuilder, RootFsBuilder,
};
use crate::platform::sort_os_features;
use crate::reference::Reference;
use crate::store::handler::Handler;
use std::collections::HashMap;

/// Configuration a draft manifest accumulates before `Save` fixes its
/// digest (§4.2/Manifest).
#[derive(Debug, Clone, Default)]
pub struct ManifestConfig {
    pub architecture: String,
    pub os: String,
    pub os_version: Option<String>,
    pub os_features: Vec<String>,
    pub labels: HashMap<String, String>,
    pub cmd: Option<Vec<String>>,
}

pub struct ManifestDraft {
    config: ManifestConfig,
    layers: Vec<Layer>,
    annotations: HashMap<String, String>,
    kernel_version: Option<String>,
    created: Option<chrono::DateTime<chrono::Utc>>,
}

/// A manifest whose digest and descriptor are fixed (`saved=true`). The
/// `platform` is carried alongside because OCI attaches platform to the
/// *descriptor referencing* a manifest (from an index), not to the
/// manifest object itself.
pub struct SavedManifest {
    pub digest: Digest,
    pub manifest: ImageManifest,
    pub platform: Platform,
}

impl SavedManifest {
    pub fn descriptor(&self) -> Descriptor {
        let bytes = canonical_bytes(&self.manifest);
        let mut descriptor =
            Descriptor::new(oci::media_type_manifest(), bytes.len() as i64, self.digest.to_string());
        descriptor.set_platform(Some(self.platform.clone()));
        descriptor
    }
}

fn canonical_bytes<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(&serde_json::to_value(value).expect("serializable")).expect("serializable")
}

impl ManifestDraft {
    pub fn new(config: ManifestConfig) -> Self {
        Self {
            config,
            layers: Vec::new(),
            annotations: HashMap::new(),
            kernel_version: None,
            created: None,
        }
    }

    pub fn add_layer(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn set_kernel_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.kernel_version = Some(version.into());
        self
    }

    /// Pins the `created` annotation (§4.2/Manifest/Save step 3) to an
    /// explicit instant instead of the wall clock at `save()` time, so
    /// repeated packaging of identical inputs yields a byte-identical
    /// manifest digest (§8 Testable Property 1).
    pub fn set_created(&mut self, created: chrono::DateTime<chrono::Utc>) -> &mut Self {
        self.created = Some(created);
        self
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Performs the five steps of §4.2/Manifest/Save.
    pub async fn save(mut self, handler: &dyn Handler, reference: &Reference, budget: &Budget) -> Result<SavedManifest> {
        // 1. Deterministic os.features ordering.
        sort_os_features(&mut self.config.os_features);

        let arch = Arch::from(self.config.architecture.as_str());
        let os = Os::from(self.config.os.as_str());

        let rootfs = RootFsBuilder::default()
            .typ("layers")
            .diff_ids(
                self.layers
                    .iter()
                    .map(|l| l.diff_id().to_string())
                    .collect::<Vec<_>>(),
            )
            .build()
            .map_err(|e| crate::error::OciPkgError::Validation(e.to_string()))?;

        let mut exec_builder = ImageExecConfigBuilder::default();
        if !self.config.labels.is_empty() {
            exec_builder = exec_builder.labels(self.config.labels.clone());
        }
        if let Some(cmd) = &self.config.cmd {
            exec_builder = exec_builder.cmd(cmd.clone());
        }
        let exec_config = exec_builder
            .build()
            .map_err(|e| crate::error::OciPkgError::Validation(e.to_string()))?;

        let mut image_config_builder = ImageConfigurationBuilder::default()
            .architecture(arch.clone())
            .os(os.clone())
            .config(exec_config)
            .rootfs(rootfs);
        if let Some(v) = &self.config.os_version {
            image_config_builder = image_config_builder.os_version(v.clone());
        }
        if !self.config.os_features.is_empty() {
            image_config_builder = image_config_builder.os_features(self.config.os_features.clone());
        }
        let image_config = image_config_builder
            .build()
            .map_err(|e| crate::error::OciPkgError::Validation(e.to_string()))?;

        // 2. Marshal config, compute digest, wrap as a blob.
        let config_digest = Digest::of_json(&image_config)?;
        let config_bytes = canonical_bytes(&image_config);
        let config_descriptor = Descriptor::new(
            oci::media_type_config(),
            config_bytes.len() as i64,
            config_digest.to_string(),
        );

        // 3. Standard annotations.
        let mut manifest_annotations = self.annotations.clone();
        manifest_annotations.insert(annotations::REF_NAME.to_string(), reference.storage_key());
        let created = self.created.unwrap_or_else(chrono::Utc::now);
        manifest_annotations.insert(annotations::CREATED.to_string(), created.to_rfc3339());
        manifest_annotations.insert(
            annotations::IMPLEMENTATION_VERSION.to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        manifest_annotations.insert(
            annotations::CONTAINERD_IMAGE_NAME.to_string(),
            reference.storage_key(),
        );
        if let Some(kv) = &self.kernel_version {
            manifest_annotations.insert(annotations::KERNEL_VERSION.to_string(), kv.clone());
        }

        // 4. Assemble the manifest JSON; digest and descriptor now fixed.
        let layer_descriptors: Vec<Descriptor> = self.layers.iter().map(|l| l.descriptor()).collect();
        let manifest = ImageManifestBuilder::default()
            .schema_version(oci::SCHEMA_VERSION)
            .config(config_descriptor.clone())
            .layers(layer_descriptors)
            .annotations(manifest_annotations)
            .build()
            .map_err(|e| crate::error::OciPkgError::Validation(e.to_string()))?;
        let manifest_digest = Digest::of_json(&manifest)?;
        let manifest_bytes = canonical_bytes(&manifest);

        // 5. Persist manifest, then config (if absent), then layers
        // concurrently.
        handler
            .save_descriptor(
                reference,
                &oci::media_type_manifest(),
                &manifest_digest,
                &manifest_bytes,
                None,
            )
            .await?;
        handler
            .save_descriptor(
                reference,
                &oci::media_type_config(),
                &config_digest,
                &config_bytes,
                None,
            )
            .await?;

        let layer_saves = self.layers.iter().map(|layer| {
            let reference = reference.clone();
            async move {
                budget
                    .run(handler.save_descriptor(
                        &reference,
                        layer.blob().media_type(),
                        layer.blob().digest(),
                        layer.blob().data(),
                        None,
                    ))
                    .await
                    .unwrap_or(Err(crate::error::OciPkgError::Cancelled))
            }
        });
        futures::future::try_join_all(layer_saves).await?;

        let mut platform_builder = PlatformBuilder::default().architecture(arch).os(os);
        if let Some(v) = &self.config.os_version {
            platform_builder = platform_builder.os_version(v.clone());
        }
        if !self.config.os_features.is_empty() {
            platform_builder = platform_builder.os_features(self.config.os_features.clone());
        }
        let platform = platform_builder
            .build()
            .map_err(|e| crate::error::OciPkgError::Validation(e.to_string()))?;

        Ok(SavedManifest {
            digest: manifest_digest,
            manifest,
            platform,
        })
    }
}
