//! The `Handler` capability set (§9): the source design's union of small
//! interfaces (`BlobAccessor`, `ManifestResolver`, `Pusher`, `Puller`, ...)
//! collapsed into one trait, implemented twice — filesystem and
//! containerd-style.

use crate::concurrency::Budget;
use crate::digest::Digest;
use crate::error::Result;
use crate::oci::{ImageIndex, ImageManifest, Platform};
use crate::reference::Reference;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy)]
pub struct DigestInfo {
    pub size: u64,
    pub updated_at: SystemTime,
}

/// `fn(bytes_done, bytes_total)`.
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// Restricts which manifests of an index a pull descends into (§4.1.1).
#[derive(Debug, Clone, Default)]
pub struct PlatformSelector {
    pub os: Option<String>,
    pub architecture: Option<String>,
    pub os_features: Vec<String>,
}

impl PlatformSelector {
    pub fn exact(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: Some(os.into()),
            architecture: Some(architecture.into()),
            os_features: Vec::new(),
        }
    }

    /// OS equal when selector OS set; architecture equal when selector
    /// architecture set; all requested os.features present.
    pub fn matches(&self, platform: &Platform) -> bool {
        if let Some(os) = &self.os {
            if platform.os().to_string() != *os {
                return false;
            }
        }
        if let Some(arch) = &self.architecture {
            if platform.architecture().to_string() != *arch {
                return false;
            }
        }
        if !self.os_features.is_empty() {
            let present = platform.os_features().clone().unwrap_or_default();
            if !self.os_features.iter().all(|f| present.contains(f)) {
                return false;
            }
        }
        true
    }
}

pub struct UnpackedImage {
    pub dest: PathBuf,
    pub manifest_digest: Digest,
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Pure lookup; no side effects.
    async fn digest_info(&self, digest: &Digest) -> Result<DigestInfo>;

    /// Streams `data` into storage under the key derived from `digest`.
    /// If `media_type` is an index media type and `reference` carries a
    /// tag, the tag mapping is atomically repointed at `digest` once the
    /// bytes are durable.
    async fn save_descriptor(
        &self,
        reference: &Reference,
        media_type: &oci_spec::image::MediaType,
        digest: &Digest,
        data: &[u8],
        on_progress: Option<&ProgressFn<'_>>,
    ) -> Result<()>;

    /// Fetches the object named by `digest` and its transitive closure from
    /// the registry named by `reference`, subject to `selector` when the
    /// object is an index. `budget` gates and cancels the concurrent
    /// per-manifest fan-out when `digest` names an index (§5, §4.1.1 step 1).
    async fn pull_digest(
        &self,
        reference: &Reference,
        digest: &Digest,
        selector: &PlatformSelector,
        on_progress: Option<&ProgressFn<'_>>,
        budget: &Budget,
    ) -> Result<()>;

    async fn resolve_manifest(&self, digest: &Digest) -> Result<ImageManifest>;
    async fn resolve_index(&self, reference: &Reference) -> Result<ImageIndex>;

    async fn list_manifests(&self) -> Result<Vec<Digest>>;
    async fn list_indexes(&self) -> Result<Vec<Reference>>;

    /// Removes the manifest, its config blob, and each layer blob. If it is
    /// the index's last entry, the index (and tag) are removed too; else
    /// the index is rewritten without the removed entry.
    async fn delete_manifest(&self, reference: &Reference, digest: &Digest) -> Result<()>;

    /// Removes the index (and tag); if `deps`, also deletes every
    /// referenced manifest.
    async fn delete_index(&self, reference: &Reference, deps: bool) -> Result<()>;

    /// Uploads `digest` and, for indexes/manifests, walks the local object
    /// graph uploading layers/configs as dependencies not already remote.
    async fn push_descriptor(&self, reference: &Reference, digest: &Digest) -> Result<()>;

    /// Streams each layer of the chosen manifest as tar, extracting into
    /// `dest`.
    async fn unpack_image(
        &self,
        reference: &Reference,
        digest: &Digest,
        dest: &Path,
    ) -> Result<UnpackedImage>;
}
