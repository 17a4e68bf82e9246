//! Filesystem content store (§6): `<root>/digests/<alg>/<hex>` blobs,
//! `<root>/indexes/<reg>/<repo>/<tag>` tag symlinks.
//!
//! Grounded on the teacher's `image/cache.rs` (`Cache`: digest path layout,
//! atomic writes, integrity verification on read).

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
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FsStore {
    root: PathBuf,
    transport: Arc<Transport>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, transport: Arc<Transport>) -> Self {
        Self {
            root: root.into(),
            transport,
        }
    }

    fn digests_dir(&self) -> PathBuf {
        self.root.join("digests")
    }

    fn tag_path(&self, reference: &Reference) -> Result<PathBuf> {
        let tag = reference.tag().ok_or_else(|| {
            OciPkgError::Validation("tag mapping requires a reference with a tag".into())
        })?;
        Ok(self
            .root
            .join("indexes")
            .join(&reference.registry)
            .join(&reference.repository)
            .join(tag))
    }

    async fn save_json<T: serde::Serialize>(&self, value: &T) -> Result<Digest> {
        let digest = Digest::of_json(value)?;
        let bytes = serde_json::to_vec(&serde_json::to_value(value)?)?;
        blob_io::save_blob(&self.digests_dir(), &digest, &bytes).await?;
        Ok(digest)
    }

    async fn read_manifest(&self, digest: &Digest) -> Result<ImageManifest> {
        let bytes = blob_io::read_blob(&self.digests_dir(), digest).await?;
        serde_json::from_slice(&bytes).map_err(|e| OciPkgError::Corrupt(e.to_string()))
    }

    async fn read_index(&self, digest: &Digest) -> Result<ImageIndex> {
        let bytes = blob_io::read_blob(&self.digests_dir(), digest).await?;
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

    /// Remove the manifest, its config, and its layer blobs. Does not touch
    /// the index.
    async fn purge_manifest_blobs(&self, manifest: &ImageManifest, manifest_digest: &Digest) -> Result<()> {
        blob_io::remove_blob(&self.digests_dir(), manifest_digest).await?;
        let config_digest = Digest::parse(manifest.config().digest())?;
        blob_io::remove_blob(&self.digests_dir(), &config_digest).await?;
        for layer in manifest.layers() {
            let layer_digest = Digest::parse(layer.digest())?;
            blob_io::remove_blob(&self.digests_dir(), &layer_digest).await?;
        }
        Ok(())
    }

    async fn extract_layer(&self, descriptor: &Descriptor, dest: &Path) -> Result<()> {
        let digest = Digest::parse(descriptor.digest())?;
        let bytes = blob_io::read_blob(&self.digests_dir(), &digest).await?;
        let media_type = descriptor.media_type().clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_tar_entry(&bytes, &media_type, &dest))
            .await
            .map_err(|e| OciPkgError::Validation(format!("extraction task panicked: {e}")))??;
        Ok(())
    }
}

pub(super) fn extract_tar_entry(bytes: &[u8], media_type: &MediaType, dest: &Path) -> Result<()> {
    let is_gzip = matches!(media_type, MediaType::ImageLayerGzip)
        || matches!(media_type, MediaType::Other(s) if s.ends_with("+gzip"));
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| OciPkgError::io_at(parent, e))?;
    }
    let reader: Box<dyn std::io::Read> = if is_gzip {
        Box::new(flate2::read::GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().map_err(OciPkgError::from)? {
        let mut entry = entry.map_err(OciPkgError::from)?;
        entry.unpack(dest).map_err(OciPkgError::from)?;
    }
    Ok(())
}

#[async_trait]
impl Handler for FsStore {
    async fn digest_info(&self, digest: &Digest) -> Result<DigestInfo> {
        let path = blob_io::blob_path(&self.digests_dir(), digest);
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
        blob_io::save_blob(&self.digests_dir(), digest, data).await?;
        if let Some(progress) = on_progress {
            progress(data.len() as u64, data.len() as u64);
        }
        if matches!(media_type, MediaType::ImageIndex) && reference.tag().is_some() {
            let tag_path = self.tag_path(reference)?;
            let target = blob_io::blob_path(&self.digests_dir(), digest);
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
                if !blob_io::has_blob(&self.digests_dir(), digest) {
                    self.save_descriptor(reference, &media_type, digest, &bytes, on_progress)
                        .await?;
                }
                let manifest: ImageManifest =
                    serde_json::from_slice(&bytes).map_err(|e| OciPkgError::Corrupt(e.to_string()))?;

                let config_digest = Digest::parse(manifest.config().digest())?;
                if !blob_io::has_blob(&self.digests_dir(), &config_digest) {
                    let config_bytes = self.transport.get_blob(reference, &config_digest).await?;
                    self.save_descriptor(
                        reference,
                        manifest.config().media_type(),
                        &config_digest,
                        &config_bytes,
                        on_progress,
                    )
                    .await?;
                }

                let total: u64 = manifest.layers().iter().map(|l| l.size() as u64).sum();
                let mut done = 0u64;
                for layer in manifest.layers() {
                    let layer_digest = Digest::parse(layer.digest())?;
                    if !blob_io::has_blob(&self.digests_dir(), &layer_digest) {
                        let layer_bytes = self.transport.get_blob(reference, &layer_digest).await?;
                        self.save_descriptor(
                            reference,
                            layer.media_type(),
                            &layer_digest,
                            &layer_bytes,
                            None,
                        )
                        .await?;
                    }
                    done += layer.size() as u64;
                    if let Some(progress) = on_progress {
                        progress(done, total.max(1));
                    }
                }
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
        let sha_dir = self.digests_dir().join("sha256");
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
        let indexes_dir = self.root.join("indexes");
        let mut registries = match tokio::fs::read_dir(&indexes_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(OciPkgError::io_at(&indexes_dir, e)),
        };
        while let Some(registry_entry) = registries.next_entry().await.map_err(|e| OciPkgError::io_at(&indexes_dir, e))? {
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
            let new_digest = self.save_json(&index).await?;
            self.save_descriptor(
                reference,
                &oci::media_type_index(),
                &new_digest,
                &serde_json::to_vec(&serde_json::to_value(&index)?)?,
                None,
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_index(&self, reference: &Reference, deps: bool) -> Result<()> {
        if deps {
            if let Ok(index) = self.resolve_index(reference).await {
                for m in index.manifests() {
                    if let Ok(d) = Digest::parse(m.digest()) {
                        let manifest = self.read_manifest(&d).await;
                        if let Ok(manifest) = manifest {
                            let _ = self.purge_manifest_blobs(&manifest, &d).await;
                        }
                    }
                }
            }
        }
        if let Ok(index_digest) = self.tag_digest(reference).await {
            blob_io::remove_blob(&self.digests_dir(), &index_digest).await?;
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
            let bytes = blob_io::read_blob(&self.digests_dir(), digest).await?;
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
                let config_bytes = blob_io::read_blob(&self.digests_dir(), &config_digest).await?;
                self.transport.put_blob(reference, &config_digest, &config_bytes).await?;
            }
            for layer in manifest.layers() {
                let layer_digest = Digest::parse(layer.digest())?;
                if !self.transport.blob_exists(reference, &layer_digest).await.unwrap_or(false) {
                    let layer_bytes = blob_io::read_blob(&self.digests_dir(), &layer_digest).await?;
                    self.transport.put_blob(reference, &layer_digest, &layer_bytes).await?;
                }
            }
            let bytes = blob_io::read_blob(&self.digests_dir(), digest).await?;
            self.transport
                .put_manifest(reference, digest.as_str(), &String::from(oci::media_type_manifest()), &bytes)
                .await?;
            return Ok(());
        }

        Err(OciPkgError::NotFound(digest.to_string()))
    }

    async fn unpack_image(&self, _reference: &Reference, digest: &Digest, dest: &Path) -> Result<UnpackedImage> {
        let manifest = self.read_manifest(digest).await?;
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| OciPkgError::io_at(dest, e))?;
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
