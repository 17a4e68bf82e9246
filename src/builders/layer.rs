//! Tar(+gzip) layer construction (§4.2/Layer).
//!
//! Grounded on `hhd-dev-ocidir-rs`'s `GzipLayerWriter`/`create_layer` (tar
//! entry written into a gzip stream) and the teacher's `tar_utils.rs`
//! idiom of a single in-memory archive. File times are stripped (`mtime`
//! fixed to 0 in both the tar header and the gzip header) so identical
//! inputs produce an identical archive, and therefore an identical digest
//! (§4.2 step: "file times are stripped to make the archive reproducible").

use super::blob::Blob;
use crate::digest::Digest;
use crate::error::{OciPkgError, Result};
use crate::oci::Descriptor;
use flate2::write::GzEncoder;
use flate2::Compression;
use oci_spec::image::MediaType;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// Annotation key recording where inside the packaged filesystem a layer's
/// single file is destined to land, read back by `unpack_image`.
pub const DESTINATION_ANNOTATION: &str = "dev.kraftkit.ocipkg.layer.destination";

pub struct Layer {
    blob: Blob,
    /// Digest of the *uncompressed* tar archive. Equal to `blob.digest()`
    /// when the layer isn't gzip-compressed; otherwise distinct, since
    /// `rootfs.diff_ids` names uncompressed content while the descriptor
    /// digest names the stored (possibly compressed) bytes.
    diff_id: Digest,
    destination: String,
}

impl Layer {
    /// Build a layer from the bytes of a single source file, placed at
    /// `destination` inside the image (e.g. `/unikraft/bin/kernel`).
    pub fn from_bytes(data: &[u8], destination: &str, gzip: bool) -> Result<Self> {
        let tar_bytes = build_tar(data, destination)?;
        let diff_id = Digest::of_bytes(&tar_bytes);
        let (media_type, bytes) = if gzip {
            (MediaType::ImageLayerGzip, gzip_bytes(&tar_bytes)?)
        } else {
            (MediaType::ImageLayer, tar_bytes)
        };
        Ok(Self {
            blob: Blob::new(media_type, bytes),
            diff_id,
            destination: destination.to_string(),
        })
    }

    pub fn from_file(source: &Path, destination: &str, gzip: bool) -> Result<Self> {
        let data = std::fs::read(source).map_err(|e| OciPkgError::io_at(source, e))?;
        Self::from_bytes(&data, destination, gzip)
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    /// Digest of the uncompressed tar archive, as recorded in
    /// `rootfs.diff_ids`.
    pub fn diff_id(&self) -> &Digest {
        &self.diff_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn descriptor(&self) -> Descriptor {
        let mut descriptor = self.blob.descriptor();
        let mut annotations = HashMap::new();
        annotations.insert(DESTINATION_ANNOTATION.to_string(), self.destination.clone());
        descriptor.set_annotations(Some(annotations));
        descriptor
    }
}

fn build_tar(data: &[u8], destination: &str) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    let entry_path = destination.trim_start_matches('/');
    builder
        .append_data(&mut header, entry_path, data)
        .map_err(OciPkgError::from)?;
    builder.into_inner().map_err(OciPkgError::from)
}

fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(OciPkgError::from)?;
    encoder.finish().map_err(OciPkgError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_identical_digest() {
        let a = Layer::from_bytes(b"kernel-bytes", "/unikraft/bin/kernel", true).unwrap();
        let b = Layer::from_bytes(b"kernel-bytes", "/unikraft/bin/kernel", true).unwrap();
        assert_eq!(a.blob().digest(), b.blob().digest());
        assert_eq!(a.diff_id(), b.diff_id());
    }

    #[test]
    fn gzip_diff_id_differs_from_stored_digest() {
        let layer = Layer::from_bytes(b"kernel-bytes", "/unikraft/bin/kernel", true).unwrap();
        assert_ne!(layer.diff_id(), layer.blob().digest());
    }

    #[test]
    fn uncompressed_round_trips_via_tar() {
        let layer = Layer::from_bytes(b"payload", "/unikraft/bin/config", false).unwrap();
        let mut archive = tar::Archive::new(layer.blob().data());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str().unwrap(), "unikraft/bin/config");
        let mut out = Vec::new();
        std::io::copy(&mut entry, &mut out).unwrap();
        assert_eq!(out, b"payload");
    }
}
