//! In-memory blob construction (§4.2/Blob).
//!
//! Grounded on the teacher's `src/digest.rs` (compute-then-fix-descriptor
//! pattern) and `src/image/cache.rs` (`add_blob_with_verification`'s
//! "digest is authoritative" invariant).

use crate::digest::Digest;
use crate::oci::Descriptor;
use oci_spec::image::MediaType;

/// An immutable, already-hashed byte sequence. Once constructed its bytes
/// cannot change; the digest recorded on it is always correct for `data`.
#[derive(Debug, Clone)]
pub struct Blob {
    media_type: MediaType,
    data: Vec<u8>,
    digest: Digest,
}

impl Blob {
    pub fn new(media_type: MediaType, data: Vec<u8>) -> Self {
        let digest = Digest::of_bytes(&data);
        Self {
            media_type,
            data,
            digest,
        }
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn size(&self) -> i64 {
        self.data.len() as i64
    }

    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.media_type.clone(), self.size(), self.digest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_data() {
        let blob = Blob::new(MediaType::ImageLayer, b"hello".to_vec());
        assert!(blob.digest().verify(b"hello").is_ok());
        assert_eq!(blob.descriptor().size(), 5);
    }
}
