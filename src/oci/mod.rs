//! OCI image-spec data model.
//!
//! Wraps the `oci-spec` crate's `Descriptor`/`Platform`/`ImageManifest`/
//! `ImageIndex`/`ImageConfiguration` types rather than hand-rolling them —
//! correct (de)serialization and media-type handling come for free. The
//! digest of any of these objects is always computed via
//! [`crate::digest::Digest::of_json`], which canonicalises map ordering
//! before hashing (see that function's doc comment).

pub mod annotations;

use oci_spec::image::MediaType;

/// `application/vnd.oci.image.index.v1+json`
pub fn media_type_index() -> MediaType {
    MediaType::ImageIndex
}

/// `application/vnd.oci.image.manifest.v1+json`
pub fn media_type_manifest() -> MediaType {
    MediaType::ImageManifest
}

/// `application/vnd.oci.image.config.v1+json`
pub fn media_type_config() -> MediaType {
    MediaType::ImageConfig
}

/// `application/vnd.oci.image.layer.v1.tar`
pub fn media_type_layer() -> MediaType {
    MediaType::ImageLayer
}

/// `application/vnd.oci.image.layer.v1.tar+gzip`
pub fn media_type_layer_gzip() -> MediaType {
    MediaType::ImageLayerGzip
}

/// Well-known in-image destination paths for a packaged unikernel (§6).
pub mod layer_paths {
    pub const KERNEL: &str = "/unikraft/bin/kernel";
    pub const KERNEL_DBG: &str = "/unikraft/bin/kernel.dbg";
    pub const INITRD: &str = "/unikraft/bin/initrd";
    pub const CONFIG: &str = "/unikraft/bin/config";
}

pub use oci_spec::image::{
    Arch, Config as ImageExecConfig, ConfigBuilder as ImageExecConfigBuilder, Descriptor,
    DescriptorBuilder, History, HistoryBuilder, ImageConfiguration, ImageConfigurationBuilder,
    ImageIndex, ImageIndexBuilder, ImageManifest, ImageManifestBuilder, Os, Platform,
    PlatformBuilder, RootFs, RootFsBuilder, SCHEMA_VERSION,
};
