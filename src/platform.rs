//! Platform matching (§4.3): deterministic checksum and feature ordering.

use crate::builders::manifest::ManifestConfig;
use crate::digest::Digest;
use crate::oci::{Arch, Os, Platform, PlatformBuilder};
use serde::Serialize;
use std::cmp::Ordering;

/// Builds the [`Platform`] a [`ManifestConfig`] would produce once saved,
/// for computing a platform-checksum before the manifest is actually built
/// (§4.4 step 8). Applies the same `os.features` ordering as
/// `ManifestDraft::save` so the checksum matches post-save.
pub fn canonical_platform_for(config: &ManifestConfig) -> Platform {
    let mut features = config.os_features.clone();
    sort_os_features(&mut features);
    let mut builder = PlatformBuilder::default()
        .architecture(Arch::from(config.architecture.as_str()))
        .os(Os::from(config.os.as_str()));
    if let Some(v) = &config.os_version {
        builder = builder.os_version(v.clone());
    }
    if !features.is_empty() {
        builder = builder.os_features(features);
    }
    builder.build().expect("platform builder: required fields set")
}

/// Canonical projection of [`Platform`] used for checksumming. Field order
/// is fixed: architecture, os, os.version, os.features — matching §4.3
/// regardless of whatever field order `oci-spec`'s `Platform` happens to
/// derive `Serialize` in.
#[derive(Serialize)]
struct CanonicalPlatform<'a> {
    architecture: String,
    os: String,
    #[serde(rename = "os.version", skip_serializing_if = "Option::is_none")]
    os_version: Option<&'a str>,
    #[serde(rename = "os.features", skip_serializing_if = "Option::is_none")]
    os_features: Option<&'a [String]>,
}

impl<'a> From<&'a Platform> for CanonicalPlatform<'a> {
    fn from(p: &'a Platform) -> Self {
        CanonicalPlatform {
            architecture: p.architecture().to_string(),
            os: p.os().to_string(),
            os_version: p.os_version().as_deref(),
            os_features: p.os_features().as_deref(),
        }
    }
}

/// `sha256(reference || json(platform))`, with `platform` canonicalised per
/// [`CanonicalPlatform`]. Used to dedupe manifests within an index: two
/// manifests are "the same platform slot" iff their checksums are equal.
pub fn platform_checksum(reference: &str, platform: &Platform) -> Digest {
    let canonical = CanonicalPlatform::from(platform);
    // of_json hashes the canonical JSON of `canonical` alone; concatenate
    // the reference string in front of those bytes, per the spec's
    // `sha256(reference || json(platform))` formula.
    let json = serde_json::to_vec(&serde_json::to_value(&canonical).expect("platform json"))
        .expect("platform json bytes");
    let mut buf = Vec::with_capacity(reference.len() + json.len());
    buf.extend_from_slice(reference.as_bytes());
    buf.extend_from_slice(&json);
    Digest::of_bytes(&buf)
}

/// Sort `os.features` tokens: numeric tokens (parse as `i64`) descending by
/// value, ordered before all alphabetic tokens; alphabetic tokens ascending
/// lexicographically. Fixed so that repeated packaging of identical inputs
/// produces byte-identical manifests (§4.2/Manifest/Save step 1).
pub fn sort_os_features(features: &mut [String]) {
    features.sort_by(|a, b| {
        match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(x), Ok(y)) => y.cmp(&x),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::PlatformBuilder;

    fn platform(arch: &str, os: &str) -> Platform {
        PlatformBuilder::default()
            .architecture(arch)
            .os(os)
            .build()
            .unwrap()
    }

    #[test]
    fn checksum_is_deterministic() {
        let p = platform("amd64", "linux");
        let a = platform_checksum("registry.local/hello:v1", &p);
        let b = platform_checksum("registry.local/hello:v1", &p);
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_differs_by_reference() {
        let p = platform("amd64", "linux");
        let a = platform_checksum("registry.local/hello:v1", &p);
        let b = platform_checksum("registry.local/other:v1", &p);
        assert_ne!(a, b);
    }

    #[test]
    fn checksum_differs_by_platform() {
        let a = platform_checksum("r/h:v1", &platform("amd64", "linux"));
        let b = platform_checksum("r/h:v1", &platform("arm64", "linux"));
        assert_ne!(a, b);
    }

    #[test]
    fn numeric_features_sort_descending_before_alpha() {
        let mut v = vec![
            "CONFIG_B".to_string(),
            "10".to_string(),
            "CONFIG_A".to_string(),
            "2".to_string(),
        ];
        sort_os_features(&mut v);
        assert_eq!(v, vec!["10", "2", "CONFIG_A", "CONFIG_B"]);
    }
}
