//! Reference parsing: `[registry/]repository[:tag|@digest]`.
//!
//! Grounded on the teacher's `RegistryConfig::parse_url` (protocol/host/path
//! splitting), generalised to the three accepted forms from §4.5 and to the
//! storage-key normalisation required by §3.

use crate::digest::Digest;
use crate::error::{OciPkgError, Result};
use std::fmt;

pub const DEFAULT_REGISTRY: &str = "index.unikraft.io";
pub const DEFAULT_TAG: &str = "latest";

/// The version half of a reference: either a tag or a resolved digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    Tag(String),
    Digest(Digest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub version: Version,
}

impl Reference {
    /// Parse a reference, applying the default registry and tag when absent.
    ///
    /// Accepted forms: `repo`, `repo:tag`, `repo@sha256:...`,
    /// `registry/repo`, `registry/repo:tag`, `registry/repo@sha256:...`.
    /// If the caller also knows a separately-supplied version (e.g. a
    /// `--version` flag) that disagrees with a tag embedded in `name`, pass
    /// it as `explicit_version` to get `AmbiguousVersion` instead of a
    /// silently-ignored tag. `default_registry` fills in a missing registry
    /// segment (§3) — callers thread [`crate::config::HostConfig::default_registry`]
    /// through rather than relying on a hardcoded constant.
    pub fn parse(name: &str, explicit_version: Option<&str>, default_registry: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(OciPkgError::Validation("empty reference".into()));
        }

        let (path, version) = if let Some(at) = name.rfind('@') {
            let digest = Digest::parse(&name[at + 1..])?;
            (&name[..at], Some(Version::Digest(digest)))
        } else if let Some(colon) = name.rfind(':') {
            // A colon before the first '/' is a registry port, not a tag
            // separator (e.g. `localhost:5000/repo`).
            let slash = name.find('/');
            if slash.is_some_and(|s| colon < s) {
                (name, None)
            } else {
                (&name[..colon], Some(Version::Tag(name[colon + 1..].to_string())))
            }
        } else {
            (name, None)
        };

        let (registry, repository) = match path.find('/') {
            Some(slash) if path[..slash].contains('.') || path[..slash].contains(':') || &path[..slash] == "localhost" => {
                (path[..slash].to_string(), path[slash + 1..].to_string())
            }
            Some(_) | None => (default_registry.to_string(), path.to_string()),
        };

        if repository.is_empty() {
            return Err(OciPkgError::Validation(format!(
                "reference missing repository: {name}"
            )));
        }

        let version = match (version, explicit_version) {
            (Some(Version::Tag(t)), Some(ev)) if t != ev => {
                return Err(OciPkgError::AmbiguousVersion(format!(
                    "reference tag `{t}` disagrees with requested version `{ev}`"
                )))
            }
            (Some(v), _) => v,
            (None, Some(ev)) => Version::Tag(ev.to_string()),
            (None, None) => Version::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Reference {
            registry,
            repository,
            version,
        })
    }

    /// The normalised storage key: `registry/repository:tag` or
    /// `registry/repository@digest`.
    pub fn storage_key(&self) -> String {
        format!("{self}")
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.version {
            Version::Tag(t) => Some(t),
            Version::Digest(_) => None,
        }
    }

    pub fn digest(&self) -> Option<&Digest> {
        match &self.version {
            Version::Digest(d) => Some(d),
            Version::Tag(_) => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Version::Tag(t) => write!(f, "{}/{}:{}", self.registry, self.repository, t),
            Version::Digest(d) => write!(f, "{}/{}@{}", self.registry, self.repository, d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gets_defaults() {
        let r = Reference::parse("hello", None, DEFAULT_REGISTRY).unwrap();
        assert_eq!(r.registry, DEFAULT_REGISTRY);
        assert_eq!(r.repository, "hello");
        assert_eq!(r.tag(), Some(DEFAULT_TAG));
    }

    #[test]
    fn registry_and_tag() {
        let r = Reference::parse("registry.local/hello:v1", None, DEFAULT_REGISTRY).unwrap();
        assert_eq!(r.registry, "registry.local");
        assert_eq!(r.repository, "hello");
        assert_eq!(r.tag(), Some("v1"));
    }

    #[test]
    fn localhost_with_port_is_registry() {
        let r = Reference::parse("localhost:5000/hello:v1", None, DEFAULT_REGISTRY).unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "hello");
        assert_eq!(r.tag(), Some("v1"));
    }

    #[test]
    fn digest_form() {
        let d = Digest::of_bytes(b"x");
        let name = format!("registry.local/hello@{d}");
        let r = Reference::parse(&name, None, DEFAULT_REGISTRY).unwrap();
        assert_eq!(r.digest(), Some(&d));
    }

    #[test]
    fn ambiguous_version_rejected() {
        let err = Reference::parse("registry.local/hello:v1", Some("v2"), DEFAULT_REGISTRY).unwrap_err();
        assert!(matches!(err, OciPkgError::AmbiguousVersion(_)));
    }

    #[test]
    fn storage_key_round_trips() {
        let r = Reference::parse("registry.local/hello:v1", None, DEFAULT_REGISTRY).unwrap();
        assert_eq!(r.storage_key(), "registry.local/hello:v1");
    }
}
