//! Reference resolution and catalog enumeration (§4.5).
//!
//! Grounded on the teacher's `registry/client.rs` (`check_registry_version`:
//! an unauthenticated `GET /v2/` probe used to decide whether a host speaks
//! the registry API at all) for the registry compatibility test, and on
//! [`crate::store::handler::Handler::list_indexes`] for the local catalog.

use crate::config::HostConfig;
use crate::error::Result;
use crate::oci::annotations;
use crate::reference::Reference;
use crate::store::handler::Handler;
use crate::transport::Transport;
use std::sync::Arc;

/// A catalog entry: a resolved index plus the metadata a caller filters or
/// displays by, without needing to pull the whole manifest graph.
#[derive(Debug, Clone)]
pub struct Package {
    pub reference: Reference,
    pub manifest_count: usize,
    pub kernel_versions: Vec<String>,
}

/// Name and version query used to filter the local catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub name: Option<String>,
    pub version: Option<String>,
}

impl CatalogQuery {
    fn matches(&self, reference: &Reference) -> bool {
        if let Some(name) = &self.name {
            if !reference.repository.contains(name.as_str()) {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if reference.tag() != Some(version.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Three ways a `source` string may be usable as an image reference,
/// probed in order: local presence, distribution-spec ping, or a
/// head/config document fetch. Drives which package manager an upstream
/// CLI would select for a given source (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityMode {
    Local,
    DistributionRegistry,
    ConfigDocument,
}

pub struct Resolver {
    host_config: HostConfig,
    transport: Arc<Transport>,
}

impl Resolver {
    pub fn new(host_config: HostConfig, transport: Arc<Transport>) -> Self {
        Self {
            host_config,
            transport,
        }
    }

    pub fn host_config(&self) -> &HostConfig {
        &self.host_config
    }

    /// Walks the local blob store and returns indexes matching `query`,
    /// skipping any index whose selected manifest lacks the
    /// implementation-version annotation (not produced by this engine,
    /// per §6's annotation fallback rule) when building `kernel_versions`.
    pub async fn local_catalog(&self, handler: &dyn Handler, query: &CatalogQuery) -> Result<Vec<Package>> {
        let mut packages = Vec::new();
        for reference in handler.list_indexes().await? {
            if !query.matches(&reference) {
                continue;
            }
            let Ok(index) = handler.resolve_index(&reference).await else {
                continue;
            };
            let mut kernel_versions = Vec::new();
            for desc in index.manifests() {
                let Ok(digest) = crate::digest::Digest::parse(desc.digest()) else {
                    continue;
                };
                let Ok(manifest) = handler.resolve_manifest(&digest).await else {
                    continue;
                };
                let Some(anns) = manifest.annotations() else {
                    continue;
                };
                // A manifest missing this annotation isn't a unikernel;
                // the catalog filter skips it (§6).
                if let Some(kv) = anns.get(annotations::KERNEL_VERSION) {
                    kernel_versions.push(kv.clone());
                }
            }
            packages.push(Package {
                manifest_count: index.manifests().len(),
                kernel_versions,
                reference,
            });
        }
        Ok(packages)
    }

    /// Issues a catalog API call (`GET /v2/_catalog`) against `registry`,
    /// then fetches each entry's manifest head to build a `Package`.
    pub async fn remote_catalog(&self, registry: &str) -> Result<Vec<Package>> {
        let repositories = self.transport.list_repositories(registry).await?;
        let mut packages = Vec::new();
        for repository in repositories {
            let reference = Reference {
                registry: registry.to_string(),
                repository,
                version: crate::reference::Version::Tag(crate::reference::DEFAULT_TAG.to_string()),
            };
            if let Ok((bytes, _)) = self.transport.get_manifest(&reference, reference.tag().unwrap()).await {
                if let Ok(index) = serde_json::from_slice::<crate::oci::ImageIndex>(&bytes) {
                    packages.push(Package {
                        manifest_count: index.manifests().len(),
                        kernel_versions: Vec::new(),
                        reference,
                    });
                    continue;
                }
            }
            packages.push(Package {
                reference,
                manifest_count: 0,
                kernel_versions: Vec::new(),
            });
        }
        Ok(packages)
    }

    /// Registry compatibility test (§4.5): a source is usable when any of
    /// (a) it resolves to a local image, (b) it's an OCI-distribution-spec
    /// registry responding to ping, (c) a head/config call returns a config
    /// document.
    pub async fn compatibility(&self, handler: &dyn Handler, source: &str) -> Option<CompatibilityMode> {
        if let Ok(reference) = Reference::parse(source, None, &self.host_config.default_registry) {
            if handler.resolve_index(&reference).await.is_ok() {
                return Some(CompatibilityMode::Local);
            }
            if self.transport.ping(&reference.registry).await.unwrap_or(false) {
                return Some(CompatibilityMode::DistributionRegistry);
            }
            if let Some(digest) = reference.digest() {
                if self.transport.blob_exists(&reference, digest).await.unwrap_or(false) {
                    return Some(CompatibilityMode::ConfigDocument);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_query_filters_by_name_and_version() {
        let reference =
            Reference::parse("registry.local/hello:v1", None, crate::reference::DEFAULT_REGISTRY).unwrap();
        let q = CatalogQuery {
            name: Some("hello".into()),
            version: Some("v1".into()),
        };
        assert!(q.matches(&reference));

        let q = CatalogQuery {
            name: Some("other".into()),
            version: None,
        };
        assert!(!q.matches(&reference));
    }
}
