//! Host configuration: per-registry credentials and TLS policy (§4.6).
//!
//! Grounded on the teacher's `Config::new()` (env-var loading pattern) and
//! `RegistryConfig` (per-registry shape), generalised from "one registry"
//! to "a table of registries with a credential-store fallback chain".

use crate::error::Result;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Credentials and TLS policy for one registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    pub user: Option<String>,
    pub token: Option<String>,
    pub verify_tls: bool,
}

/// Process-wide configuration, passed explicitly through the Packager and
/// Resolver rather than read from global state (§9: "Global singletons").
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub default_registry: String,
    registries: HashMap<String, RegistryAuth>,
    containerd_namespace: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            default_registry: crate::reference::DEFAULT_REGISTRY.to_string(),
            registries: HashMap::new(),
            containerd_namespace: "default".to_string(),
        }
    }
}

impl HostConfig {
    /// Build a config from explicit registry credentials plus environment.
    pub fn new(registries: HashMap<String, RegistryAuth>) -> Self {
        let mut cfg = Self {
            registries,
            ..Self::default()
        };
        cfg.containerd_namespace =
            env::var("CONTAINERD_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        cfg
    }

    /// Load from environment plus the Docker-compatible credential-store
    /// fallback chain: `$HOME/.docker/config.json`, then
    /// `$DOCKER_CONFIG/config.json`, then
    /// `$XDG_RUNTIME_DIR/containers/auth.json`.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::new(HashMap::new());
        for path in docker_config_candidates() {
            if let Ok(store) = load_credential_store(&path) {
                for (registry, auth) in store {
                    cfg.registries.entry(registry).or_insert(auth);
                }
            }
        }
        Ok(cfg)
    }

    /// Lookup order (§4.6): explicit configuration first, then whatever the
    /// credential-store fallback chain populated.
    pub fn auth_for(&self, registry: &str) -> RegistryAuth {
        self.registries.get(registry).cloned().unwrap_or_default()
    }

    pub fn set_auth(&mut self, registry: impl Into<String>, auth: RegistryAuth) {
        self.registries.insert(registry.into(), auth);
    }

    pub fn containerd_namespace(&self) -> &str {
        &self.containerd_namespace
    }
}

fn docker_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(home) = env::var("HOME") {
        candidates.push(Path::new(&home).join(".docker").join("config.json"));
    }
    if let Ok(docker_config) = env::var("DOCKER_CONFIG") {
        candidates.push(Path::new(&docker_config).join("config.json"));
    }
    if let Ok(xdg_runtime) = env::var("XDG_RUNTIME_DIR") {
        candidates.push(Path::new(&xdg_runtime).join("containers").join("auth.json"));
    }
    candidates
}

#[derive(Debug, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    auth: Option<String>,
}

fn load_credential_store(path: &Path) -> Result<HashMap<String, RegistryAuth>> {
    let bytes = std::fs::read(path)?;
    let file: DockerConfigFile = serde_json::from_slice(&bytes)?;
    let mut out = HashMap::new();
    for (registry, entry) in file.auths {
        let Some(encoded) = entry.auth else { continue };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
            continue;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            continue;
        };
        let (user, password) = match decoded.split_once(':') {
            Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
            None => (Some(decoded), None),
        };
        out.insert(
            registry,
            RegistryAuth {
                user,
                token: password,
                verify_tls: true,
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_used_when_unconfigured() {
        let cfg = HostConfig::default();
        let auth = cfg.auth_for("registry.local");
        assert!(auth.user.is_none());
        assert!(auth.verify_tls == false);
    }

    #[test]
    fn explicit_auth_overrides_default() {
        let mut cfg = HostConfig::default();
        cfg.set_auth(
            "registry.local",
            RegistryAuth {
                user: Some("alice".into()),
                token: Some("secret".into()),
                verify_tls: true,
            },
        );
        let auth = cfg.auth_for("registry.local");
        assert_eq!(auth.user.as_deref(), Some("alice"));
        assert!(auth.verify_tls);
    }

    #[test]
    fn docker_config_decodes_basic_auth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:hunter2");
        std::fs::write(
            &path,
            format!(r#"{{"auths":{{"registry.local":{{"auth":"{encoded}"}}}}}}"#),
        )
        .unwrap();
        let store = load_credential_store(&path).unwrap();
        let auth = store.get("registry.local").unwrap();
        assert_eq!(auth.user.as_deref(), Some("alice"));
        assert_eq!(auth.token.as_deref(), Some("hunter2"));
    }
}
