//! Authenticated HTTP transport for the OCI Distribution Spec v1 wire
//! protocol (§4.6, §6).
//!
//! Grounded on the teacher's `registry/client.rs` / `registry/auth.rs`
//! (per-registry `reqwest::Client`, bearer-challenge handling). Each
//! registry gets its own `reqwest::Client` so a `verify_tls=false` entry
//! never leaks `danger_accept_invalid_certs` to another registry (§4.6,
//! tested by S6).

pub mod auth;

use crate::config::HostConfig;
use crate::digest::Digest;
use crate::error::{OciPkgError, Result};
use crate::reference::Reference;
use std::collections::HashMap;
use tokio::sync::Mutex;

pub struct Transport {
    host_config: HostConfig,
    clients: Mutex<HashMap<String, reqwest::Client>>,
    tokens: Mutex<HashMap<(String, String), String>>,
}

impl Transport {
    pub fn new(host_config: HostConfig) -> Self {
        Self {
            host_config,
            clients: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, registry: &str) -> Result<reqwest::Client> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(registry) {
            return Ok(client.clone());
        }
        let auth = self.host_config.auth_for(registry);
        let builder = if auth.verify_tls {
            reqwest::Client::builder()
        } else {
            reqwest::Client::builder().danger_accept_invalid_certs(true)
        };
        let client = builder
            .build()
            .map_err(|e| OciPkgError::NetworkError(format!("building client for {registry}: {e}")))?;
        clients.insert(registry.to_string(), client.clone());
        Ok(client)
    }

    fn base_url(&self, registry: &str) -> String {
        if registry.starts_with("http://") || registry.starts_with("https://") {
            registry.trim_end_matches('/').to_string()
        } else if registry == "localhost" || registry.starts_with("localhost:") {
            format!("http://{registry}")
        } else {
            format!("https://{registry}")
        }
    }

    /// Per-(registry, scope) bearer token, fetched on first use and cached
    /// thereafter (§4.6).
    async fn token_for(&self, registry: &str, scope: &str, challenge_hint: Option<&str>) -> Result<Option<String>> {
        {
            let tokens = self.tokens.lock().await;
            if let Some(token) = tokens.get(&(registry.to_string(), scope.to_string())) {
                return Ok(Some(token.clone()));
            }
        }
        let Some(header) = challenge_hint else {
            return Ok(None);
        };
        let challenge = auth::parse_challenge(header)?;
        let client = self.client_for(registry).await?;
        let registry_auth = self.host_config.auth_for(registry);
        let token = auth::request_token(&client, &challenge, &registry_auth, Some(scope)).await?;
        if let Some(token) = &token {
            let mut tokens = self.tokens.lock().await;
            tokens.insert((registry.to_string(), scope.to_string()), token.clone());
        }
        Ok(token)
    }

    fn scope_for(repository: &str) -> String {
        format!("repository:{repository}:pull,push")
    }

    async fn authorized_request(
        &self,
        reference: &Reference,
        build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let client = self.client_for(&reference.registry).await?;
        let scope = Self::scope_for(&reference.repository);

        let token = self.token_for(&reference.registry, &scope, None).await?;
        let mut req = build(&client);
        if let Some(token) = &token {
            req = req.bearer_auth(token);
        }
        let response = req
            .try_clone()
            .ok_or_else(|| OciPkgError::NetworkError("non-clonable request".into()))?
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            if let Some(header) = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
            {
                let token = self.token_for(&reference.registry, &scope, Some(&header)).await?;
                let mut retry = build(&client);
                if let Some(token) = &token {
                    retry = retry.bearer_auth(token);
                }
                return Ok(retry.send().await?);
            }
        }
        Ok(response)
    }

    /// `GET /v2/<repo>/manifests/<reference>`. Returns raw body and
    /// `Content-Type`.
    pub async fn get_manifest(&self, reference: &Reference, tag_or_digest: &str) -> Result<(Vec<u8>, String)> {
        let base = self.base_url(&reference.registry);
        let url = format!("{base}/v2/{}/manifests/{tag_or_digest}", reference.repository);
        let response = self
            .authorized_request(reference, |c| {
                c.get(&url).header(
                    reqwest::header::ACCEPT,
                    "application/vnd.oci.image.index.v1+json, application/vnd.oci.image.manifest.v1+json",
                )
            })
            .await?;
        if !response.status().is_success() {
            return Err(OciPkgError::NetworkError(format!(
                "GET manifest {url} failed: {}",
                response.status()
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok((bytes, content_type))
    }

    /// `GET /v2/<repo>/blobs/<digest>`.
    pub async fn get_blob(&self, reference: &Reference, digest: &Digest) -> Result<Vec<u8>> {
        let base = self.base_url(&reference.registry);
        let url = format!("{base}/v2/{}/blobs/{digest}", reference.repository);
        let response = self.authorized_request(reference, |c| c.get(&url)).await?;
        if !response.status().is_success() {
            return Err(OciPkgError::NetworkError(format!(
                "GET blob {url} failed: {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?.to_vec();
        digest.verify(&bytes)?;
        Ok(bytes)
    }

    /// `HEAD /v2/<repo>/blobs/<digest>`.
    pub async fn blob_exists(&self, reference: &Reference, digest: &Digest) -> Result<bool> {
        let base = self.base_url(&reference.registry);
        let url = format!("{base}/v2/{}/blobs/{digest}", reference.repository);
        let response = self.authorized_request(reference, |c| c.head(&url)).await?;
        Ok(response.status().is_success())
    }

    /// Monolithic blob upload: `POST` to start, then `PUT` with the digest.
    pub async fn put_blob(&self, reference: &Reference, digest: &Digest, data: &[u8]) -> Result<()> {
        if self.blob_exists(reference, digest).await.unwrap_or(false) {
            return Ok(());
        }
        let base = self.base_url(&reference.registry);
        let start_url = format!("{base}/v2/{}/blobs/uploads/", reference.repository);
        let start = self.authorized_request(reference, |c| c.post(&start_url)).await?;
        if !start.status().is_success() {
            return Err(OciPkgError::NetworkError(format!(
                "starting blob upload to {start_url} failed: {}",
                start.status()
            )));
        }
        let location = start
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| OciPkgError::NetworkError("upload response missing Location".into()))?
            .to_string();
        let sep = if location.contains('?') { '&' } else { '?' };
        let put_url = format!("{location}{sep}digest={digest}");
        let body = data.to_vec();
        let response = self
            .authorized_request(reference, |c| {
                c.put(&put_url)
                    .header(reqwest::header::CONTENT_LENGTH, body.len())
                    .body(body.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(OciPkgError::NetworkError(format!(
                "PUT blob {put_url} failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// `PUT /v2/<repo>/manifests/<reference>`.
    pub async fn put_manifest(
        &self,
        reference: &Reference,
        tag_or_digest: &str,
        media_type: &str,
        data: &[u8],
    ) -> Result<()> {
        let base = self.base_url(&reference.registry);
        let url = format!("{base}/v2/{}/manifests/{tag_or_digest}", reference.repository);
        let body = data.to_vec();
        let media_type = media_type.to_string();
        let response = self
            .authorized_request(reference, |c| {
                c.put(&url)
                    .header(reqwest::header::CONTENT_TYPE, media_type.clone())
                    .body(body.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(OciPkgError::NetworkError(format!(
                "PUT manifest {url} failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// `GET /v2/` — an OCI-distribution-spec registry responds 200/401.
    pub async fn ping(&self, registry: &str) -> Result<bool> {
        let client = self.client_for(registry).await?;
        let base = self.base_url(registry);
        let response = client.get(format!("{base}/v2/")).send().await?;
        Ok(response.status().is_success() || response.status() == reqwest::StatusCode::UNAUTHORIZED)
    }

    /// `GET /v2/_catalog` — the distribution-spec repository enumeration
    /// call used to build the remote catalog (§4.5).
    pub async fn list_repositories(&self, registry: &str) -> Result<Vec<String>> {
        let client = self.client_for(registry).await?;
        let base = self.base_url(registry);
        let response = client.get(format!("{base}/v2/_catalog")).send().await?;
        if !response.status().is_success() {
            return Err(OciPkgError::NetworkError(format!(
                "GET {base}/v2/_catalog failed: {}",
                response.status()
            )));
        }
        #[derive(serde::Deserialize)]
        struct CatalogResponse {
            repositories: Vec<String>,
        }
        let body: CatalogResponse = response.json().await?;
        Ok(body.repositories)
    }
}
