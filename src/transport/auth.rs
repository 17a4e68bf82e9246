//! Bearer-token challenge/response (§4.6).
//!
//! Grounded on the teacher's `registry/auth.rs` (`parse_auth_challenge`,
//! `handle_bearer_auth`): parse a `WWW-Authenticate: Bearer realm="...",
//! service="...",scope="..."` header, then request a token from the named
//! realm with HTTP basic auth.

use crate::config::RegistryAuth;
use crate::error::{OciPkgError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: String,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Parse `Bearer realm="...",service="...",scope="..."`.
pub fn parse_challenge(header: &str) -> Result<BearerChallenge> {
    let params = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| OciPkgError::AuthRequired("not a Bearer challenge".into()))?;

    let mut realm = String::new();
    let mut service = String::new();
    let mut scope = None;
    for param in params.split(',') {
        let param = param.trim();
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "realm" => realm = value.to_string(),
            "service" => service = value.to_string(),
            "scope" => scope = Some(value.to_string()),
            _ => {}
        }
    }

    if realm.is_empty() {
        return Err(OciPkgError::AuthRequired(format!(
            "malformed Bearer challenge: {header}"
        )));
    }
    Ok(BearerChallenge {
        realm,
        service,
        scope,
    })
}

/// Request a token from the realm named by `challenge`, scoped to
/// `scope_override` when the caller needs a narrower scope than the
/// server's own challenge offered (e.g. push access to one repository).
pub async fn request_token(
    client: &reqwest::Client,
    challenge: &BearerChallenge,
    auth: &RegistryAuth,
    scope_override: Option<&str>,
) -> Result<Option<String>> {
    let scope = scope_override.or(challenge.scope.as_deref());
    let mut req = client
        .get(&challenge.realm)
        .query(&[("service", challenge.service.as_str())]);
    if let Some(scope) = scope {
        req = req.query(&[("scope", scope)]);
    }
    if let (Some(user), Some(pass)) = (&auth.user, &auth.token) {
        req = req.basic_auth(user, Some(pass));
    }

    let response = req.send().await?;
    if !response.status().is_success() {
        return Err(OciPkgError::AuthDenied(format!(
            "token request to {} failed: {}",
            challenge.realm,
            response.status()
        )));
    }
    let body: TokenResponse = response.json().await.map_err(|e| {
        OciPkgError::AuthDenied(format!("malformed token response: {e}"))
    })?;
    Ok(body.token.or(body.access_token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_challenge() {
        let header =
            r#"Bearer realm="https://auth.example/token",service="registry.example",scope="repository:foo:pull""#;
        let c = parse_challenge(header).unwrap();
        assert_eq!(c.realm, "https://auth.example/token");
        assert_eq!(c.service, "registry.example");
        assert_eq!(c.scope.as_deref(), Some("repository:foo:pull"));
    }

    #[test]
    fn rejects_non_bearer() {
        assert!(parse_challenge("Basic realm=\"x\"").is_err());
    }
}
