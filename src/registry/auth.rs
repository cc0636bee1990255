//! Bearer challenge parsing and token exchange
//!
//! Registries answer unauthenticated writes with 401 and a
//! `WWW-Authenticate: Bearer realm="…",service="…",scope="…"` header. The
//! scope handed out in blob-read challenges is pull-only, so `,push` is
//! appended before the exchange or the upload that follows would be denied.

use crate::error::{PushError, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Parsed `WWW-Authenticate: Bearer …` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: String,
    /// Challenge scope with `,push` already appended; `None` when the
    /// challenge carried no scope.
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Returns `None` for non-Bearer challenges and for Bearer headers
    /// missing a realm; such responses are not negotiable and the original
    /// 401 stands.
    pub fn parse(header: &str) -> Option<Self> {
        let params_str = header.strip_prefix("Bearer ")?;

        let mut params = HashMap::new();
        for param in params_str.split(',') {
            let param = param.trim();
            if let Some((key, value)) = param.split_once('=') {
                params.insert(key.trim(), value.trim().trim_matches('"'));
            }
        }

        let realm = params.get("realm")?;
        let service = params.get("service").copied().unwrap_or_default();
        let scope = params
            .get("scope")
            .filter(|s| !s.is_empty())
            .map(|s| format!("{},push", s));

        Some(Self {
            realm: realm.to_string(),
            service: service.to_string(),
            scope,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Exchange credentials for a bearer token at the challenge realm.
///
/// Posts `username,password,service,scope` form-encoded; anything but a 200
/// carrying a non-empty `token` field is an authentication failure.
pub(crate) async fn request_token(
    client: &reqwest::Client,
    challenge: &BearerChallenge,
    username: &str,
    password: &str,
) -> Result<String> {
    let mut form = vec![
        ("username", username.to_string()),
        ("password", password.to_string()),
        ("service", challenge.service.clone()),
    ];
    if let Some(scope) = &challenge.scope {
        form.push(("scope", scope.clone()));
    }

    let response = client.post(&challenge.realm).form(&form).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PushError::Auth(format!(
            "token request to {} failed with status {}",
            challenge.realm, status
        )));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| PushError::Auth(format!("invalid token response from {}: {}", challenge.realm, e)))?;

    match token_response.token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(PushError::Auth(format!(
            "token is empty or missing in response from {}",
            challenge.realm
        ))),
    }
}
