//! Registry session: HTTP client, credentials and the auth state machine
//!
//! One [`RegistryClient`] is owned by one push invocation. The bearer token
//! obtained from the first challenge is cached here and reused for every
//! later request in the same push, so the token exchange happens once per
//! session in the common case.

use crate::error::{PushError, Result};
use crate::logging::Logger;
use crate::manifest::ImageManifest;
use crate::registry::auth::{self, BearerChallenge};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use std::sync::{Arc, Mutex};

/// Registry credentials, sent as Basic auth until a bearer token is cached.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Normalize a registry endpoint: default the scheme to `https://` and strip
/// any trailing slash.
pub fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim_end_matches('/');
    let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    };
    url::Url::parse(&endpoint)?;
    Ok(endpoint)
}

pub struct RegistryClient {
    endpoint: String,
    credentials: Credentials,
    client: reqwest::Client,
    token: Mutex<Option<String>>,
    logger: Arc<dyn Logger>,
}

impl RegistryClient {
    pub fn new(
        endpoint: &str,
        credentials: Credentials,
        insecure_tls: bool,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;

        Ok(Self {
            endpoint: normalize_endpoint(endpoint)?,
            credentials,
            client,
            token: Mutex::new(None),
            logger,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issue a request through the auth negotiation state machine.
    ///
    /// The first attempt carries the cached bearer token, or Basic
    /// credentials when none is cached. A 401 with a parseable Bearer
    /// challenge triggers exactly one token exchange followed by exactly one
    /// retry; a 401 on the retry is a hard authentication failure. A 401
    /// without a negotiable challenge, and every non-401 response, stand
    /// unchanged for the call site to interpret.
    pub(crate) async fn execute<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = self.authorize(build(&self.client)).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerChallenge::parse)
        else {
            return Ok(response);
        };

        self.logger.debug(&format!(
            "auth challenge: realm={}, service={}, scope={}",
            challenge.realm,
            challenge.service,
            challenge.scope.as_deref().unwrap_or("-")
        ));

        let token = auth::request_token(
            &self.client,
            &challenge,
            &self.credentials.username,
            &self.credentials.password,
        )
        .await?;
        *self.token.lock().unwrap() = Some(token.clone());

        let response = build(&self.client).bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(PushError::Auth(format!(
                "registry rejected exchanged token at {}",
                response.url()
            )));
        }
        Ok(response)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.lock().unwrap().as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request.basic_auth(&self.credentials.username, Some(&self.credentials.password)),
        }
    }

    /// HEAD the blob digest under the destination repository.
    ///
    /// 200 means the blob is already present and the upload can be skipped;
    /// 404 means it must be uploaded.
    pub async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool> {
        let url = format!("{}/v2/{}/blobs/{}", self.endpoint, repository, digest);
        self.logger.debug(&format!("HEAD {}", url));

        let response = self.execute(|client| client.head(&url)).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(PushError::unexpected_status(
                status.as_u16(),
                &url,
                String::new(),
            )),
        }
    }

    /// Open a blob upload session, returning the first upload URL.
    pub async fn start_upload(&self, repository: &str) -> Result<String> {
        let url = format!("{}/v2/{}/blobs/uploads/", self.endpoint, repository);
        self.logger.debug(&format!("POST {}", url));

        let response = self.execute(|client| client.post(&url)).await?;
        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::unexpected_status(status.as_u16(), &url, body));
        }

        match response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
            Some(location) => self.resolve_location(location),
            None => Err(PushError::unexpected_status(
                status.as_u16(),
                &url,
                "Location header is missing in response".to_string(),
            )),
        }
    }

    /// Resolve a possibly path-relative upload `Location` against the
    /// registry endpoint.
    pub(crate) fn resolve_location(&self, location: &str) -> Result<String> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(location.to_string());
        }
        let base = url::Url::parse(&self.endpoint)?;
        Ok(base.join(location)?.to_string())
    }

    /// Publish the Schema2 manifest under `repository:tag`. Success is 201.
    pub async fn put_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &ImageManifest,
    ) -> Result<()> {
        let url = format!("{}/v2/{}/manifests/{}", self.endpoint, repository, tag);
        let body = serde_json::to_vec(manifest)?;
        self.logger.debug(&format!("PUT {}", url));

        let response = self
            .execute(|client| {
                client
                    .put(&url)
                    .header(CONTENT_TYPE, &manifest.media_type)
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::unexpected_status(status.as_u16(), &url, body));
        }
        Ok(())
    }
}
