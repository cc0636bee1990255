//! Error types for the push engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PushError>;

#[derive(Debug, Error)]
pub enum PushError {
    /// Archive could not be unpacked as tar or gzip-wrapped tar
    #[error("extraction error: {0}")]
    Extraction(String),

    /// manifest.json missing, unreadable or malformed
    #[error("manifest parse error: {0}")]
    ManifestParse(String),

    /// Token exchange failed, or the registry rejected the exchanged token
    #[error("authentication error: {0}")]
    Auth(String),

    /// The registry answered with a status the protocol does not allow here
    #[error("unexpected status {status} from {url}{}", body_suffix(.body))]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: Option<String>,
    },

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The cancellation flag was observed between push steps
    #[error("push cancelled")]
    Cancelled,
}

impl PushError {
    /// Build an `UnexpectedStatus` from a drained response body, dropping
    /// empty bodies so messages stay on one line.
    pub fn unexpected_status(status: u16, url: impl Into<String>, body: String) -> Self {
        let body = body.trim();
        PushError::UnexpectedStatus {
            status,
            url: url.into(),
            body: if body.is_empty() {
                None
            } else {
                Some(body.to_string())
            },
        }
    }
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(body) => format!(": {}", body),
        None => String::new(),
    }
}
