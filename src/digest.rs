//! Streaming SHA-256 digest computation
//!
//! Registry blobs are content-addressed by `sha256:<hex>`; everything pushed
//! or checked for existence goes through the helpers here.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// SHA-256 of zero bytes, the digest of an empty layer.
pub const EMPTY_SHA256_HEX: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Prefix a lowercase hex hash with the algorithm name.
pub fn format_digest(hex: &str) -> String {
    format!("sha256:{}", hex)
}

/// Compute the SHA-256 of a byte slice as lowercase hex.
pub fn bytes_sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 of a file's contents as lowercase hex.
///
/// Reads in 64 KiB chunks so arbitrarily large layers never land in memory
/// at once.
pub fn file_sha256_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Content-addressed reference to a local blob, as embedded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobDescriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

impl BlobDescriptor {
    /// Hash and size a local file into a descriptor. The descriptor is
    /// immutable once computed.
    pub fn from_file(path: &Path, media_type: &str) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let digest = format_digest(&file_sha256_hex(path)?);
        Ok(Self {
            media_type: media_type.to_string(),
            size,
            digest,
        })
    }
}
