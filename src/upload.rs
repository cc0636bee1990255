//! Resumable chunked blob upload
//!
//! Drives the registry's PATCH/PUT upload protocol: open a session, stream
//! the file in fixed-size chunks, adopt the server-returned `Location` after
//! every accepted chunk, and finalize with a digest-qualified PUT. The digest
//! asserted at the end is computed over the bytes actually transmitted, so it
//! always matches the uploaded content.

use crate::digest::format_digest;
use crate::error::{PushError, Result};
use crate::logging::Logger;
use crate::registry::RegistryClient;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Fixed upload chunk size.
pub const CHUNK_SIZE: usize = 2 * 1024 * 1024;

const OCTET_STREAM: &str = "application/octet-stream";

/// Upload state for one blob: the current session URL, the running byte
/// offset and the incremental digest. Discarded once the blob is confirmed.
struct UploadCursor {
    location: String,
    bytes_sent: u64,
    hasher: Sha256,
}

pub struct ChunkedUploader<'a> {
    client: &'a RegistryClient,
    logger: Arc<dyn Logger>,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(client: &'a RegistryClient, logger: Arc<dyn Logger>) -> Self {
        Self { client, logger }
    }

    /// Upload a local file as a blob of `repository`.
    ///
    /// Returns the `sha256:<hex>` digest the registry confirmed.
    pub async fn upload_file(&self, repository: &str, path: &Path) -> Result<String> {
        let total = std::fs::metadata(path)?.len();
        let mut file = File::open(path)?;

        let mut cursor = UploadCursor {
            location: self.client.start_upload(repository).await?,
            bytes_sent: 0,
            hasher: Sha256::new(),
        };
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let read = fill_chunk(&mut file, &mut buffer)?;
            let chunk_end = cursor.bytes_sent + read as u64;
            cursor.hasher.update(&buffer[..read]);

            if chunk_end == total {
                let digest = self.put_final_chunk(&mut cursor, &buffer[..read], total).await?;
                self.logger
                    .debug(&format!("{} uploaded as {}", path.display(), digest));
                return Ok(digest);
            }

            if read == 0 {
                // The file shrank underneath us; the session cannot be
                // completed with a truthful digest.
                return Err(PushError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "{}: expected {} bytes, got {}",
                        path.display(),
                        total,
                        cursor.bytes_sent
                    ),
                )));
            }

            self.patch_chunk(&mut cursor, &buffer[..read]).await?;
            self.logger.info(&format!(
                "pushing {} ... {:.2}%",
                path.display(),
                (cursor.bytes_sent as f64 / total as f64) * 100.0
            ));
        }
    }

    /// PATCH one intermediate chunk and adopt the returned `Location`.
    async fn patch_chunk(&self, cursor: &mut UploadCursor, chunk: &[u8]) -> Result<()> {
        let range = content_range(cursor.bytes_sent, chunk.len());
        let url = cursor.location.clone();
        let body = chunk.to_vec();
        self.logger.debug(&format!("PATCH {} ({})", url, range));

        let response = self
            .client
            .execute(|client| {
                client
                    .patch(&url)
                    .header(CONTENT_TYPE, OCTET_STREAM)
                    .header(CONTENT_RANGE, &range)
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match (status, location) {
            (StatusCode::ACCEPTED, Some(location)) => {
                cursor.location = self.client.resolve_location(&location)?;
                cursor.bytes_sent += chunk.len() as u64;
                Ok(())
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(PushError::unexpected_status(status.as_u16(), &url, body))
            }
        }
    }

    /// PUT the chunk that reaches end-of-file, asserting the final digest.
    async fn put_final_chunk(
        &self,
        cursor: &mut UploadCursor,
        chunk: &[u8],
        total: u64,
    ) -> Result<String> {
        let digest = format_digest(&hex::encode(std::mem::take(&mut cursor.hasher).finalize()));
        let separator = if cursor.location.contains('?') { '&' } else { '?' };
        let url = format!("{}{}digest={}", cursor.location, separator, digest);
        let range = content_range(cursor.bytes_sent, chunk.len());
        let body = chunk.to_vec();
        self.logger.debug(&format!("PUT {} ({})", url, range));

        let response = self
            .client
            .execute(|client| {
                client
                    .put(&url)
                    .header(CONTENT_TYPE, OCTET_STREAM)
                    .header(CONTENT_RANGE, &range)
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::unexpected_status(status.as_u16(), &url, body));
        }

        cursor.bytes_sent += chunk.len() as u64;
        debug_assert_eq!(cursor.bytes_sent, total);
        Ok(digest)
    }
}

/// `Content-Range` for a chunk starting at `start`: `<start>-<end>` where the
/// offsets partition `[0, file size)` contiguously.
fn content_range(start: u64, len: usize) -> String {
    format!("{}-{}", start, start + len as u64)
}

/// Read until `buffer` is full or the reader hits end-of-file, so every chunk
/// except the last carries exactly [`CHUNK_SIZE`] bytes.
fn fill_chunk(reader: &mut impl Read, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = reader.read(&mut buffer[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
