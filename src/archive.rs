//! Archive extraction into a per-push scratch directory
//!
//! Docker `save` produces plain tar archives; some toolchains wrap them in
//! gzip. [`extract_archive`] tries tar first and falls back to gzip-then-tar,
//! matching what `docker load` accepts. The scratch directory is owned by a
//! [`ScratchDir`] guard so it is removed on every exit path.

use crate::error::{PushError, Result};
use crate::logging::Logger;
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Scratch directory unique to one archive-extraction attempt.
///
/// Keyed by a nanosecond timestamp so concurrent pushes never collide.
/// Removed recursively on drop; a cleanup failure is reported through the
/// sink, never panicked on.
pub struct ScratchDir {
    path: PathBuf,
    logger: Arc<dyn Logger>,
}

impl ScratchDir {
    pub fn create(logger: Arc<dyn Logger>) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let path = std::env::temp_dir()
            .join("docker-tar-push")
            .join(nanos.to_string());
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, logger })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            self.logger.error(&format!(
                "remove tmp dir {} error, {}",
                self.path.display(),
                err
            ));
        }
    }
}

/// Unpack `archive` into `dest`, preserving its internal directory structure.
///
/// Attempts plain tar first; on failure re-opens the file and tries
/// gzip-wrapped tar into the same directory.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    match unpack_tar(archive, dest) {
        Ok(()) => Ok(()),
        Err(tar_err) => unpack_tar_gz(archive, dest).map_err(|gz_err| {
            PushError::Extraction(format!(
                "{} is neither tar ({}) nor gzipped tar ({})",
                archive.display(),
                tar_err,
                gz_err
            ))
        }),
    }
}

fn unpack_tar(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(file);
    tar.set_ignore_zeros(true);
    tar.unpack(dest)
}

fn unpack_tar_gz(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.set_ignore_zeros(true);
    tar.unpack(dest)
}
