//! Push orchestration
//!
//! [`ImagePusher`] sequences one push invocation: resolve the input path to
//! archive files, and for each file extract it, parse its manifest and push
//! every declared repo tag (layers, then config, then manifest). The engine
//! is strictly sequential; concurrency exists only at the boundary via
//! [`ImagePusher::spawn`].

use crate::archive::{ScratchDir, extract_archive};
use crate::digest::{file_sha256_hex, format_digest};
use crate::error::{PushError, Result};
use crate::logging::{Logger, null_logger};
use crate::manifest::{
    ArchiveManifestEntry, ImageManifest, join_repository, read_archive_manifest, repo_base_name,
    split_repo_tag,
};
use crate::registry::{Credentials, RegistryClient};
use crate::upload::ChunkedUploader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag, polled between major push steps.
///
/// Cloning shares the flag, so a caller can keep one end and hand the other
/// to the pusher.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One push invocation: an archive path pushed to one registry.
pub struct ImagePusher {
    archive_path: PathBuf,
    registry_endpoint: String,
    image_prefix: String,
    credentials: Credentials,
    insecure_tls: bool,
    logger: Arc<dyn Logger>,
    cancel: CancelHandle,
}

impl ImagePusher {
    pub fn new(
        archive_path: impl Into<PathBuf>,
        registry_endpoint: &str,
        image_prefix: &str,
        username: &str,
        password: &str,
        insecure_tls: bool,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            registry_endpoint: registry_endpoint.to_string(),
            image_prefix: image_prefix.to_string(),
            credentials: Credentials {
                username: username.to_string(),
                password: password.to_string(),
            },
            insecure_tls,
            logger: null_logger(),
            cancel: CancelHandle::new(),
        }
    }

    /// Install the caller's log sink. Defaults to a sink that drops
    /// everything.
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Push the archive (or every archive file under a directory) and return
    /// once all of them are processed or aborted.
    ///
    /// Each archive file is attempted independently; failures are logged
    /// with their file context and the first one is returned after the loop.
    pub async fn push(&self) -> Result<()> {
        let files = resolve_archive_files(&self.archive_path)?;
        let client = RegistryClient::new(
            &self.registry_endpoint,
            self.credentials.clone(),
            self.insecure_tls,
            self.logger.clone(),
        )?;

        let mut first_error = None;
        for file in files {
            if let Err(err) = self.push_archive_file(&client, &file).await {
                self.logger
                    .error(&format!("push {} failed, {}", file.display(), err));
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run the push as a background task, returning a cancellable handle.
    pub fn spawn(self) -> PushTask {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move { self.push().await });
        PushTask { cancel, handle }
    }

    async fn push_archive_file(&self, client: &RegistryClient, file: &Path) -> Result<()> {
        self.check_cancelled()?;

        let scratch = ScratchDir::create(self.logger.clone())?;
        self.logger.info(&format!(
            "extract archive file {} to {}",
            file.display(),
            scratch.path().display()
        ));
        extract_archive(file, scratch.path())?;

        let entries = read_archive_manifest(scratch.path())?;
        for entry in &entries {
            self.logger
                .info(&format!("start push image archive {}", file.display()));
            for repo_tag in &entry.repo_tags {
                let (name, tag) = split_repo_tag(repo_tag);
                let repository = join_repository(&self.image_prefix, repo_base_name(name));
                self.logger
                    .debug(&format!("image={}, tag={}", repository, tag));
                self.push_tag(client, scratch.path(), entry, &repository, tag)
                    .await?;
            }
        }

        self.logger
            .info(&format!("push image archive {} done", file.display()));
        Ok(())
    }

    /// Push one image under one destination tag: every layer, the config
    /// blob, then the manifest.
    ///
    /// Layer and config failures abort the remainder of the archive file;
    /// a manifest-publish failure is logged and the tag loop continues.
    async fn push_tag(
        &self,
        client: &RegistryClient,
        root: &Path,
        entry: &ArchiveManifestEntry,
        repository: &str,
        tag: &str,
    ) -> Result<()> {
        for layer in &entry.layers {
            self.check_cancelled()?;
            self.push_blob(client, repository, &root.join(layer), layer)
                .await?;
        }

        self.check_cancelled()?;
        let config_path = root.join(&entry.config);
        self.push_blob(client, repository, &config_path, &entry.config)
            .await?;

        self.check_cancelled()?;
        self.logger.info("start push manifest");
        let layer_paths: Vec<PathBuf> = entry.layers.iter().map(|l| root.join(l)).collect();
        let layer_refs: Vec<&Path> = layer_paths.iter().map(PathBuf::as_path).collect();
        let manifest = ImageManifest::from_files(&config_path, &layer_refs)?;

        match client.put_manifest(repository, tag, &manifest).await {
            Ok(()) => self.logger.info("push manifest done"),
            Err(err) => self
                .logger
                .error(&format!("push manifest error for {}:{}, {}", repository, tag, err)),
        }
        Ok(())
    }

    /// Push one local file as a blob: skip when the digest already exists at
    /// the destination, upload in chunks otherwise.
    async fn push_blob(
        &self,
        client: &RegistryClient,
        repository: &str,
        path: &Path,
        label: &str,
    ) -> Result<()> {
        let digest = format_digest(&file_sha256_hex(path)?);
        if client.blob_exists(repository, &digest).await? {
            self.logger.info(&format!("{} already exists", label));
            return Ok(());
        }

        self.logger.info(&format!("start push {}", label));
        ChunkedUploader::new(client, self.logger.clone())
            .upload_file(repository, path)
            .await?;
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(PushError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handle to a push running as a background task.
pub struct PushTask {
    cancel: CancelHandle,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl PushTask {
    /// Request cooperative cancellation; the push observes it before its
    /// next layer/config/manifest step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the push to finish and return its result.
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(PushError::Cancelled),
            Err(err) => Err(PushError::Io(std::io::Error::other(err))),
        }
    }
}

/// Resolve the input path to the archive files to process: a directory
/// yields each regular file inside, sorted for a stable order.
fn resolve_archive_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(PushError::Extraction(format!(
            "{} not exists",
            path.display()
        )));
    }

    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
