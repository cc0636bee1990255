//! Shared fixtures for the push-flow integration tests.

pub mod registry;

use docker_tar_push::logging::Logger;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type MessageHook = Box<dyn Fn(&str) + Send + Sync>;

/// Log sink that records every line and optionally reacts to messages, used
/// to observe scratch-dir paths and to trigger cancellation mid-push.
pub struct TestLogger {
    lines: Mutex<Vec<String>>,
    hook: Option<MessageHook>,
}

impl TestLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
            hook: None,
        })
    }

    pub fn with_hook(hook: impl Fn(&str) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
            hook: Some(Box::new(hook)),
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Scratch directories announced by "extract archive file X to Y" lines.
    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        self.lines()
            .iter()
            .filter(|line| line.contains("extract archive file"))
            .filter_map(|line| line.split(" to ").nth(1))
            .map(PathBuf::from)
            .collect()
    }

    fn record(&self, level: &str, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{} {}", level, message));
        if let Some(hook) = &self.hook {
            hook(message);
        }
    }
}

impl Logger for TestLogger {
    fn error(&self, message: &str) {
        self.record("ERROR", message);
    }

    fn info(&self, message: &str) {
        self.record("INFO", message);
    }

    fn debug(&self, message: &str) {
        self.record("DEBUG", message);
    }
}

/// Write a Docker-export-style archive: layer files, a config file and the
/// manifest.json tying them together.
pub fn build_image_archive(
    path: &Path,
    repo_tags: &[&str],
    layers: &[Vec<u8>],
    config: &[u8],
) {
    let mut builder = tar::Builder::new(Vec::new());

    let mut layer_names = Vec::new();
    for (index, data) in layers.iter().enumerate() {
        let name = format!("layer{}/layer.tar", index);
        append_file(&mut builder, &name, data);
        layer_names.push(name);
    }
    append_file(&mut builder, "config.json", config);

    let manifest = serde_json::json!([{
        "Config": "config.json",
        "RepoTags": repo_tags,
        "Layers": layer_names,
    }]);
    append_file(
        &mut builder,
        "manifest.json",
        &serde_json::to_vec(&manifest).unwrap(),
    );

    std::fs::write(path, builder.into_inner().unwrap()).unwrap();
}

fn append_file(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
}

pub fn sha256_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
