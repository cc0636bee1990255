//! Archive manifest parsing and Schema2 manifest assembly
//!
//! Covers both ends of the push: decoding the `manifest.json` a Docker
//! export places at the archive root, and building the
//! `application/vnd.docker.distribution.manifest.v2+json` document published
//! to the registry.

use crate::digest::BlobDescriptor;
use crate::error::{PushError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Media type of the published image manifest.
pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Media type of the image config blob.
pub const MEDIA_TYPE_IMAGE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// Media type of an uncompressed layer blob, as stored in the archive.
pub const MEDIA_TYPE_UNCOMPRESSED_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar";

const MANIFEST_SCHEMA_VERSION: u32 = 2;

/// One image baked into the archive, as declared by `manifest.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveManifestEntry {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "RepoTags")]
    pub repo_tags: Vec<String>,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

/// Read and decode `manifest.json` from the scratch directory root.
pub fn read_archive_manifest(dir: &Path) -> Result<Vec<ArchiveManifestEntry>> {
    let path = dir.join("manifest.json");
    let data = std::fs::read(&path)
        .map_err(|e| PushError::ManifestParse(format!("read {} failed, {}", path.display(), e)))?;
    serde_json::from_slice(&data)
        .map_err(|e| PushError::ManifestParse(format!("unmarshal {} failed, {}", path.display(), e)))
}

/// Schema2 image manifest, published per repository tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: BlobDescriptor,
    pub layers: Vec<BlobDescriptor>,
}

impl ImageManifest {
    /// Assemble a manifest from the local config and layer files, in the
    /// order the archive manifest declared them.
    pub fn from_files(config_path: &Path, layer_paths: &[&Path]) -> Result<Self> {
        let config = BlobDescriptor::from_file(config_path, MEDIA_TYPE_IMAGE_CONFIG)?;
        let layers = layer_paths
            .iter()
            .map(|path| BlobDescriptor::from_file(path, MEDIA_TYPE_UNCOMPRESSED_LAYER))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            media_type: MEDIA_TYPE_MANIFEST.to_string(),
            config,
            layers,
        })
    }
}

/// Split a `repo:tag` reference, defaulting the tag to `latest`.
///
/// The separator is the last `:` of the final path segment, so registry
/// ports (`registry.example:5000/app`) are not mistaken for tags.
pub fn split_repo_tag(repo_tag: &str) -> (&str, &str) {
    match repo_tag.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (repo_tag, "latest"),
    }
}

/// Keep only the final path segment of a repository name.
pub fn repo_base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Join the configured image prefix in front of a repository name.
pub fn join_repository(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}
