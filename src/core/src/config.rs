use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Model mirror configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Name of the first archive entry, holding the JSON metadata
    pub metadata_file: String,

    /// Archive-relative prefix for every non-metadata entry
    pub content_directory: String,

    /// Identity recorded as `exporter` in metadata (defaults to the acting user)
    pub exporter_identity: Option<String>,

    /// Configured AV scanners. Empty means no scanner is configured.
    pub scanners: Vec<String>,

    pub export: ExportConfig,
    pub import: ImportConfig,
    pub archive: ArchiveConfig,
    pub registry: RegistryConfig,
    pub queue: QueueConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            metadata_file: "mirror-metadata.json".to_string(),
            content_directory: "mirror-content".to_string(),
            exporter_identity: None,
            scanners: Vec::new(),
            export: ExportConfig::default(),
            import: ImportConfig::default(),
            archive: ArchiveConfig::default(),
            registry: RegistryConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Load configuration from a YAML file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::internal(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: MirrorConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.metadata_file.trim().is_empty() {
            return Err(MirrorError::bad_request("metadata_file must not be empty"));
        }
        if self.content_directory.trim().is_empty() || self.content_directory.contains("..") {
            return Err(MirrorError::bad_request(format!(
                "Invalid content_directory '{}'",
                self.content_directory
            )));
        }
        if self.archive.entry_chunk_size == 0 || self.archive.gzip_chunk_size == 0 {
            return Err(MirrorError::bad_request("archive chunk sizes must be non-zero"));
        }
        if self.queue.export_concurrency == 0 || self.queue.transfer_concurrency == 0 {
            return Err(MirrorError::bad_request("queue concurrency must be non-zero"));
        }
        Ok(())
    }

    /// Whether any AV scanner is configured.
    pub fn scanning_enabled(&self) -> bool {
        !self.scanners.is_empty()
    }

    /// Archive path of a content entry.
    pub fn content_path(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.content_directory.trim_end_matches('/'),
            name.trim_start_matches('/')
        )
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Object storage bucket receiving export archives
    pub bucket: String,

    /// Maximum aggregate size in bytes of all files referenced by an export
    pub max_size: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            bucket: "exports".to_string(),
            max_size: 100 * GIB,
        }
    }
}

/// Import configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    /// Bucket receiving imported file content
    pub uploads_bucket: String,

    /// Largest metadata entry accepted
    pub max_metadata_size: u64,

    /// Largest JSON document entry (model card, release, file, manifest) accepted
    pub max_document_size: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            uploads_bucket: "uploads".to_string(),
            max_metadata_size: MIB,
            max_document_size: 4 * MIB,
        }
    }
}

/// Archive stream tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Size of the chunks the gzip stage emits
    pub gzip_chunk_size: usize,

    /// Size of the chunks an entry body is read in
    pub entry_chunk_size: usize,

    /// Bounded channel capacity between pipeline stages
    pub channel_capacity: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            gzip_chunk_size: MIB as usize,
            entry_chunk_size: 64 * KIB as usize,
            channel_capacity: 8,
        }
    }
}

/// Container registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL of the registry HTTP API (e.g. "https://registry.internal:5000")
    pub url: String,

    /// Domain used in distribution package names (e.g. "registry.internal:5000")
    pub domain: String,

    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
            domain: "localhost:5000".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Concurrent documents exports
    pub export_concurrency: usize,

    /// Concurrent per-file and per-image exports
    pub transfer_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            export_concurrency: 2,
            transfer_concurrency: 4,
        }
    }
}
