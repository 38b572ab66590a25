//! Governance documents moved by the mirror: models, model card revisions,
//! releases and file metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Acting user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Distinguished name
    pub dn: String,
}

impl User {
    pub fn new(dn: impl Into<String>) -> Self {
        Self { dn: dn.into() }
    }
}

/// A model as seen by the mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,

    /// Pointer to the latest model card revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<ModelCardPointer>,

    #[serde(default)]
    pub settings: ModelSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCardPointer {
    pub version: u32,
    pub schema_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    #[serde(default)]
    pub mirror: MirrorSettings,
}

/// Mirroring relationship configured by administrators on both deployments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSettings {
    /// Set on a destination model: the model it mirrors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_model_id: Option<String>,

    /// Set on a source model: the model it is exported to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_model_id: Option<String>,
}

/// One revision of a model card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCardRevision {
    pub model_id: String,
    pub version: u32,
    pub schema_id: String,
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Container image referenced by a release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    /// Registry repository, the owning model id
    pub repository: String,
    pub name: String,
    pub tag: String,
}

/// A release of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub model_id: String,
    pub semver: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub minor: bool,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// State of one AV scan of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanState {
    NotScanned,
    InProgress,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub tool_name: String,
    pub state: ScanState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_infected: Option<bool>,
}

/// Metadata of an uploaded file. Content lives in object storage at `bucket/path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub model_id: String,
    pub name: String,
    #[serde(default)]
    pub mime: String,
    pub size: u64,
    pub bucket: String,
    pub path: String,
    #[serde(default)]
    pub av_scan: Vec<ScanResult>,
}

/// Outcome of checking a file's scan results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Missing,
    Incomplete,
    Failed,
}

impl FileRecord {
    /// Classify the file's scan results. An empty result list is `Missing`,
    /// any scan not yet `Complete` is `Incomplete`, any infected or errored
    /// scan is `Failed`.
    pub fn scan_verdict(&self) -> ScanVerdict {
        if self.av_scan.is_empty() {
            return ScanVerdict::Missing;
        }
        if self
            .av_scan
            .iter()
            .any(|s| matches!(s.state, ScanState::NotScanned | ScanState::InProgress))
        {
            return ScanVerdict::Incomplete;
        }
        if self
            .av_scan
            .iter()
            .any(|s| s.state == ScanState::Error || s.is_infected == Some(true))
        {
            return ScanVerdict::Failed;
        }
        ScanVerdict::Clean
    }
}

/// Model-level actions checked by the authorizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelAction {
    View,
    Write,
    Import,
}

/// Release-level actions checked by the authorizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseAction {
    View,
    Create,
    Update,
}

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    /// Human-readable reason, shown to the user on denial
    pub info: String,
}

impl AuthResponse {
    pub fn allow() -> Self {
        Self {
            success: true,
            info: String::new(),
        }
    }

    pub fn deny(info: impl Into<String>) -> Self {
        Self {
            success: false,
            info: info.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with(scans: Vec<ScanResult>) -> FileRecord {
        FileRecord {
            id: "f1".to_string(),
            model_id: "m1".to_string(),
            name: "weights.bin".to_string(),
            mime: "application/octet-stream".to_string(),
            size: 10,
            bucket: "uploads".to_string(),
            path: "m1/f1".to_string(),
            av_scan: scans,
        }
    }

    fn scan(state: ScanState, is_infected: Option<bool>) -> ScanResult {
        ScanResult {
            tool_name: "clamav".to_string(),
            state,
            is_infected,
        }
    }

    #[test]
    fn test_scan_verdict_missing() {
        assert_eq!(file_with(vec![]).scan_verdict(), ScanVerdict::Missing);
    }

    #[test]
    fn test_scan_verdict_incomplete() {
        let file = file_with(vec![
            scan(ScanState::Complete, Some(false)),
            scan(ScanState::InProgress, None),
        ]);
        assert_eq!(file.scan_verdict(), ScanVerdict::Incomplete);
    }

    #[test]
    fn test_scan_verdict_infected() {
        let file = file_with(vec![scan(ScanState::Complete, Some(true))]);
        assert_eq!(file.scan_verdict(), ScanVerdict::Failed);
    }

    #[test]
    fn test_scan_verdict_error_state() {
        let file = file_with(vec![scan(ScanState::Error, None)]);
        assert_eq!(file.scan_verdict(), ScanVerdict::Failed);
    }

    #[test]
    fn test_scan_verdict_clean() {
        let file = file_with(vec![scan(ScanState::Complete, Some(false))]);
        assert_eq!(file.scan_verdict(), ScanVerdict::Clean);
    }

    #[test]
    fn test_release_json_shape() {
        let json = serde_json::json!({
            "modelId": "m1",
            "semver": "1.0.0",
            "fileIds": ["f1"],
            "images": [{"repository": "m1", "name": "app", "tag": "v1"}],
            "createdBy": "user",
            "createdAt": "2024-01-01T00:00:00Z"
        });
        let release: Release = serde_json::from_value(json).unwrap();
        assert_eq!(release.semver, "1.0.0");
        assert_eq!(release.images[0].name, "app");
        assert!(!release.draft);
    }
}
