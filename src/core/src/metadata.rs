//! Mirror archive metadata and import results.
//!
//! The metadata document is always the first archive entry. It is written once
//! by the exporter and never mutated; `schemaVersion` lets newer importers keep
//! reading archives produced by older exporters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::reference::DistributionPackageName;

/// Newest metadata schema this build reads and writes.
pub const MIRROR_SCHEMA_VERSION: u32 = 1;

/// Discriminator selecting the exporter/importer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportKind {
    Documents,
    File,
    Image,
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportKind::Documents => "documents",
            ImportKind::File => "file",
            ImportKind::Image => "image",
        };
        f.write_str(name)
    }
}

/// Kind-specific metadata fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "importKind", rename_all = "camelCase")]
pub enum MirrorKind {
    Documents {
        #[serde(rename = "releaseSemvers", default)]
        release_semvers: Vec<String>,
    },
    File {
        #[serde(rename = "fileId")]
        file_id: String,
        /// Object key the content is stored under
        #[serde(rename = "filePath")]
        file_path: String,
    },
    Image {
        #[serde(rename = "distributionPackageName")]
        distribution_package_name: String,
    },
}

impl MirrorKind {
    pub fn import_kind(&self) -> ImportKind {
        match self {
            MirrorKind::Documents { .. } => ImportKind::Documents,
            MirrorKind::File { .. } => ImportKind::File,
            MirrorKind::Image { .. } => ImportKind::Image,
        }
    }
}

/// The archive's first entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorMetadata {
    pub schema_version: u32,
    /// Identity of the exporting deployment or user
    pub exporter: String,
    pub source_model_id: String,
    pub mirrored_model_id: String,
    #[serde(flatten)]
    pub kind: MirrorKind,
}

impl MirrorMetadata {
    pub fn new(
        exporter: impl Into<String>,
        source_model_id: impl Into<String>,
        mirrored_model_id: impl Into<String>,
        kind: MirrorKind,
    ) -> Self {
        Self {
            schema_version: MIRROR_SCHEMA_VERSION,
            exporter: exporter.into(),
            source_model_id: source_model_id.into(),
            mirrored_model_id: mirrored_model_id.into(),
            kind,
        }
    }

    pub fn import_kind(&self) -> ImportKind {
        self.kind.import_kind()
    }

    /// Parse and validate a metadata document.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let metadata: MirrorMetadata = serde_json::from_slice(raw).map_err(|e| {
            MirrorError::bad_request(format!("Mirror metadata is not valid: {e}"))
        })?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check the schema version and required fields.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version == 0 || self.schema_version > MIRROR_SCHEMA_VERSION {
            return Err(MirrorError::bad_request(format!(
                "Unsupported mirror metadata schema version {} (supported: 1..={})",
                self.schema_version, MIRROR_SCHEMA_VERSION
            ))
            .with_context("schemaVersion", self.schema_version));
        }

        let required = [
            ("exporter", &self.exporter),
            ("sourceModelId", &self.source_model_id),
            ("mirroredModelId", &self.mirrored_model_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MirrorError::bad_request(format!(
                    "Mirror metadata field '{field}' must not be empty"
                )));
            }
        }

        match &self.kind {
            MirrorKind::Documents { .. } => {}
            MirrorKind::File { file_id, file_path } => {
                if file_id.trim().is_empty() || file_path.trim().is_empty() {
                    return Err(MirrorError::bad_request(
                        "File mirror metadata requires fileId and filePath",
                    ));
                }
            }
            MirrorKind::Image {
                distribution_package_name,
            } => {
                DistributionPackageName::split(distribution_package_name)?;
            }
        }
        Ok(())
    }
}

/// Ids accumulated by an importer, exposed only once the archive is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImportResult {
    #[serde(rename_all = "camelCase")]
    Documents {
        model_card_versions: Vec<u32>,
        release_semvers: Vec<String>,
        file_ids: Vec<String>,
        image_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    File { file_id: String, file_path: String },
    #[serde(rename_all = "camelCase")]
    Image { image_id: String },
}

/// Outcome of one import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorInformation {
    pub metadata: MirrorMetadata,
    pub result: ImportResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_metadata_json_shape() {
        let metadata = MirrorMetadata::new(
            "exporter@source",
            "source-model",
            "mirrored-model",
            MirrorKind::Documents {
                release_semvers: vec!["1.0.0".to_string()],
            },
        );
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["schemaVersion"], 1);
        assert_eq!(value["importKind"], "documents");
        assert_eq!(value["sourceModelId"], "source-model");
        assert_eq!(value["mirroredModelId"], "mirrored-model");
        assert_eq!(value["releaseSemvers"][0], "1.0.0");
    }

    #[test]
    fn test_file_metadata_parse() {
        let raw = br#"{
            "schemaVersion": 1,
            "exporter": "alice",
            "sourceModelId": "a",
            "mirroredModelId": "b",
            "importKind": "file",
            "fileId": "f1",
            "filePath": "a/f1"
        }"#;
        let metadata = MirrorMetadata::from_slice(raw).unwrap();
        assert_eq!(metadata.import_kind(), ImportKind::File);
        assert_eq!(
            metadata.kind,
            MirrorKind::File {
                file_id: "f1".to_string(),
                file_path: "a/f1".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let raw = br#"{"schemaVersion":1,"exporter":"a","sourceModelId":"a","mirroredModelId":"b","importKind":"weights"}"#;
        let error = MirrorMetadata::from_slice(raw).unwrap_err();
        assert_eq!(error.status_code(), 400);
    }

    #[test]
    fn test_future_schema_rejected() {
        let raw = br#"{"schemaVersion":99,"exporter":"a","sourceModelId":"a","mirroredModelId":"b","importKind":"documents"}"#;
        let error = MirrorMetadata::from_slice(raw).unwrap_err();
        assert!(error.to_string().contains("schema version 99"));
    }

    #[test]
    fn test_empty_ids_rejected() {
        let metadata = MirrorMetadata::new(
            "alice",
            "",
            "b",
            MirrorKind::Documents {
                release_semvers: vec![],
            },
        );
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_image_metadata_requires_valid_name() {
        let metadata = MirrorMetadata::new(
            "alice",
            "a",
            "b",
            MirrorKind::Image {
                distribution_package_name: "registry:5000/a/app".to_string(),
            },
        );
        assert!(metadata.validate().is_err());

        let metadata = MirrorMetadata::new(
            "alice",
            "a",
            "b",
            MirrorKind::Image {
                distribution_package_name: "registry:5000/a/app:v1".to_string(),
            },
        );
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_import_result_json_shape() {
        let result = ImportResult::Documents {
            model_card_versions: vec![1, 2],
            release_semvers: vec!["1.0.0".to_string()],
            file_ids: vec![],
            image_ids: vec![],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["kind"], "documents");
        assert_eq!(value["modelCardVersions"][1], 2);
    }
}
