use async_trait::async_trait;

use modelmirror_core::error::{ErrorContext, MirrorError, Result};
use modelmirror_core::metadata::{ImportResult, MirrorInformation, MirrorKind, MirrorMetadata};

use super::{content_relative, Importer};
use crate::archive::{EntryKind, UnpackedEntry};
use crate::context::MirrorContext;

/// Streams the single content entry of a file archive into object storage.
pub struct FileImporter {
    ctx: MirrorContext,
    metadata: MirrorMetadata,
    file_id: String,
    file_path: String,
    uploaded: Option<u64>,
}

impl FileImporter {
    pub fn new(ctx: MirrorContext, metadata: MirrorMetadata) -> Result<Self> {
        let (file_id, file_path) = match &metadata.kind {
            MirrorKind::File { file_id, file_path } => (file_id.clone(), file_path.clone()),
            other => {
                return Err(MirrorError::internal(format!(
                    "File importer built for {} metadata",
                    other.import_kind()
                )))
            }
        };
        Ok(Self {
            ctx,
            metadata,
            file_id,
            file_path,
            uploaded: None,
        })
    }
}

#[async_trait]
impl Importer for FileImporter {
    async fn process_entry(&mut self, entry: UnpackedEntry) -> Result<()> {
        if entry.kind != EntryKind::File {
            tracing::debug!(path = %entry.path, kind = ?entry.kind, "Skipping non-file entry");
            return Ok(());
        }
        if content_relative(&self.ctx.config.content_directory, &entry.path).is_none() {
            return Err(MirrorError::bad_request(
                "Mirror archive contains unrecognised contents",
            )
            .with_context("entry", &entry.path));
        }
        if self.uploaded.is_some() {
            return Err(MirrorError::bad_request(
                "File archive contains more than one content entry",
            )
            .with_context("entry", &entry.path));
        }

        let bucket = &self.ctx.config.import.uploads_bucket;
        let written = self
            .ctx
            .objects
            .put_object_stream(bucket, &self.file_path, entry.body.into_stream())
            .await
            .map_err(|e| {
                e.wrap(
                    "Error when storing imported file",
                    ErrorContext::new()
                        .with("fileId", &self.file_id)
                        .with("bucket", bucket),
                )
            })?;
        tracing::debug!(file_id = %self.file_id, bytes = written, "Stored file content");
        self.uploaded = Some(written);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<MirrorInformation> {
        if self.uploaded.is_none() {
            return Err(MirrorError::bad_request("File archive contains no content")
                .with_context("fileId", &self.file_id));
        }
        Ok(MirrorInformation {
            metadata: self.metadata,
            result: ImportResult::File {
                file_id: self.file_id,
                file_path: self.file_path,
            },
        })
    }

    fn metadata(&self) -> &MirrorMetadata {
        &self.metadata
    }

    fn importer_type(&self) -> &'static str {
        "file"
    }
}
