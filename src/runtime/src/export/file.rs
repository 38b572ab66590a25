use async_trait::async_trait;

use modelmirror_core::error::{ErrorContext, MirrorError, Result};
use modelmirror_core::metadata::MirrorKind;
use modelmirror_core::model::{FileRecord, ModelAction, ScanVerdict, User};

use super::{authorize_model, mirrored_model_id, ExportPlan, ExportSource};
use crate::archive::{ArchiveUpload, TarEntry};
use crate::context::MirrorContext;

/// Exports the content of one file as a single stream entry.
pub struct FileExport {
    model_id: String,
    file_id: String,
    file: Option<FileRecord>,
}

impl FileExport {
    pub fn new(model_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            file_id: file_id.into(),
            file: None,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

#[async_trait]
impl ExportSource for FileExport {
    async fn prepare(&mut self, ctx: &MirrorContext, user: &User) -> Result<ExportPlan> {
        let model = ctx.models.get_model(&self.model_id).await?;
        let mirrored_model_id = mirrored_model_id(&model)?;
        authorize_model(ctx, user, &model, ModelAction::View).await?;

        let file = ctx.models.get_file(&self.file_id).await?;
        if file.model_id != model.id {
            return Err(MirrorError::not_found(format!(
                "File '{}' does not belong to model '{}'",
                file.id, model.id
            )));
        }
        if ctx.config.scanning_enabled() && file.scan_verdict() != ScanVerdict::Clean {
            return Err(
                MirrorError::bad_request("File does not have a clean AV scan")
                    .with_context("fileId", &file.id)
                    .with_context("verdict", format!("{:?}", file.scan_verdict())),
            );
        }

        let plan = ExportPlan {
            source_model_id: model.id.clone(),
            mirrored_model_id,
            kind: MirrorKind::File {
                file_id: file.id.clone(),
                file_path: file.path.clone(),
            },
        };
        self.file = Some(file);
        Ok(plan)
    }

    async fn write_content(
        &mut self,
        ctx: &MirrorContext,
        archive: &mut ArchiveUpload,
    ) -> Result<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| MirrorError::Precondition("file export was not prepared".to_string()))?;
        let context = ErrorContext::new()
            .with("modelId", &self.model_id)
            .with("fileId", &file.id);

        let content = ctx
            .objects
            .get_object_stream(&file.bucket, &file.path)
            .await
            .map_err(|e| e.wrap("Error when reading file content", context.clone()))?;
        archive
            .add_entry(TarEntry::stream(file.id.clone(), content, Some(file.size)))
            .await
            .map_err(|e| e.wrap("Error when adding file content to export", context))?;

        tracing::debug!(file_id = %file.id, bytes = file.size, "Added file content");
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "file"
    }
}
