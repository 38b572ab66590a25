//! Exporters: write a model's documents, a file or an image into an archive
//! in object storage.
//!
//! Every exporter runs the same lifecycle, `init → add_data → finalise`, and
//! is single-use. The kind-specific work lives in an [`ExportSource`].

mod documents;
mod file;
mod image;
mod service;

pub use documents::{DocumentsExport, FollowUps};
pub use file::FileExport;
pub use image::ImageExport;
pub use service::{document_key, file_key, image_key, ExportService};

use async_trait::async_trait;
use tracing::Instrument;

use modelmirror_core::error::{MirrorError, Result};
use modelmirror_core::metadata::{MirrorKind, MirrorMetadata};
use modelmirror_core::model::{Model, ModelAction, User};

use crate::archive::{initialise_upload, ArchiveUpload};
use crate::context::MirrorContext;

/// Lifecycle position of an [`Exporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Uninitialized,
    Initialized,
    DataAdded,
    Finalized,
}

/// What `prepare` resolved: the models involved and the kind metadata.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub source_model_id: String,
    pub mirrored_model_id: String,
    pub kind: MirrorKind,
}

/// Kind-specific half of an export.
#[async_trait]
pub trait ExportSource: Send {
    /// One-time lookups, authorization and policy checks.
    async fn prepare(&mut self, ctx: &MirrorContext, user: &User) -> Result<ExportPlan>;

    /// Write every content entry after the metadata entry.
    async fn write_content(&mut self, ctx: &MirrorContext, archive: &mut ArchiveUpload)
        -> Result<()>;

    /// Get source type (for logging)
    fn source_type(&self) -> &'static str;
}

/// Drives an [`ExportSource`] through the export lifecycle.
pub struct Exporter<S: ExportSource> {
    ctx: MirrorContext,
    user: User,
    key: String,
    source: S,
    state: ExportState,
    metadata: Option<MirrorMetadata>,
    archive: Option<ArchiveUpload>,
    span: tracing::Span,
}

impl<S: ExportSource> Exporter<S> {
    /// Create an exporter writing to `export.bucket/key`.
    pub fn new(ctx: MirrorContext, user: User, key: impl Into<String>, source: S) -> Self {
        let key = key.into();
        let span = tracing::info_span!(
            "export",
            source = source.source_type(),
            key = %key,
            user = %user.dn
        );
        Self {
            ctx,
            user,
            key,
            source,
            state: ExportState::Uninitialized,
            metadata: None,
            archive: None,
            span,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Metadata written as the first entry, once initialised.
    pub fn metadata(&self) -> Option<&MirrorMetadata> {
        self.metadata.as_ref()
    }

    /// Run lookups and checks, then open the upload with the metadata entry.
    /// On failure the exporter stays uninitialised and nothing is uploaded.
    pub async fn init(&mut self) -> Result<()> {
        if self.state != ExportState::Uninitialized {
            return Err(MirrorError::Precondition(format!(
                "export '{}' was already initialised",
                self.key
            )));
        }

        let span = self.span.clone();
        async {
            let plan = self.source.prepare(&self.ctx, &self.user).await?;
            let exporter = self
                .ctx
                .config
                .exporter_identity
                .clone()
                .unwrap_or_else(|| self.user.dn.clone());
            let metadata = MirrorMetadata::new(
                exporter,
                plan.source_model_id,
                plan.mirrored_model_id,
                plan.kind,
            );
            let archive = initialise_upload(
                &self.ctx.config,
                self.ctx.objects.clone(),
                &self.key,
                &metadata,
            )
            .await?;

            tracing::info!(
                model_id = %metadata.source_model_id,
                mirrored_model_id = %metadata.mirrored_model_id,
                kind = %metadata.import_kind(),
                "Export initialised"
            );
            self.metadata = Some(metadata);
            self.archive = Some(archive);
            self.state = ExportState::Initialized;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Write all content entries.
    pub async fn add_data(&mut self) -> Result<()> {
        if self.state != ExportState::Initialized {
            return Err(self.not_ready("add data to"));
        }
        let archive = self
            .archive
            .as_mut()
            .ok_or_else(|| MirrorError::Precondition("export has no open archive".to_string()))?;

        let result = self
            .source
            .write_content(&self.ctx, archive)
            .instrument(self.span.clone())
            .await;
        match result {
            Ok(()) => {
                self.state = ExportState::DataAdded;
                Ok(())
            }
            Err(e) => {
                // The archive is unusable after a failed write
                self.archive = None;
                self.state = ExportState::Finalized;
                Err(e)
            }
        }
    }

    /// Finish the archive and wait for the upload. Returns the archive size.
    pub async fn finalise(&mut self) -> Result<u64> {
        if !matches!(self.state, ExportState::Initialized | ExportState::DataAdded) {
            return Err(self.not_ready("finalise"));
        }
        self.state = ExportState::Finalized;
        let archive = self
            .archive
            .take()
            .ok_or_else(|| MirrorError::Precondition("export has no open archive".to_string()))?;
        let size = archive.finalise().instrument(self.span.clone()).await?;
        tracing::info!(parent: &self.span, bytes = size, "Export complete");
        Ok(size)
    }

    /// Run the whole lifecycle.
    pub async fn run(mut self) -> Result<u64> {
        self.init().await?;
        self.add_data().await?;
        self.finalise().await
    }

    fn not_ready(&self, action: &str) -> MirrorError {
        MirrorError::Precondition(format!(
            "cannot {action} export '{}' in state {:?}",
            self.key, self.state
        ))
    }
}

/// The destination id a source model is exported to.
pub(crate) fn mirrored_model_id(model: &Model) -> Result<String> {
    model
        .settings
        .mirror
        .destination_model_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            MirrorError::bad_request(format!(
                "Model '{}' is not configured for mirroring",
                model.id
            ))
            .with_context("modelId", &model.id)
        })
}

/// Check a model-level action, turning a denial into Forbidden.
pub(crate) async fn authorize_model(
    ctx: &MirrorContext,
    user: &User,
    model: &Model,
    action: ModelAction,
) -> Result<()> {
    let auth = ctx.authorizer.model(user, model, action).await;
    if auth.success {
        return Ok(());
    }
    Err(MirrorError::forbidden(auth.info)
        .with_context("modelId", &model.id)
        .with_context("user", &user.dn))
}
