//! Export entry point and its background jobs.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use modelmirror_core::error::Result;
use modelmirror_core::model::{ImageRef, User};
use modelmirror_core::queue::{lane_ids, Job, JobQueue};

use super::{DocumentsExport, ExportSource, Exporter, FileExport, ImageExport};
use crate::context::MirrorContext;

/// Object key of a documents archive.
pub fn document_key(export_id: &str) -> String {
    format!("{export_id}.tar.gz")
}

/// Object key of a file archive.
pub fn file_key(export_id: &str, file_id: &str) -> String {
    format!("{export_id}/files/{file_id}.tar.gz")
}

/// Object key of an image archive.
pub fn image_key(export_id: &str, image: &ImageRef) -> String {
    format!("{export_id}/images/{}-{}.tar.gz", image.name, image.tag)
}

/// Starts exports and hands the long-running parts to the job queue.
pub struct ExportService {
    ctx: MirrorContext,
    queue: Arc<JobQueue>,
}

impl ExportService {
    pub fn new(ctx: MirrorContext, queue: Arc<JobQueue>) -> Self {
        Self { ctx, queue }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Export a model's documents and the releases `semvers`.
    ///
    /// Checks and authorization run before this returns, so their errors
    /// reach the caller. Writing the archive, and the file and image
    /// archives that follow it, happen on the queue; their failures are
    /// only logged.
    pub async fn export_model(
        &self,
        user: &User,
        model_id: &str,
        semvers: Vec<String>,
    ) -> Result<String> {
        let export_id = Uuid::new_v4().to_string();
        let mut exporter = Exporter::new(
            self.ctx.clone(),
            user.clone(),
            document_key(&export_id),
            DocumentsExport::new(model_id, semvers),
        );
        exporter.init().await?;

        let job = DocumentsJob {
            exporter,
            export_id: export_id.clone(),
            ctx: self.ctx.clone(),
            user: user.clone(),
            queue: Arc::clone(&self.queue),
        };
        let job_id = self.queue.submit(lane_ids::EXPORT, Box::new(job))?;
        tracing::info!(export_id = %export_id, job_id = %job_id, model_id, "Export queued");
        Ok(export_id)
    }
}

/// Writes the documents archive, then queues one transfer per file and image.
struct DocumentsJob {
    exporter: Exporter<DocumentsExport>,
    export_id: String,
    ctx: MirrorContext,
    user: User,
    queue: Arc<JobQueue>,
}

#[async_trait]
impl Job for DocumentsJob {
    async fn run(self: Box<Self>) -> Result<()> {
        let DocumentsJob {
            mut exporter,
            export_id,
            ctx,
            user,
            queue,
        } = *self;

        exporter.add_data().await?;
        exporter.finalise().await?;

        let model_id = exporter.source().model_id().to_string();
        let follow_ups = exporter.source().follow_ups();
        for file_id in follow_ups.file_ids {
            let exporter = Exporter::new(
                ctx.clone(),
                user.clone(),
                file_key(&export_id, &file_id),
                FileExport::new(&model_id, file_id),
            );
            queue.submit(lane_ids::TRANSFER, Box::new(TransferJob::new(exporter, "export-file")))?;
        }
        for image in follow_ups.images {
            let exporter = Exporter::new(
                ctx.clone(),
                user.clone(),
                image_key(&export_id, &image),
                ImageExport::new(&model_id, image),
            );
            queue.submit(
                lane_ids::TRANSFER,
                Box::new(TransferJob::new(exporter, "export-image")),
            )?;
        }
        Ok(())
    }

    fn job_type(&self) -> &str {
        "export-documents"
    }
}

/// Runs one narrower exporter end to end.
struct TransferJob<S: ExportSource> {
    exporter: Exporter<S>,
    job_type: &'static str,
}

impl<S: ExportSource> TransferJob<S> {
    fn new(exporter: Exporter<S>, job_type: &'static str) -> Self {
        Self { exporter, job_type }
    }
}

#[async_trait]
impl<S: ExportSource + 'static> Job for TransferJob<S> {
    async fn run(self: Box<Self>) -> Result<()> {
        self.exporter.run().await.map(|_| ())
    }

    fn job_type(&self) -> &str {
        self.job_type
    }
}
