//! Drives one inbound archive to exactly one outcome.
//!
//! Outcomes can come from several places at once: the unpack worker failing
//! or dying, the archive ending before any importer exists, an entry handler
//! failing or panicking, or the importer finishing. All of them report
//! through one [`Settlement`]; the first report wins and every later one is
//! dropped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::AbortOnDropHandle;
use tracing::Instrument;

use modelmirror_core::error::{ErrorContext, MirrorError, Result};
use modelmirror_core::metadata::{ImportKind, MirrorInformation, MirrorMetadata};
use modelmirror_core::model::{ModelAction, User};
use modelmirror_core::services::ByteStream;

use super::{DocumentsImporter, FileImporter, ImageImporter, Importer};
use crate::archive::{create_unpack_stream, EntryKind, UnpackEvent, UnpackedEntry};
use crate::context::MirrorContext;

/// Single-assignment outcome latch shared by every outcome source.
pub struct Settlement<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Settlement<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Settlement<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver `outcome` if nothing was delivered yet. Returns whether this
    /// call settled.
    pub fn settle(&self, outcome: T) -> bool {
        let sender = self.slot.lock().take();
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }
}

enum ImportPhase {
    AwaitingMetadata,
    Dispatching(Box<dyn Importer>),
}

/// Import one gzip-compressed mirror archive.
pub async fn import_archive(
    ctx: &MirrorContext,
    user: &User,
    source: ByteStream,
) -> Result<MirrorInformation> {
    let span = tracing::info_span!("import", user = %user.dn);
    let (settlement, outcome) = Settlement::new();
    let (events, worker) = create_unpack_stream(source, &ctx.config.archive);

    let watcher = {
        let settlement = settlement.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                settlement.settle(Err(MirrorError::internal(format!(
                    "Archive reader failed: {e}"
                ))));
            }
        })
    };
    let driver = tokio::spawn(
        drive(ctx.clone(), user.clone(), events, settlement.clone()).instrument(span.clone()),
    );
    // Dropping the caller's future stops the import with it
    let tasks = [AbortOnDropHandle::new(watcher), AbortOnDropHandle::new(driver)];

    let result = match outcome.await {
        Ok(result) => result,
        Err(_) => Err(MirrorError::internal("Import ended without an outcome")),
    };
    drop(tasks);

    match &result {
        Ok(information) => tracing::info!(
            parent: &span,
            kind = %information.metadata.import_kind(),
            mirrored_model_id = %information.metadata.mirrored_model_id,
            "Import complete"
        ),
        Err(e) => tracing::warn!(parent: &span, error = %e, "Import failed"),
    }
    result
}

async fn drive(
    ctx: MirrorContext,
    user: User,
    mut events: mpsc::Receiver<UnpackEvent>,
    settlement: Settlement<Result<MirrorInformation>>,
) {
    let mut phase = ImportPhase::AwaitingMetadata;

    while let Some(event) = events.recv().await {
        match event {
            UnpackEvent::Entry { entry, next } => {
                let path = entry.path.clone();
                let handled = AssertUnwindSafe(handle_entry(&ctx, &user, &mut phase, entry))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(MirrorError::internal("Archive entry handler panicked")));
                if let Err(e) = handled {
                    settlement.settle(Err(e.with_context("entry", path)));
                    return;
                }
                let _ = next.send(());
            }
            UnpackEvent::Finished => {
                let outcome = match phase {
                    ImportPhase::AwaitingMetadata => Err(MirrorError::bad_request(
                        "Mirror archive contained no entries",
                    )),
                    ImportPhase::Dispatching(importer) => AssertUnwindSafe(importer.finish())
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(MirrorError::internal("Importer panicked while finishing"))),
                };
                settlement.settle(outcome);
                return;
            }
            UnpackEvent::Failed(error) => {
                let error = match &phase {
                    ImportPhase::Dispatching(importer) => importer.handle_stream_error(error),
                    ImportPhase::AwaitingMetadata => {
                        error.wrap("Error reading mirror archive", ErrorContext::new())
                    }
                };
                settlement.settle(Err(error));
                return;
            }
        }
    }

    settlement.settle(Err(MirrorError::internal(
        "Archive reader stopped before the archive ended",
    )));
}

async fn handle_entry(
    ctx: &MirrorContext,
    user: &User,
    phase: &mut ImportPhase,
    entry: UnpackedEntry,
) -> Result<()> {
    match phase {
        ImportPhase::AwaitingMetadata => {
            let importer = open_importer(ctx, user, entry).await?;
            tracing::debug!(importer = importer.importer_type(), "Metadata accepted");
            *phase = ImportPhase::Dispatching(importer);
            Ok(())
        }
        ImportPhase::Dispatching(importer) => importer.process_entry(entry).await,
    }
}

/// Validate and authorize the metadata entry, then build the importer.
async fn open_importer(
    ctx: &MirrorContext,
    user: &User,
    entry: UnpackedEntry,
) -> Result<Box<dyn Importer>> {
    let metadata_file = ctx.config.metadata_file.as_str();
    if entry.kind != EntryKind::File || entry.path.trim_start_matches("./") != metadata_file {
        return Err(MirrorError::bad_request(format!(
            "The first archive entry must be the mirror metadata file '{metadata_file}'"
        ))
        .with_context("found", &entry.path));
    }

    let raw = entry
        .body
        .read_to_end(ctx.config.import.max_metadata_size)
        .await?;
    let metadata = MirrorMetadata::from_slice(&raw)?;

    let model = ctx.models.get_model(&metadata.mirrored_model_id).await?;
    if model.settings.mirror.source_model_id.as_deref() != Some(metadata.source_model_id.as_str()) {
        return Err(MirrorError::bad_request(format!(
            "Model '{}' is not configured to mirror model '{}'",
            model.id, metadata.source_model_id
        ))
        .with_context("mirroredModelId", &model.id)
        .with_context("sourceModelId", &metadata.source_model_id));
    }

    let auth = ctx.authorizer.model(user, &model, ModelAction::Import).await;
    if !auth.success {
        return Err(MirrorError::forbidden(auth.info)
            .with_context("mirroredModelId", &model.id)
            .with_context("user", &user.dn));
    }

    tracing::info!(
        kind = %metadata.import_kind(),
        source_model_id = %metadata.source_model_id,
        mirrored_model_id = %metadata.mirrored_model_id,
        exporter = %metadata.exporter,
        "Importing mirror archive"
    );

    let importer: Box<dyn Importer> = match metadata.import_kind() {
        ImportKind::Documents => Box::new(DocumentsImporter::new(
            ctx.clone(),
            user.clone(),
            metadata,
            model,
        )),
        ImportKind::File => Box::new(FileImporter::new(ctx.clone(), metadata)?),
        ImportKind::Image => Box::new(ImageImporter::new(ctx.clone(), metadata)?),
    };
    Ok(importer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settlement_first_wins() {
        let (settlement, outcome) = Settlement::new();
        assert!(!settlement.is_settled());
        assert!(settlement.settle(1));
        assert!(!settlement.settle(2));
        assert!(settlement.is_settled());
        assert_eq!(outcome.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_settlement_concurrent_sources_settle_once() {
        for _ in 0..50 {
            let (settlement, outcome) = Settlement::<std::result::Result<&str, &str>>::new();
            let stream_error = {
                let s = settlement.clone();
                tokio::spawn(async move { s.settle(Err("stream error")) })
            };
            let completion = {
                let s = settlement.clone();
                tokio::spawn(async move { s.settle(Ok("finished")) })
            };
            let settled = [stream_error.await.unwrap(), completion.await.unwrap()];
            assert_eq!(settled.iter().filter(|s| **s).count(), 1);
            assert!(outcome.await.is_ok());
        }
    }
}
