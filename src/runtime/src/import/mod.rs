//! Importers: apply the entries of a mirror archive to this deployment.
//!
//! The orchestrator reads the metadata entry, authorizes it, and picks the
//! importer for its kind. Every later entry goes to that importer in archive
//! order, one at a time.

mod documents;
mod file;
mod image;
mod orchestrator;
mod service;

pub use documents::DocumentsImporter;
pub use file::FileImporter;
pub use image::ImageImporter;
pub use orchestrator::{import_archive, Settlement};
pub use service::ImportService;

use async_trait::async_trait;

use modelmirror_core::error::{ErrorContext, MirrorError, Result};
use modelmirror_core::metadata::{MirrorInformation, MirrorMetadata};

use crate::archive::UnpackedEntry;

/// Kind-specific entry handling.
#[async_trait]
pub trait Importer: Send {
    /// Handle one entry after the metadata entry. The body must be consumed
    /// or dropped before returning.
    async fn process_entry(&mut self, entry: UnpackedEntry) -> Result<()>;

    /// Complete the import once every entry was processed.
    async fn finish(self: Box<Self>) -> Result<MirrorInformation>;

    /// The authorized metadata this importer was built from.
    fn metadata(&self) -> &MirrorMetadata;

    /// Translate an error raised by the archive stream itself.
    fn handle_stream_error(&self, error: MirrorError) -> MirrorError {
        let metadata = self.metadata();
        error.wrap(
            "Error reading mirror archive",
            ErrorContext::new()
                .with("importKind", metadata.import_kind())
                .with("mirroredModelId", &metadata.mirrored_model_id),
        )
    }

    /// Get importer type (for logging)
    fn importer_type(&self) -> &'static str;
}

/// Path of an entry relative to the content directory, if it is inside it.
pub(crate) fn content_relative<'a>(content_directory: &str, path: &'a str) -> Option<&'a str> {
    path.trim_start_matches("./")
        .strip_prefix(content_directory.trim_end_matches('/'))?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
}
