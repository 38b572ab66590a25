//! Model Mirror Runtime - export and import pipelines.
//!
//! This module provides the streaming tar.gz archive stages, the registry
//! relay, the exporters that write mirror archives into object storage and
//! the importers that apply them to a deployment.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod context;
pub mod export;
pub mod import;
pub mod registry;

// Re-export common types
pub use archive::{
    create_tar_gz_streams, create_unpack_stream, initialise_upload, list_entries, ArchiveUpload,
    EntryKind, TarEntry, UnpackEvent, UnpackedEntry,
};
pub use context::MirrorContext;
pub use export::{
    document_key, file_key, image_key, DocumentsExport, ExportService, ExportSource, ExportState,
    Exporter, FileExport, ImageExport,
};
pub use import::{import_archive, ImportService, Importer, Settlement};
pub use registry::{RegistryAuth, RegistryClient};

/// Model Mirror Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
