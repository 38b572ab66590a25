//! Streaming tar.gz archives.
//!
//! `tar` and `flate2` are synchronous, so each archive is driven by a
//! blocking worker that talks to async code over bounded channels. The
//! channel capacity is the backpressure: a slow sink stalls the packer, and a
//! slow entry handler stalls the unpacker.

mod entry;
mod pack;
mod unpack;
mod upload;

pub use entry::TarEntry;
pub use pack::{create_tar_gz_streams, PackBody, TarGzPacker};
pub use unpack::{
    create_unpack_stream, list_entries, EntryBody, EntryKind, UnpackEvent, UnpackedEntry,
};
pub use upload::{initialise_upload, ArchiveUpload};
