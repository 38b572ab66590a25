use bytes::Bytes;
use serde::Serialize;

use modelmirror_core::error::Result;
use modelmirror_core::services::ByteStream;

/// An entry to append to an archive.
pub enum TarEntry {
    /// Fully buffered content, written as one entry
    Text { filename: String, content: Bytes },
    /// Content piped from a byte stream. Without a size the stream is
    /// spooled to a temporary file first, since tar headers precede the data.
    Stream {
        filename: String,
        source: ByteStream,
        size: Option<u64>,
    },
}

impl TarEntry {
    pub fn text(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        TarEntry::Text {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Pretty-printed JSON document entry.
    pub fn json<T: Serialize>(filename: impl Into<String>, value: &T) -> Result<Self> {
        let content = serde_json::to_vec_pretty(value)?;
        Ok(Self::text(filename, content))
    }

    pub fn stream(filename: impl Into<String>, source: ByteStream, size: Option<u64>) -> Self {
        TarEntry::Stream {
            filename: filename.into(),
            source,
            size,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            TarEntry::Text { filename, .. } | TarEntry::Stream { filename, .. } => filename,
        }
    }
}

impl std::fmt::Debug for TarEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TarEntry::Text { filename, content } => f
                .debug_struct("Text")
                .field("filename", filename)
                .field("len", &content.len())
                .finish(),
            TarEntry::Stream { filename, size, .. } => f
                .debug_struct("Stream")
                .field("filename", filename)
                .field("size", size)
                .finish(),
        }
    }
}
