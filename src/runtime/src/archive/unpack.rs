//! gunzip → untar unpacking.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};

use modelmirror_core::config::ArchiveConfig;
use modelmirror_core::error::{MirrorError, Result};
use modelmirror_core::services::ByteStream;

/// Type of an archive entry, reduced to what importers distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Link,
    Other,
}

impl From<tar::EntryType> for EntryKind {
    fn from(entry_type: tar::EntryType) -> Self {
        match entry_type {
            tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::File,
            tar::EntryType::Directory => EntryKind::Directory,
            tar::EntryType::Symlink | tar::EntryType::Link => EntryKind::Link,
            _ => EntryKind::Other,
        }
    }
}

/// Streaming body of one archive entry.
pub struct EntryBody {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl EntryBody {
    /// Buffer the whole body, failing once it grows past `limit` bytes.
    pub async fn read_to_end(mut self, limit: u64) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.rx.recv().await {
            let chunk = chunk.map_err(|e| {
                MirrorError::internal(format!("Failed to read archive entry: {e}"))
            })?;
            if (buffer.len() + chunk.len()) as u64 > limit {
                return Err(MirrorError::bad_request(format!(
                    "Archive entry exceeds the maximum size of {limit} bytes"
                ))
                .with_context("limit", limit));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Consume and discard the body, returning the number of bytes skipped.
    pub async fn drain(mut self) -> Result<u64> {
        let mut skipped = 0u64;
        while let Some(chunk) = self.rx.recv().await {
            let chunk = chunk.map_err(|e| {
                MirrorError::internal(format!("Failed to read archive entry: {e}"))
            })?;
            skipped += chunk.len() as u64;
        }
        Ok(skipped)
    }

    pub fn into_stream(self) -> ByteStream {
        Box::pin(ReceiverStream::new(self.rx))
    }
}

/// One entry delivered by the unpacker.
pub struct UnpackedEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub body: EntryBody,
}

/// Events emitted by the unpacker, in archive order.
pub enum UnpackEvent {
    /// The worker reads no further until `next` is fired or dropped.
    Entry {
        entry: UnpackedEntry,
        next: oneshot::Sender<()>,
    },
    /// Every entry was delivered and the gzip stream ended cleanly.
    Finished,
    /// Decompression or tar parsing failed.
    Failed(MirrorError),
}

/// Start unpacking `source`.
///
/// Entries arrive one at a time: the worker waits for the handler to signal
/// `next` before it reads the following header. A handler that drops its
/// entry body early gets the rest of that body skipped.
pub fn create_unpack_stream(
    source: ByteStream,
    config: &ArchiveConfig,
) -> (mpsc::Receiver<UnpackEvent>, JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::channel(1);
    let chunk_size = config.entry_chunk_size.max(512);
    let body_capacity = config.channel_capacity.max(1);

    let worker = tokio::task::spawn_blocking(move || {
        let reader = SyncIoBridge::new(StreamReader::new(source));
        match unpack_entries(reader, &events_tx, chunk_size, body_capacity) {
            Ok(true) => {
                let _ = events_tx.blocking_send(UnpackEvent::Finished);
            }
            Ok(false) => tracing::debug!("Unpack consumer went away, stopping"),
            Err(e) => {
                let error = MirrorError::internal(format!("Failed to read archive: {e}"));
                let _ = events_tx.blocking_send(UnpackEvent::Failed(error));
            }
        }
    });

    (events_rx, worker)
}

/// Returns `Ok(false)` when the consumer stopped listening.
fn unpack_entries<R: Read>(
    reader: R,
    events: &mpsc::Sender<UnpackEvent>,
    chunk_size: usize,
    body_capacity: usize,
) -> io::Result<bool> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let kind = EntryKind::from(entry.header().entry_type());
        let size = entry.size();

        let (body_tx, body_rx) = mpsc::channel(body_capacity);
        let (next_tx, next_rx) = oneshot::channel();
        let event = UnpackEvent::Entry {
            entry: UnpackedEntry {
                path,
                kind,
                size,
                body: EntryBody { rx: body_rx },
            },
            next: next_tx,
        };
        if events.blocking_send(event).is_err() {
            return Ok(false);
        }

        pump_body(&mut entry, size, body_tx, chunk_size)?;

        // Dropped `next` means the handler is done too
        let _ = next_rx.blocking_recv();
        if events.is_closed() {
            return Ok(false);
        }
    }

    // Read through the gzip trailer so its checksum is verified
    io::copy(&mut archive.into_inner(), &mut io::sink())?;
    Ok(true)
}

/// Forward an entry body in chunks. A body shorter than its header size
/// means the archive was truncated.
fn pump_body<R: Read>(
    entry: &mut R,
    size: u64,
    body: mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
) -> io::Result<()> {
    let mut buffer = vec![0u8; chunk_size];
    let mut forwarded = 0u64;
    loop {
        let read = match entry.read(&mut buffer) {
            Ok(0) if forwarded < size => {
                let message = format!("archive entry ended after {forwarded} of {size} bytes");
                let _ = body.blocking_send(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    message.clone(),
                )));
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, message));
            }
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = body.blocking_send(Err(io::Error::new(e.kind(), e.to_string())));
                return Err(e);
            }
        };
        if body
            .blocking_send(Ok(Bytes::copy_from_slice(&buffer[..read])))
            .is_err()
        {
            // Body dropped; tar skips the unread remainder on the next header
            return Ok(());
        }
        forwarded += read as u64;
    }
}

/// Collect all entries of an archive, for inspection and tests.
pub async fn list_entries(
    source: ByteStream,
    config: &ArchiveConfig,
) -> Result<Vec<(String, EntryKind, u64)>> {
    let (mut events, _worker) = create_unpack_stream(source, config);
    let mut listed = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            UnpackEvent::Entry { entry, next } => {
                listed.push((entry.path, entry.kind, entry.size));
                entry.body.drain().await?;
                let _ = next.send(());
            }
            UnpackEvent::Finished => return Ok(listed),
            UnpackEvent::Failed(e) => return Err(e),
        }
    }
    Err(MirrorError::internal("Archive reader stopped unexpectedly"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn source(data: Vec<u8>) -> ByteStream {
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_entries_delivered_in_order() {
        let archive = build_archive(&[("a.json", b"{}"), ("b/c.bin", b"hello world")]);
        let (mut events, _worker) = create_unpack_stream(source(archive), &ArchiveConfig::default());

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                UnpackEvent::Entry { entry, next } => {
                    let body = entry.body.read_to_end(1024).await.unwrap();
                    seen.push((entry.path, body.to_vec()));
                    next.send(()).unwrap();
                }
                UnpackEvent::Finished => break,
                UnpackEvent::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }
        assert_eq!(
            seen,
            vec![
                ("a.json".to_string(), b"{}".to_vec()),
                ("b/c.bin".to_string(), b"hello world".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_body_is_skipped() {
        let big = vec![7u8; 300_000];
        let archive = build_archive(&[("big.bin", &big), ("after.txt", b"ok")]);
        let (mut events, _worker) = create_unpack_stream(source(archive), &ArchiveConfig::default());

        let mut paths = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                UnpackEvent::Entry { entry, next } => {
                    paths.push(entry.path);
                    drop(entry.body);
                    next.send(()).unwrap();
                }
                UnpackEvent::Finished => break,
                UnpackEvent::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }
        assert_eq!(paths, vec!["big.bin".to_string(), "after.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_read_to_end_limit() {
        let archive = build_archive(&[("big.json", &[b'x'; 64])]);
        let (mut events, _worker) = create_unpack_stream(source(archive), &ArchiveConfig::default());
        match events.recv().await {
            Some(UnpackEvent::Entry { entry, .. }) => {
                let error = entry.body.read_to_end(10).await.unwrap_err();
                assert_eq!(error.status_code(), 400);
            }
            _ => panic!("expected an entry"),
        }
    }

    #[tokio::test]
    async fn test_not_gzip_fails() {
        let (mut events, _worker) = create_unpack_stream(
            source(b"this is not a gzip stream".to_vec()),
            &ArchiveConfig::default(),
        );
        assert!(matches!(events.recv().await, Some(UnpackEvent::Failed(_))));
    }

    #[tokio::test]
    async fn test_truncated_archive_fails() {
        let mut archive = build_archive(&[("a.bin", &[1u8; 4096])]);
        archive.truncate(archive.len() / 2);
        let listed = list_entries(source(archive), &ArchiveConfig::default()).await;
        assert!(listed.is_err());
    }

    #[tokio::test]
    async fn test_list_entries() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        {
            let mut builder = tar::Builder::new(&mut encoder);
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            builder
                .append_data(&mut header, "dir/", io::empty())
                .unwrap();
            let mut header = tar::Header::new_gnu();
            header.set_size(3);
            header.set_mode(0o644);
            builder.append_data(&mut header, "dir/f", &b"abc"[..]).unwrap();
            builder.finish().unwrap();
        }
        encoder.flush().unwrap();
        let archive = encoder.finish().unwrap();

        let listed = list_entries(source(archive), &ArchiveConfig::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].1, EntryKind::Directory);
        assert_eq!(listed[1], ("dir/f".to_string(), EntryKind::File, 3));
    }
}
