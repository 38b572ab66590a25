//! tar → gzip packing.

use std::io::{self, BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};

use modelmirror_core::config::ArchiveConfig;
use modelmirror_core::error::{MirrorError, Result};
use modelmirror_core::services::ByteStream;

/// Entry content handed to the packing worker.
pub enum PackBody {
    Buffer(Bytes),
    Stream(ByteStream),
    /// A spooled file, positioned at its start
    File(std::fs::File),
}

enum PackCommand {
    Append {
        path: String,
        size: u64,
        body: PackBody,
        done: oneshot::Sender<io::Result<()>>,
    },
    Finish {
        done: oneshot::Sender<io::Result<()>>,
    },
}

/// Handle to a running tar.gz packer.
///
/// Entries are appended one at a time; each `append` resolves once the entry
/// body has been fully written into the compressed output.
pub struct TarGzPacker {
    commands: mpsc::Sender<PackCommand>,
    worker: JoinHandle<()>,
}

/// Start a packer. The returned stream yields the compressed archive and
/// ends with an error item unless [`TarGzPacker::finish`] succeeded, so a
/// sink never mistakes an abandoned archive for a complete one.
pub fn create_tar_gz_streams(config: &ArchiveConfig) -> (TarGzPacker, ByteStream) {
    let (command_tx, command_rx) = mpsc::channel(1);
    let (output_tx, output_rx) = mpsc::channel(config.channel_capacity.max(1));
    let completed = Arc::new(AtomicBool::new(false));

    let chunk_size = config.gzip_chunk_size.max(512);
    let worker_completed = Arc::clone(&completed);
    let worker = tokio::task::spawn_blocking(move || {
        run_pack_worker(command_rx, output_tx, chunk_size, worker_completed)
    });

    let tail = futures::stream::once(async move {
        if completed.load(Ordering::SeqCst) {
            None
        } else {
            Some(Err(io::Error::new(
                io::ErrorKind::Other,
                "archive was abandoned before it was finalised",
            )))
        }
    })
    .filter_map(futures::future::ready);

    let output: ByteStream = Box::pin(ReceiverStream::new(output_rx).chain(tail));
    (
        TarGzPacker {
            commands: command_tx,
            worker,
        },
        output,
    )
}

impl TarGzPacker {
    /// Append one regular-file entry of exactly `size` bytes.
    pub async fn append(&self, path: impl Into<String>, size: u64, body: PackBody) -> Result<()> {
        let path = path.into();
        let (done, result) = oneshot::channel();
        self.commands
            .send(PackCommand::Append {
                path: path.clone(),
                size,
                body,
                done,
            })
            .await
            .map_err(|_| stopped())?;

        result.await.map_err(|_| stopped())?.map_err(|e| {
            MirrorError::internal(format!("Failed to write archive entry '{path}': {e}"))
                .with_context("entry", &path)
        })
    }

    /// Write the tar trailer and flush the gzip stream.
    pub async fn finish(self) -> Result<()> {
        let (done, result) = oneshot::channel();
        self.commands
            .send(PackCommand::Finish { done })
            .await
            .map_err(|_| stopped())?;
        let finished = result.await.map_err(|_| stopped())?;
        let _ = self.worker.await;
        finished.map_err(|e| MirrorError::internal(format!("Failed to finalise archive: {e}")))
    }
}

fn stopped() -> MirrorError {
    MirrorError::internal("Archive writer stopped unexpectedly")
}

fn run_pack_worker(
    mut commands: mpsc::Receiver<PackCommand>,
    output: mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
    completed: Arc<AtomicBool>,
) {
    let writer = BufWriter::with_capacity(chunk_size, ChannelWriter { tx: output });
    let mut builder = tar::Builder::new(GzEncoder::new(writer, Compression::fast()));

    while let Some(command) = commands.blocking_recv() {
        match command {
            PackCommand::Append {
                path,
                size,
                body,
                done,
            } => {
                let result = append_entry(&mut builder, &path, size, body);
                let failed = result.is_err();
                let _ = done.send(result);
                if failed {
                    tracing::debug!(entry = %path, "Archive entry failed, abandoning archive");
                    return;
                }
            }
            PackCommand::Finish { done } => {
                match finish_archive(builder) {
                    Ok(writer) => {
                        // Mark completion before the last sender goes away
                        completed.store(true, Ordering::SeqCst);
                        drop(writer);
                        let _ = done.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = done.send(Err(e));
                    }
                }
                return;
            }
        }
    }
}

fn finish_archive(
    builder: tar::Builder<GzEncoder<BufWriter<ChannelWriter>>>,
) -> io::Result<BufWriter<ChannelWriter>> {
    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    Ok(writer)
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    size: u64,
    body: PackBody,
) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);

    match body {
        PackBody::Buffer(data) => {
            if data.len() as u64 != size {
                return Err(size_mismatch(path, size, data.len() as u64));
            }
            builder.append_data(&mut header, path, data.as_ref())
        }
        PackBody::File(file) => builder.append_data(&mut header, path, ExactReader::new(file, size)),
        PackBody::Stream(stream) => {
            let reader = SyncIoBridge::new(StreamReader::new(stream));
            builder.append_data(&mut header, path, ExactReader::new(reader, size))
        }
    }
}

fn size_mismatch(path: &str, expected: u64, actual: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("entry '{path}' declared {expected} bytes but produced {actual}"),
    )
}

/// Reads exactly `size` bytes: ends early is an error, and so is any byte
/// left over in the source afterwards.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
    size: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
            size,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            let mut probe = [0u8; 1];
            return match self.inner.read(&mut probe)? {
                0 => Ok(0),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entry source is longer than its declared {} bytes", self.size),
                )),
            };
        }
        let limit = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let read = self.inner.read(&mut buf[..limit])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "entry source ended after {} of {} bytes",
                    self.size - self.remaining,
                    self.size
                ),
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

/// Forwards compressed output to the async side, blocking while the channel
/// is full.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
