//! Archive → object store upload.

use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use modelmirror_core::config::MirrorConfig;
use modelmirror_core::error::{MirrorError, Result};
use modelmirror_core::metadata::MirrorMetadata;
use modelmirror_core::services::{ByteStream, ObjectStore};

use super::entry::TarEntry;
use super::pack::{create_tar_gz_streams, PackBody, TarGzPacker};

/// An archive being streamed into object storage.
///
/// Dropping an upload before [`ArchiveUpload::finalise`] aborts it; nothing
/// is stored under its key.
pub struct ArchiveUpload {
    packer: Option<TarGzPacker>,
    upload: Option<JoinHandle<Result<u64>>>,
    content_directory: String,
    bucket: String,
    key: String,
}

/// Start uploading an archive to `export.bucket/key` and write the metadata
/// entry before returning, so it is always the archive's first entry.
pub async fn initialise_upload(
    config: &MirrorConfig,
    objects: Arc<dyn ObjectStore>,
    key: &str,
    metadata: &MirrorMetadata,
) -> Result<ArchiveUpload> {
    let (packer, output) = create_tar_gz_streams(&config.archive);
    let bucket = config.export.bucket.clone();

    let upload = {
        let bucket = bucket.clone();
        let key = key.to_string();
        tokio::spawn(
            async move { objects.put_object_stream(&bucket, &key, output).await }
                .instrument(tracing::Span::current()),
        )
    };

    let mut archive = ArchiveUpload {
        packer: Some(packer),
        upload: Some(upload),
        content_directory: config.content_directory.clone(),
        bucket,
        key: key.to_string(),
    };

    let document = serde_json::to_vec_pretty(metadata)?;
    if let Err(e) = archive
        .append_raw(&config.metadata_file, document.len() as u64, PackBody::Buffer(document.into()))
        .await
    {
        archive.abort();
        return Err(e.with_context("key", key));
    }

    tracing::debug!(bucket = %archive.bucket, key, "Archive upload initialised");
    Ok(archive)
}

impl ArchiveUpload {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// True once a failed write has torn the upload down.
    pub fn is_aborted(&self) -> bool {
        self.packer.is_none()
    }

    /// Append an entry under the content directory.
    pub async fn add_entry(&mut self, entry: TarEntry) -> Result<()> {
        let path = format!(
            "{}/{}",
            self.content_directory.trim_end_matches('/'),
            entry.filename().trim_start_matches('/')
        );

        let result = match entry {
            TarEntry::Text { content, .. } => {
                self.append_raw(&path, content.len() as u64, PackBody::Buffer(content))
                    .await
            }
            TarEntry::Stream {
                source,
                size: Some(size),
                ..
            } => self.append_raw(&path, size, PackBody::Stream(source)).await,
            TarEntry::Stream {
                source, size: None, ..
            } => match spool(source).await {
                Ok((file, size)) => self.append_raw(&path, size, PackBody::File(file)).await,
                Err(e) => Err(e),
            },
        };

        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Write the archive trailer and wait for the upload to complete.
    pub async fn finalise(mut self) -> Result<u64> {
        let packer = self.packer.take().ok_or_else(aborted)?;
        let upload = self.upload.take().ok_or_else(aborted)?;

        if let Err(e) = packer.finish().await {
            upload.abort();
            return Err(e);
        }

        let size = upload.await.map_err(|e| {
            MirrorError::internal(format!("Archive upload task failed: {e}"))
        })??;
        tracing::info!(bucket = %self.bucket, key = %self.key, bytes = size, "Archive uploaded");
        Ok(size)
    }

    async fn append_raw(&self, path: &str, size: u64, body: PackBody) -> Result<()> {
        let packer = self.packer.as_ref().ok_or_else(aborted)?;
        packer.append(path, size, body).await
    }

    fn abort(&mut self) {
        self.packer = None;
        if let Some(upload) = self.upload.take() {
            upload.abort();
        }
    }
}

impl Drop for ArchiveUpload {
    fn drop(&mut self) {
        self.abort();
    }
}

fn aborted() -> MirrorError {
    MirrorError::Precondition("archive upload was already aborted".to_string())
}

/// Buffer a stream of unknown length into an anonymous temporary file.
async fn spool(mut source: ByteStream) -> Result<(std::fs::File, u64)> {
    let file = tempfile::tempfile()?;
    let mut file = tokio::fs::File::from_std(file);
    let mut size = 0u64;
    while let Some(chunk) = source.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    let mut file = file.into_std().await;
    file.seek(SeekFrom::Start(0))?;
    Ok((file, size))
}
