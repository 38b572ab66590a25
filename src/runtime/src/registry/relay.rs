//! Blob relay between registries and archives.
//!
//! Blobs move one at a time in both directions and are never buffered whole;
//! only manifests are held in memory.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use sha2::{Digest, Sha256};

use modelmirror_core::error::{ErrorContext, MirrorError, Result};
use modelmirror_core::reference::DistributionPackageName;
use modelmirror_core::services::ByteStream;

use super::client::RegistryClient;
use crate::archive::{ArchiveUpload, EntryBody, TarEntry};

/// Archive entry holding the image manifest.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Archive directory holding config and layer blobs.
pub const BLOB_DIRECTORY: &str = "blobs/sha256";

/// Tar-safe entry name for a digest: `sha256:<hex>` → `blobs/sha256/<hex>`.
pub fn blob_entry_name(digest: &str) -> Result<String> {
    match digest.strip_prefix("sha256:") {
        Some(hex) if valid_sha256_hex(hex) => Ok(format!("{BLOB_DIRECTORY}/{hex}")),
        _ => Err(MirrorError::bad_request(format!(
            "Unsupported blob digest '{digest}', expected sha256:<64 hex>"
        ))),
    }
}

/// Canonical digest for a blob entry name: `blobs/sha256/<hex>` → `sha256:<hex>`.
pub fn digest_from_entry_name(name: &str) -> Result<String> {
    match name.strip_prefix(BLOB_DIRECTORY).and_then(|rest| rest.strip_prefix('/')) {
        Some(hex) if valid_sha256_hex(hex) => Ok(format!("sha256:{hex}")),
        _ => Err(MirrorError::bad_request(format!(
            "Archive entry '{name}' is not a valid blob name"
        ))),
    }
}

fn valid_sha256_hex(hex: &str) -> bool {
    hex.len() == 64
        && hex
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Write an image into an archive: the manifest first, then the config blob
/// and each layer in manifest order.
///
/// Returns the number of blobs written.
pub async fn relay_image_to_archive(
    registry: &RegistryClient,
    image: &DistributionPackageName,
    archive: &mut ArchiveUpload,
) -> Result<usize> {
    let repository = image.path.as_str();
    let fetched = registry
        .get_manifest(repository, image.reference.as_str())
        .await?;
    archive
        .add_entry(TarEntry::text(MANIFEST_ENTRY, fetched.raw.clone()))
        .await?;

    let descriptors = std::iter::once(fetched.manifest.config()).chain(fetched.manifest.layers());
    let mut written = 0;
    for descriptor in descriptors {
        let digest = descriptor.digest().to_string();
        let size = descriptor.size().max(0) as u64;
        let context = ErrorContext::new()
            .with("image", image)
            .with("digest", &digest);

        let entry_name = blob_entry_name(&digest)?;
        let blob = registry
            .get_blob(repository, &digest)
            .await
            .map_err(|e| e.wrap("Fetching image blob", context.clone()))?;

        // The archive owns the body from here; a failed entry drops it, which
        // closes the upstream response
        let body = VerifiedBlob::new(blob, &digest);
        archive
            .add_entry(TarEntry::stream(entry_name, Box::pin(body), Some(size)))
            .await
            .map_err(|e| e.wrap("Relaying image blob", context))?;

        tracing::debug!(image = %image, digest = %digest, bytes = size, "Relayed blob into archive");
        written += 1;
    }
    Ok(written)
}

/// Push one archive blob to a registry unless it is already there.
///
/// Returns `false` when the blob existed and the entry was drained instead.
pub async fn relay_blob_to_registry(
    registry: &RegistryClient,
    repository: &str,
    digest: &str,
    size: u64,
    body: EntryBody,
) -> Result<bool> {
    if registry.blob_exists(repository, digest).await? {
        let skipped = body.drain().await?;
        tracing::debug!(repository, digest, bytes = skipped, "Blob already present, skipped");
        return Ok(false);
    }

    let location = registry.initiate_upload(repository).await?;
    registry
        .put_blob(&location, digest, size, body.into_stream())
        .await?;
    tracing::debug!(repository, digest, bytes = size, "Uploaded blob");
    Ok(true)
}

/// Passes a blob through while hashing it, ending with an error item when
/// the content does not match its digest.
struct VerifiedBlob {
    inner: ByteStream,
    hasher: Option<Sha256>,
    expected: String,
}

impl VerifiedBlob {
    fn new(inner: ByteStream, digest: &str) -> Self {
        Self {
            inner,
            hasher: Some(Sha256::new()),
            expected: digest.trim_start_matches("sha256:").to_string(),
        }
    }
}

impl Stream for VerifiedBlob {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let hasher = match this.hasher.as_mut() {
            Some(hasher) => hasher,
            None => return Poll::Ready(None),
        };
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                hasher.update(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                let actual = match this.hasher.take() {
                    Some(hasher) => hex::encode(hasher.finalize()),
                    None => return Poll::Ready(None),
                };
                if actual == this.expected {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("blob content sha256:{actual} does not match sha256:{}", this.expected),
                    ))))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_blob_entry_name_conversions() {
        let digest = format!("sha256:{HEX}");
        let name = blob_entry_name(&digest).unwrap();
        assert_eq!(name, format!("blobs/sha256/{HEX}"));
        assert_eq!(digest_from_entry_name(&name).unwrap(), digest);
    }

    #[test]
    fn test_blob_names_rejected() {
        assert!(blob_entry_name("sha512:abcd").is_err());
        assert!(blob_entry_name("sha256:ABC").is_err());
        assert!(digest_from_entry_name("blobs/sha256/short").is_err());
        assert!(digest_from_entry_name(&format!("blobs/sha256/{}", HEX.to_uppercase())).is_err());
        assert!(digest_from_entry_name(&format!("layers/{HEX}")).is_err());
        assert!(digest_from_entry_name(&format!("blobs/sha256/{HEX}/x")).is_err());
    }

    fn stream_of(data: &'static [u8]) -> ByteStream {
        Box::pin(futures::stream::iter([Ok(Bytes::from_static(data))]))
    }

    #[tokio::test]
    async fn test_verified_blob_matches() {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(b"layer")));
        let mut blob = VerifiedBlob::new(stream_of(b"layer"), &digest);
        assert_eq!(blob.next().await.unwrap().unwrap(), Bytes::from_static(b"layer"));
        assert!(blob.next().await.is_none());
    }

    #[tokio::test]
    async fn test_verified_blob_mismatch() {
        let digest = format!("sha256:{HEX}");
        let mut blob = VerifiedBlob::new(stream_of(b"tampered"), &digest);
        assert!(blob.next().await.unwrap().is_ok());
        assert!(blob.next().await.unwrap().is_err());
        assert!(blob.next().await.is_none());
    }
}
