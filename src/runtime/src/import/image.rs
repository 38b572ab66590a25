use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use oci_spec::image::ImageManifest;

use modelmirror_core::error::{ErrorContext, MirrorError, Result};
use modelmirror_core::metadata::{ImportResult, MirrorInformation, MirrorKind, MirrorMetadata};
use modelmirror_core::reference::DistributionPackageName;

use super::{content_relative, Importer};
use crate::archive::{EntryKind, UnpackedEntry};
use crate::context::MirrorContext;
use crate::registry::{
    digest_from_entry_name, relay_blob_to_registry, DEFAULT_MANIFEST_MEDIA_TYPE, MANIFEST_ENTRY,
};

/// Pushes an image archive into the local registry under the mirrored
/// model's repository. Blobs go up as they arrive; the manifest goes last.
pub struct ImageImporter {
    ctx: MirrorContext,
    metadata: MirrorMetadata,
    target: DistributionPackageName,
    manifest: Option<(ImageManifest, Bytes)>,
    received: HashSet<String>,
    uploaded: usize,
    skipped: usize,
}

impl ImageImporter {
    pub fn new(ctx: MirrorContext, metadata: MirrorMetadata) -> Result<Self> {
        let source = match &metadata.kind {
            MirrorKind::Image {
                distribution_package_name,
            } => DistributionPackageName::split(distribution_package_name)?,
            other => {
                return Err(MirrorError::internal(format!(
                    "Image importer built for {} metadata",
                    other.import_kind()
                )))
            }
        };
        let target = source.rebase(
            Some(ctx.config.registry.domain.clone()),
            &metadata.mirrored_model_id,
        )?;
        Ok(Self {
            ctx,
            metadata,
            target,
            manifest: None,
            received: HashSet::new(),
            uploaded: 0,
            skipped: 0,
        })
    }

    pub fn target(&self) -> &DistributionPackageName {
        &self.target
    }

    async fn read_manifest(&mut self, entry: UnpackedEntry) -> Result<()> {
        if self.manifest.is_some() {
            return Err(MirrorError::bad_request(
                "Image archive contains more than one manifest",
            ));
        }
        let raw = entry
            .body
            .read_to_end(self.ctx.config.import.max_document_size)
            .await?;
        let manifest: ImageManifest = serde_json::from_slice(&raw).map_err(|e| {
            MirrorError::bad_request(format!("Image manifest is not valid: {e}"))
        })?;
        self.manifest = Some((manifest, raw));
        Ok(())
    }

    async fn relay_blob(&mut self, name: &str, entry: UnpackedEntry) -> Result<()> {
        let digest = digest_from_entry_name(name)?;
        let pushed = relay_blob_to_registry(
            &self.ctx.registry,
            &self.target.path,
            &digest,
            entry.size,
            entry.body,
        )
        .await
        .map_err(|e| {
            e.wrap(
                "Error when pushing image blob",
                ErrorContext::new()
                    .with("image", &self.target)
                    .with("digest", &digest),
            )
        })?;
        if pushed {
            self.uploaded += 1;
        } else {
            self.skipped += 1;
        }
        self.received.insert(digest);
        Ok(())
    }

    /// Every blob the manifest references must have been in the archive or
    /// already be in the registry.
    async fn check_blobs(&self, manifest: &ImageManifest) -> Result<()> {
        let digests = std::iter::once(manifest.config())
            .chain(manifest.layers().iter())
            .map(|descriptor| descriptor.digest().to_string());

        let mut missing = Vec::new();
        for digest in digests {
            if self.received.contains(&digest) {
                continue;
            }
            if !self
                .ctx
                .registry
                .blob_exists(&self.target.path, &digest)
                .await?
            {
                missing.push(MirrorError::bad_request("Blob missing from image archive")
                    .with_context("digest", digest));
            }
        }
        match MirrorError::aggregate("Image archive is incomplete", missing) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn manifest_media_type(raw: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| value.get("mediaType")?.as_str().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_MANIFEST_MEDIA_TYPE.to_string())
}

#[async_trait]
impl Importer for ImageImporter {
    async fn process_entry(&mut self, entry: UnpackedEntry) -> Result<()> {
        if entry.kind != EntryKind::File {
            tracing::debug!(path = %entry.path, kind = ?entry.kind, "Skipping non-file entry");
            return Ok(());
        }
        let name = match content_relative(&self.ctx.config.content_directory, &entry.path) {
            Some(name) => name.to_string(),
            None => {
                return Err(MirrorError::bad_request(
                    "Mirror archive contains unrecognised contents",
                )
                .with_context("entry", &entry.path))
            }
        };

        if name == MANIFEST_ENTRY {
            self.read_manifest(entry).await
        } else {
            self.relay_blob(&name, entry).await
        }
    }

    async fn finish(self: Box<Self>) -> Result<MirrorInformation> {
        let (manifest, raw) = match &self.manifest {
            Some(manifest) => manifest,
            None => {
                return Err(MirrorError::bad_request("Image archive contains no manifest")
                    .with_context("image", &self.target))
            }
        };
        self.check_blobs(manifest).await?;

        let media_type = manifest_media_type(raw);
        self.ctx
            .registry
            .put_manifest(
                &self.target.path,
                self.target.reference.as_str(),
                &media_type,
                raw.clone(),
            )
            .await
            .map_err(|e| {
                e.wrap(
                    "Error when pushing image manifest",
                    ErrorContext::new().with("image", &self.target),
                )
            })?;

        tracing::info!(
            image = %self.target,
            uploaded = self.uploaded,
            skipped = self.skipped,
            "Imported image"
        );
        let image_id = self.target.join();
        Ok(MirrorInformation {
            metadata: self.metadata,
            result: ImportResult::Image { image_id },
        })
    }

    fn metadata(&self) -> &MirrorMetadata {
        &self.metadata
    }

    fn handle_stream_error(&self, error: MirrorError) -> MirrorError {
        error.wrap(
            "Error reading image archive",
            ErrorContext::new()
                .with("image", &self.target)
                .with("mirroredModelId", &self.metadata.mirrored_model_id),
        )
    }

    fn importer_type(&self) -> &'static str {
        "image"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_media_type() {
        let raw = br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json"}"#;
        assert_eq!(
            manifest_media_type(raw),
            "application/vnd.docker.distribution.manifest.v2+json"
        );
        assert_eq!(manifest_media_type(b"{}"), DEFAULT_MANIFEST_MEDIA_TYPE);
    }
}
