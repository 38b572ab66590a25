use std::collections::HashSet;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use modelmirror_core::error::{MirrorError, Result};
use modelmirror_core::metadata::{ImportResult, MirrorInformation, MirrorMetadata};
use modelmirror_core::model::{FileRecord, Model, ModelCardRevision, Release, ReleaseAction, User};
use modelmirror_core::reference::{DistributionPackageName, PackageReference};

use super::{content_relative, Importer};
use crate::archive::{EntryKind, UnpackedEntry};
use crate::context::MirrorContext;

/// Where a documents archive entry belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DocumentPath {
    ModelCard(u32),
    Release(String),
    File(String),
}

impl DocumentPath {
    /// `<version>.json`, `releases/<semver>.json` or `files/<id>.json`.
    fn classify(relative: &str) -> Option<Self> {
        fn json_stem(name: &str) -> Option<&str> {
            name.strip_suffix(".json")
                .filter(|stem| !stem.is_empty() && !stem.contains('/'))
        }

        if let Some(name) = relative.strip_prefix("releases/") {
            return json_stem(name).map(|semver| DocumentPath::Release(semver.to_string()));
        }
        if let Some(name) = relative.strip_prefix("files/") {
            return json_stem(name).map(|id| DocumentPath::File(id.to_string()));
        }
        json_stem(relative)
            .and_then(|version| version.parse().ok())
            .map(DocumentPath::ModelCard)
    }
}

/// Re-homes model card revisions, releases and file records onto the
/// mirrored model.
pub struct DocumentsImporter {
    ctx: MirrorContext,
    user: User,
    metadata: MirrorMetadata,
    model: Model,
    model_card_versions: Vec<u32>,
    release_semvers: Vec<String>,
    file_ids: Vec<String>,
    image_ids: Vec<String>,
    seen_semvers: HashSet<String>,
}

impl DocumentsImporter {
    pub fn new(ctx: MirrorContext, user: User, metadata: MirrorMetadata, model: Model) -> Self {
        Self {
            ctx,
            user,
            metadata,
            model,
            model_card_versions: Vec::new(),
            release_semvers: Vec::new(),
            file_ids: Vec::new(),
            image_ids: Vec::new(),
            seen_semvers: HashSet::new(),
        }
    }

    fn mirrored_model_id(&self) -> &str {
        &self.model.id
    }

    async fn read_document<T: DeserializeOwned>(&self, entry: UnpackedEntry) -> Result<T> {
        let path = entry.path;
        let raw = entry
            .body
            .read_to_end(self.ctx.config.import.max_document_size)
            .await?;
        serde_json::from_slice(&raw).map_err(|e| {
            MirrorError::bad_request(format!("Archive entry is not a valid document: {e}"))
                .with_context("entry", path)
        })
    }

    async fn import_model_card(&mut self, version: u32, entry: UnpackedEntry) -> Result<()> {
        let mut revision: ModelCardRevision = self.read_document(entry).await?;
        if revision.version != version {
            return Err(MirrorError::bad_request(format!(
                "Model card entry for version {version} holds version {}",
                revision.version
            )));
        }
        revision.model_id = self.mirrored_model_id().to_string();
        self.ctx.models.save_model_card_revision(revision).await?;
        self.model_card_versions.push(version);
        Ok(())
    }

    async fn import_release(&mut self, semver: String, entry: UnpackedEntry) -> Result<()> {
        let mut release: Release = self.read_document(entry).await?;
        if release.semver != semver {
            return Err(MirrorError::bad_request(format!(
                "Release entry for '{semver}' holds release '{}'",
                release.semver
            )));
        }
        if !self.seen_semvers.insert(semver.clone()) {
            return Err(MirrorError::bad_request(format!(
                "Archive contains release '{semver}' more than once"
            )));
        }

        let mirrored_model_id = self.mirrored_model_id().to_string();
        release.model_id = mirrored_model_id.clone();

        let mut image_ids = Vec::with_capacity(release.images.len());
        for image in &mut release.images {
            let source = DistributionPackageName::new(
                None,
                format!("{}/{}", image.repository, image.name),
                PackageReference::Tag(image.tag.clone()),
            )?;
            let target =
                source.rebase(Some(self.ctx.config.registry.domain.clone()), &mirrored_model_id)?;
            image.repository = mirrored_model_id.clone();
            image_ids.push(target.join());
        }

        let action = match self
            .ctx
            .models
            .find_release(&mirrored_model_id, &semver)
            .await?
        {
            Some(_) => ReleaseAction::Update,
            None => ReleaseAction::Create,
        };
        let auth = self
            .ctx
            .authorizer
            .release(&self.user, &self.model, &release, action)
            .await;
        if !auth.success {
            return Err(MirrorError::forbidden(auth.info)
                .with_context("mirroredModelId", &mirrored_model_id)
                .with_context("semver", &semver));
        }

        self.ctx.models.save_release(release).await?;
        tracing::debug!(semver = %semver, action = ?action, "Imported release");
        self.release_semvers.push(semver);
        self.image_ids.extend(image_ids);
        Ok(())
    }

    async fn import_file(&mut self, file_id: String, entry: UnpackedEntry) -> Result<()> {
        let mut file: FileRecord = self.read_document(entry).await?;
        if file.id != file_id {
            return Err(MirrorError::bad_request(format!(
                "File entry for '{file_id}' holds file '{}'",
                file.id
            )));
        }
        file.model_id = self.mirrored_model_id().to_string();
        file.bucket = self.ctx.config.import.uploads_bucket.clone();
        self.ctx.models.save_file(file).await?;
        self.file_ids.push(file_id);
        Ok(())
    }
}

#[async_trait]
impl Importer for DocumentsImporter {
    async fn process_entry(&mut self, entry: UnpackedEntry) -> Result<()> {
        if entry.kind != EntryKind::File {
            tracing::debug!(path = %entry.path, kind = ?entry.kind, "Skipping non-file entry");
            return Ok(());
        }

        let document = content_relative(&self.ctx.config.content_directory, &entry.path)
            .and_then(DocumentPath::classify);
        match document {
            Some(DocumentPath::ModelCard(version)) => self.import_model_card(version, entry).await,
            Some(DocumentPath::Release(semver)) => self.import_release(semver, entry).await,
            Some(DocumentPath::File(file_id)) => self.import_file(file_id, entry).await,
            None => Err(MirrorError::bad_request(
                "Mirror archive contains unrecognised contents",
            )
            .with_context("entry", &entry.path)),
        }
    }

    async fn finish(self: Box<Self>) -> Result<MirrorInformation> {
        if let Some(latest) = self.model_card_versions.iter().max() {
            self.ctx
                .models
                .set_latest_model_card(&self.model.id, *latest)
                .await?;
        }

        tracing::info!(
            model_cards = self.model_card_versions.len(),
            releases = self.release_semvers.len(),
            files = self.file_ids.len(),
            images = self.image_ids.len(),
            "Imported documents"
        );

        let this = *self;
        Ok(MirrorInformation {
            metadata: this.metadata,
            result: ImportResult::Documents {
                model_card_versions: this.model_card_versions,
                release_semvers: this.release_semvers,
                file_ids: this.file_ids,
                image_ids: this.image_ids,
            },
        })
    }

    fn metadata(&self) -> &MirrorMetadata {
        &self.metadata
    }

    fn importer_type(&self) -> &'static str {
        "documents"
    }
}
