use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use modelmirror_core::error::{ErrorContext, MirrorError, Result};
use modelmirror_core::metadata::MirrorKind;
use modelmirror_core::model::{
    FileRecord, ImageRef, Model, ModelAction, Release, ReleaseAction, ScanVerdict, User,
};

use super::{authorize_model, mirrored_model_id, ExportPlan, ExportSource};
use crate::archive::{ArchiveUpload, TarEntry};
use crate::context::MirrorContext;

/// Exports a model's card revisions, a set of releases and the metadata of
/// every file those releases reference.
pub struct DocumentsExport {
    model_id: String,
    semvers: Vec<String>,
    releases: Vec<Release>,
    files: BTreeMap<String, FileRecord>,
}

/// Work queued once the documents archive is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowUps {
    pub file_ids: Vec<String>,
    pub images: Vec<ImageRef>,
}

impl DocumentsExport {
    pub fn new(model_id: impl Into<String>, semvers: Vec<String>) -> Self {
        Self {
            model_id: model_id.into(),
            semvers,
            releases: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Distinct files and images referenced by the exported releases.
    pub fn follow_ups(&self) -> FollowUps {
        let images: BTreeSet<ImageRef> = self
            .releases
            .iter()
            .flat_map(|release| release.images.iter().cloned())
            .collect();
        FollowUps {
            file_ids: self.files.keys().cloned().collect(),
            images: images.into_iter().collect(),
        }
    }

    async fn check_release_access(
        &self,
        ctx: &MirrorContext,
        user: &User,
        model: &Model,
    ) -> Result<()> {
        let mut denied = Vec::new();
        for release in &self.releases {
            let auth = ctx
                .authorizer
                .release(user, model, release, ReleaseAction::View)
                .await;
            if !auth.success {
                denied.push(
                    MirrorError::forbidden(auth.info).with_context("semver", &release.semver),
                );
            }
        }
        match MirrorError::aggregate("Access denied to releases", denied) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_size(&self, ctx: &MirrorContext) -> Result<()> {
        let total: u64 = self.files.values().map(|file| file.size).sum();
        let max_size = ctx.config.export.max_size;
        if total > max_size {
            return Err(MirrorError::bad_request("Requested export is too large")
                .with_context("modelId", &self.model_id)
                .with_context("size", total)
                .with_context("maxSize", max_size));
        }
        Ok(())
    }

    fn check_scans(&self, ctx: &MirrorContext) -> Result<()> {
        if !ctx.config.scanning_enabled() {
            return Ok(());
        }

        let mut missing = Vec::new();
        let mut incomplete = Vec::new();
        let mut failed = Vec::new();
        for file in self.files.values() {
            match file.scan_verdict() {
                ScanVerdict::Clean => {}
                ScanVerdict::Missing => missing.push(file.id.as_str()),
                ScanVerdict::Incomplete => incomplete.push(file.id.as_str()),
                ScanVerdict::Failed => failed.push(file.id.as_str()),
            }
        }
        if missing.is_empty() && incomplete.is_empty() && failed.is_empty() {
            return Ok(());
        }

        let mut error = MirrorError::bad_request(
            "The releases contain file(s) that do not have a clean AV scan",
        )
        .with_context("modelId", &self.model_id);
        for (bucket, ids) in [
            ("missingScan", &missing),
            ("incompleteScan", &incomplete),
            ("failedScan", &failed),
        ] {
            if !ids.is_empty() {
                error = error.with_context(bucket, ids.join(","));
            }
        }
        Err(error)
    }
}

#[async_trait]
impl ExportSource for DocumentsExport {
    async fn prepare(&mut self, ctx: &MirrorContext, user: &User) -> Result<ExportPlan> {
        let model = ctx.models.get_model(&self.model_id).await?;
        let mirrored_model_id = mirrored_model_id(&model)?;
        if model.card.is_none() {
            return Err(MirrorError::bad_request(format!(
                "Model '{}' has no model card to export",
                model.id
            ))
            .with_context("modelId", &model.id));
        }
        authorize_model(ctx, user, &model, ModelAction::View).await?;

        self.releases = ctx.models.get_releases(&model.id, &self.semvers).await?;
        self.check_release_access(ctx, user, &model).await?;

        let file_ids: BTreeSet<String> = self
            .releases
            .iter()
            .flat_map(|release| release.file_ids.iter().cloned())
            .collect();
        let file_ids: Vec<String> = file_ids.into_iter().collect();
        self.files = ctx
            .models
            .get_files(&model.id, &file_ids)
            .await?
            .into_iter()
            .map(|file| (file.id.clone(), file))
            .collect();

        self.check_size(ctx)?;
        self.check_scans(ctx)?;

        let plan = ExportPlan {
            source_model_id: model.id.clone(),
            mirrored_model_id,
            kind: MirrorKind::Documents {
                release_semvers: self.releases.iter().map(|r| r.semver.clone()).collect(),
            },
        };
        Ok(plan)
    }

    async fn write_content(
        &mut self,
        ctx: &MirrorContext,
        archive: &mut ArchiveUpload,
    ) -> Result<()> {
        let model_id = self.model_id.clone();
        let cards = ctx
            .models
            .get_model_card_revisions(&model_id)
            .await
            .map_err(|e| {
                e.wrap(
                    "Error when fetching model cards",
                    ErrorContext::new().with("modelId", &model_id),
                )
            })?;

        let mut errors = Vec::new();
        for card in &cards {
            let written = match TarEntry::json(format!("{}.json", card.version), card) {
                Ok(entry) => archive.add_entry(entry).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                errors.push(e.wrap(
                    "Error when adding model card to export",
                    ErrorContext::new()
                        .with("modelId", &model_id)
                        .with("version", card.version),
                ));
                if archive.is_aborted() {
                    break;
                }
            }
        }
        tracing::debug!(model_id = %model_id, count = cards.len(), "Added model cards");

        let mut written_files = BTreeSet::new();
        for release in &self.releases {
            if archive.is_aborted() {
                break;
            }
            let context = ErrorContext::new()
                .with("modelId", &model_id)
                .with("semver", &release.semver);

            let entry = TarEntry::json(format!("releases/{}.json", release.semver), release);
            let added = match entry {
                Ok(entry) => archive.add_entry(entry).await,
                Err(e) => Err(e),
            };
            if let Err(e) = added {
                errors.push(e.wrap("Error when adding release to export", context));
                continue;
            }

            for file_id in &release.file_ids {
                if archive.is_aborted() {
                    break;
                }
                if !written_files.insert(file_id.clone()) {
                    continue;
                }
                let added = match self.files.get(file_id) {
                    Some(file) => match TarEntry::json(format!("files/{file_id}.json"), file) {
                        Ok(entry) => archive.add_entry(entry).await,
                        Err(e) => Err(e),
                    },
                    None => Err(MirrorError::not_found(format!(
                        "File '{file_id}' was not resolved during export"
                    ))),
                };
                if let Err(e) = added {
                    errors.push(e.wrap(
                        "Error when adding file to export",
                        context.clone().with("fileId", file_id),
                    ));
                }
            }
            tracing::debug!(semver = %release.semver, files = release.file_ids.len(), "Added release");
        }

        match MirrorError::aggregate("Error when adding data to export", errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn source_type(&self) -> &'static str {
        "documents"
    }
}
