//! In-memory deployment used by tests and by the CLI's local state directory.
//!
//! Holds every document the mirror reads or writes, plus per-user model grants
//! that drive authorization. The whole state round-trips through a JSON
//! snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::model::{
    AuthResponse, FileRecord, Model, ModelAction, ModelCardPointer, ModelCardRevision, Release,
    ReleaseAction, User,
};
use crate::services::{Authorizer, ModelRepository};

/// Actions a user may perform on one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub user: String,
    pub model_id: String,
    pub actions: Vec<ModelAction>,
}

/// Serializable deployment state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentSnapshot {
    pub models: Vec<Model>,
    pub model_cards: Vec<ModelCardRevision>,
    pub releases: Vec<Release>,
    pub files: Vec<FileRecord>,
    pub grants: Vec<Grant>,
}

#[derive(Default)]
struct DeploymentState {
    models: BTreeMap<String, Model>,
    model_cards: BTreeMap<(String, u32), ModelCardRevision>,
    releases: BTreeMap<(String, String), Release>,
    files: BTreeMap<String, FileRecord>,
    grants: BTreeMap<(String, String), BTreeSet<ModelAction>>,
}

/// Model repository and authorizer backed by in-memory maps.
#[derive(Default)]
pub struct MemoryDeployment {
    state: RwLock<DeploymentState>,
}

impl MemoryDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: DeploymentSnapshot) -> Self {
        let deployment = Self::new();
        {
            let mut state = deployment.state.write();
            for model in snapshot.models {
                state.models.insert(model.id.clone(), model);
            }
            for card in snapshot.model_cards {
                state
                    .model_cards
                    .insert((card.model_id.clone(), card.version), card);
            }
            for release in snapshot.releases {
                state
                    .releases
                    .insert((release.model_id.clone(), release.semver.clone()), release);
            }
            for file in snapshot.files {
                state.files.insert(file.id.clone(), file);
            }
            for grant in snapshot.grants {
                state
                    .grants
                    .entry((grant.user, grant.model_id))
                    .or_default()
                    .extend(grant.actions);
            }
        }
        deployment
    }

    pub fn snapshot(&self) -> DeploymentSnapshot {
        let state = self.state.read();
        DeploymentSnapshot {
            models: state.models.values().cloned().collect(),
            model_cards: state.model_cards.values().cloned().collect(),
            releases: state.releases.values().cloned().collect(),
            files: state.files.values().cloned().collect(),
            grants: state
                .grants
                .iter()
                .map(|((user, model_id), actions)| Grant {
                    user: user.clone(),
                    model_id: model_id.clone(),
                    actions: actions.iter().copied().collect(),
                })
                .collect(),
        }
    }

    /// Load a snapshot file. A missing file yields an empty deployment.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read(path)?;
        let snapshot: DeploymentSnapshot = serde_json::from_slice(&raw)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the snapshot atomically (write to .tmp, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_vec_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, raw)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn insert_model(&self, model: Model) {
        self.state.write().models.insert(model.id.clone(), model);
    }

    pub fn insert_model_card(&self, card: ModelCardRevision) {
        self.state
            .write()
            .model_cards
            .insert((card.model_id.clone(), card.version), card);
    }

    pub fn insert_release(&self, release: Release) {
        self.state
            .write()
            .releases
            .insert((release.model_id.clone(), release.semver.clone()), release);
    }

    pub fn insert_file(&self, file: FileRecord) {
        self.state.write().files.insert(file.id.clone(), file);
    }

    /// Grant `actions` on `model_id` to `user`.
    pub fn grant(&self, user: &str, model_id: &str, actions: &[ModelAction]) {
        self.state
            .write()
            .grants
            .entry((user.to_string(), model_id.to_string()))
            .or_default()
            .extend(actions.iter().copied());
    }

    fn allowed(&self, user: &User, model_id: &str, action: ModelAction) -> bool {
        self.state
            .read()
            .grants
            .get(&(user.dn.clone(), model_id.to_string()))
            .is_some_and(|actions| actions.contains(&action))
    }
}

#[async_trait]
impl ModelRepository for MemoryDeployment {
    async fn get_model(&self, model_id: &str) -> Result<Model> {
        self.state
            .read()
            .models
            .get(model_id)
            .cloned()
            .ok_or_else(|| {
                MirrorError::not_found(format!("The requested model '{model_id}' was not found"))
                    .with_context("modelId", model_id)
            })
    }

    async fn get_model_card_revisions(&self, model_id: &str) -> Result<Vec<ModelCardRevision>> {
        Ok(self
            .state
            .read()
            .model_cards
            .values()
            .filter(|card| card.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn save_model_card_revision(&self, revision: ModelCardRevision) -> Result<()> {
        self.insert_model_card(revision);
        Ok(())
    }

    async fn set_latest_model_card(&self, model_id: &str, version: u32) -> Result<()> {
        let mut state = self.state.write();
        let schema_id = state
            .model_cards
            .get(&(model_id.to_string(), version))
            .map(|card| card.schema_id.clone())
            .ok_or_else(|| {
                MirrorError::not_found(format!(
                    "Model card version {version} was not found on model '{model_id}'"
                ))
            })?;
        let model = state.models.get_mut(model_id).ok_or_else(|| {
            MirrorError::not_found(format!("The requested model '{model_id}' was not found"))
        })?;
        model.card = Some(ModelCardPointer { version, schema_id });
        Ok(())
    }

    async fn get_releases(&self, model_id: &str, semvers: &[String]) -> Result<Vec<Release>> {
        let state = self.state.read();
        let mut found = Vec::with_capacity(semvers.len());
        let mut missing = Vec::new();
        for semver in semvers {
            match state.releases.get(&(model_id.to_string(), semver.clone())) {
                Some(release) => found.push(release.clone()),
                None => missing.push(semver.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(MirrorError::not_found(format!(
                "The following releases were not found: {}",
                missing.join(", ")
            ))
            .with_context("modelId", model_id)
            .with_context("semvers", missing.join(",")));
        }
        Ok(found)
    }

    async fn find_release(&self, model_id: &str, semver: &str) -> Result<Option<Release>> {
        Ok(self
            .state
            .read()
            .releases
            .get(&(model_id.to_string(), semver.to_string()))
            .cloned())
    }

    async fn save_release(&self, release: Release) -> Result<()> {
        self.insert_release(release);
        Ok(())
    }

    async fn get_files(&self, model_id: &str, file_ids: &[String]) -> Result<Vec<FileRecord>> {
        let state = self.state.read();
        let mut found = Vec::with_capacity(file_ids.len());
        let mut missing = Vec::new();
        for file_id in file_ids {
            match state.files.get(file_id) {
                Some(file) if file.model_id == model_id => found.push(file.clone()),
                _ => missing.push(file_id.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(MirrorError::not_found(format!(
                "The following files were not found: {}",
                missing.join(", ")
            ))
            .with_context("modelId", model_id));
        }
        Ok(found)
    }

    async fn get_file(&self, file_id: &str) -> Result<FileRecord> {
        self.state.read().files.get(file_id).cloned().ok_or_else(|| {
            MirrorError::not_found(format!("The requested file '{file_id}' was not found"))
                .with_context("fileId", file_id)
        })
    }

    async fn save_file(&self, file: FileRecord) -> Result<()> {
        self.insert_file(file);
        Ok(())
    }
}

#[async_trait]
impl Authorizer for MemoryDeployment {
    async fn model(&self, user: &User, model: &Model, action: ModelAction) -> AuthResponse {
        if self.allowed(user, &model.id, action) {
            AuthResponse::allow()
        } else {
            AuthResponse::deny(format!(
                "You do not have permission to {} model '{}'",
                model_verb(action),
                model.id
            ))
        }
    }

    async fn release(
        &self,
        user: &User,
        model: &Model,
        release: &Release,
        action: ReleaseAction,
    ) -> AuthResponse {
        let required = match action {
            ReleaseAction::View => ModelAction::View,
            ReleaseAction::Create | ReleaseAction::Update => ModelAction::Write,
        };
        if self.allowed(user, &model.id, required) {
            AuthResponse::allow()
        } else {
            AuthResponse::deny(format!(
                "You do not have permission to {} release '{}' on model '{}'",
                release_verb(action),
                release.semver,
                model.id
            ))
        }
    }
}

fn model_verb(action: ModelAction) -> &'static str {
    match action {
        ModelAction::View => "view",
        ModelAction::Write => "update",
        ModelAction::Import => "import into",
    }
}

fn release_verb(action: ReleaseAction) -> &'static str {
    match action {
        ReleaseAction::View => "view",
        ReleaseAction::Create => "create",
        ReleaseAction::Update => "update",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MirrorSettings, ModelSettings};
    use chrono::Utc;

    fn model(id: &str) -> Model {
        Model {
            id: id.to_string(),
            name: id.to_string(),
            card: None,
            settings: ModelSettings {
                mirror: MirrorSettings::default(),
            },
        }
    }

    fn release(model_id: &str, semver: &str) -> Release {
        Release {
            model_id: model_id.to_string(),
            semver: semver.to_string(),
            notes: String::new(),
            minor: false,
            draft: false,
            file_ids: vec![],
            images: vec![],
            created_by: "alice".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_model_not_found() {
        let deployment = MemoryDeployment::new();
        let error = deployment.get_model("missing").await.unwrap_err();
        assert_eq!(error.status_code(), 404);
    }

    #[tokio::test]
    async fn test_get_releases_reports_all_missing() {
        let deployment = MemoryDeployment::new();
        deployment.insert_release(release("m1", "1.0.0"));
        let error = deployment
            .get_releases(
                "m1",
                &["1.0.0".to_string(), "2.0.0".to_string(), "3.0.0".to_string()],
            )
            .await
            .unwrap_err();
        assert!(error.to_string().contains("2.0.0, 3.0.0"));
    }

    #[tokio::test]
    async fn test_release_authorization_follows_model_grants() {
        let deployment = MemoryDeployment::new();
        let user = User::new("alice");
        let m = model("m1");
        let r = release("m1", "1.0.0");
        deployment.grant("alice", "m1", &[ModelAction::View, ModelAction::Import]);

        assert!(deployment.release(&user, &m, &r, ReleaseAction::View).await.success);
        let denied = deployment.release(&user, &m, &r, ReleaseAction::Create).await;
        assert!(!denied.success);
        assert!(denied.info.contains("create release '1.0.0'"));
    }

    #[tokio::test]
    async fn test_set_latest_model_card() {
        let deployment = MemoryDeployment::new();
        deployment.insert_model(model("m1"));
        deployment.insert_model_card(ModelCardRevision {
            model_id: "m1".to_string(),
            version: 3,
            schema_id: "minimal".to_string(),
            metadata: serde_json::json!({}),
            created_by: "alice".to_string(),
            created_at: Utc::now(),
        });
        deployment.set_latest_model_card("m1", 3).await.unwrap();
        let card = deployment.get_model("m1").await.unwrap().card.unwrap();
        assert_eq!(card.version, 3);
        assert!(deployment.set_latest_model_card("m1", 4).await.is_err());
    }

    #[test]
    fn test_snapshot_roundtrip_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let deployment = MemoryDeployment::new();
        deployment.insert_model(model("m1"));
        deployment.insert_release(release("m1", "1.0.0"));
        deployment.grant("alice", "m1", &[ModelAction::View]);
        deployment.save(&path).unwrap();

        let loaded = MemoryDeployment::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), deployment.snapshot());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let loaded = MemoryDeployment::load(Path::new("/nonexistent/state.json")).unwrap();
        assert!(loaded.snapshot().models.is_empty());
    }
}
