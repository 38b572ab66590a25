//! Local deployment state for the CLI.
//!
//! A state directory holds `state.json`, the snapshot of models, releases,
//! files and grants, and `objects/`, the object store root. Commands load
//! it, act on it, and save the snapshot back atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use modelmirror_core::config::MirrorConfig;
use modelmirror_core::memory::MemoryDeployment;
use modelmirror_core::storage::FsObjectStore;
use modelmirror_runtime::MirrorContext;

/// Snapshot file name inside the state directory.
pub const STATE_FILE: &str = "state.json";

/// Object store root inside the state directory.
pub const OBJECTS_DIR: &str = "objects";

/// A loaded state directory.
pub struct Workspace {
    dir: PathBuf,
    deployment: Arc<MemoryDeployment>,
    objects: Arc<FsObjectStore>,
}

impl Workspace {
    /// Load a state directory, creating it if it doesn't exist.
    pub fn open(dir: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(dir.join(OBJECTS_DIR))?;
        let deployment = MemoryDeployment::load(&dir.join(STATE_FILE))?;
        tracing::debug!(state = %dir.display(), "Opened state directory");
        Ok(Self {
            dir: dir.to_path_buf(),
            deployment: Arc::new(deployment),
            objects: Arc::new(FsObjectStore::new(dir.join(OBJECTS_DIR))),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn deployment(&self) -> &Arc<MemoryDeployment> {
        &self.deployment
    }

    pub fn objects(&self) -> &Arc<FsObjectStore> {
        &self.objects
    }

    /// Build the mirror context over this workspace.
    pub fn context(&self, config: MirrorConfig) -> Result<MirrorContext, Box<dyn std::error::Error>> {
        let ctx = MirrorContext::new(
            config,
            self.deployment.clone(),
            self.deployment.clone(),
            self.objects.clone(),
        )?;
        Ok(ctx)
    }

    /// Persist the snapshot.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.deployment.save(&self.dir.join(STATE_FILE))?;
        Ok(())
    }
}

/// Load the config file if given, else the defaults.
pub fn load_config(path: Option<&Path>) -> Result<MirrorConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(MirrorConfig::from_file(path)?),
        None => Ok(MirrorConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelmirror_core::model::{Model, ModelSettings};
    use modelmirror_core::services::ModelRepository;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("state");

        let workspace = Workspace::open(&dir).unwrap();
        assert!(dir.join(OBJECTS_DIR).is_dir());
        assert_eq!(workspace.objects().root(), dir.join(OBJECTS_DIR));
        assert!(!dir.join(STATE_FILE).exists());
    }

    #[tokio::test]
    async fn test_save_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let workspace = Workspace::open(tmp.path()).unwrap();
        workspace.deployment().insert_model(Model {
            id: "m1".to_string(),
            name: "Model".to_string(),
            card: None,
            settings: ModelSettings::default(),
        });
        workspace.save().unwrap();
        assert!(!tmp.path().join("state.json.tmp").exists());

        let reopened = Workspace::open(tmp.path()).unwrap();
        let model = reopened.deployment().get_model("m1").await.unwrap();
        assert_eq!(model.name, "Model");
    }

    #[test]
    fn test_load_config_default() {
        let config = load_config(None).unwrap();
        assert_eq!(config, MirrorConfig::default());
    }

    #[test]
    fn test_load_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mirror.yaml");
        std::fs::write(&path, "export:\n  bucket: outbound\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.export.bucket, "outbound");
    }
}
