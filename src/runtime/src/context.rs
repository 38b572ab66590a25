//! Shared collaborators of exporters, importers and services.

use std::sync::Arc;

use modelmirror_core::config::MirrorConfig;
use modelmirror_core::error::Result;
use modelmirror_core::services::{Authorizer, ModelRepository, ObjectStore};

use crate::registry::RegistryClient;

/// Everything a transfer needs from its deployment. Cheap to clone.
#[derive(Clone)]
pub struct MirrorContext {
    pub config: Arc<MirrorConfig>,
    pub models: Arc<dyn ModelRepository>,
    pub authorizer: Arc<dyn Authorizer>,
    pub objects: Arc<dyn ObjectStore>,
    pub registry: Arc<RegistryClient>,
}

impl MirrorContext {
    /// Build a context with a registry client from `config.registry`.
    pub fn new(
        config: MirrorConfig,
        models: Arc<dyn ModelRepository>,
        authorizer: Arc<dyn Authorizer>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(RegistryClient::new(&config.registry)?);
        Ok(Self {
            config: Arc::new(config),
            models,
            authorizer,
            objects,
            registry,
        })
    }

    pub fn with_registry(mut self, registry: RegistryClient) -> Self {
        self.registry = Arc::new(registry);
        self
    }
}
