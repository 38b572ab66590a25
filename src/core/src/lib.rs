//! Model Mirror Core - Foundational Types and Abstractions
//!
//! This module provides the archive metadata, error model, configuration,
//! collaborator interfaces and job queue shared by the mirror crates.

pub mod config;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod model;
pub mod queue;
pub mod reference;
pub mod services;
pub mod storage;

// Re-export commonly used types
pub use config::MirrorConfig;
pub use error::{ErrorContext, MirrorError, Result, ResultExt};
pub use memory::{DeploymentSnapshot, MemoryDeployment};
pub use metadata::{ImportKind, ImportResult, MirrorInformation, MirrorKind, MirrorMetadata};
pub use queue::{Job, JobId, JobQueue, JobState};
pub use reference::{DistributionPackageName, PackageReference};
pub use services::{Authorizer, ByteStream, ModelRepository, ObjectStore};
pub use storage::{FsObjectStore, MemoryObjectStore};

/// Model Mirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
