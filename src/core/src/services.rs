//! Narrow interfaces to the platform the mirror runs inside.
//!
//! Persistence, authorization and object storage belong to the surrounding
//! platform. The mirror only sees these traits.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::Result;
use crate::model::{
    AuthResponse, FileRecord, Model, ModelAction, ModelCardRevision, Release, ReleaseAction, User,
};

/// A stream of byte chunks, the unit moved between pipeline stages.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Model document persistence.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Fetch a model. Missing models are `NotFound`.
    async fn get_model(&self, model_id: &str) -> Result<Model>;

    /// All model card revisions of a model, oldest first.
    async fn get_model_card_revisions(&self, model_id: &str) -> Result<Vec<ModelCardRevision>>;

    /// Insert or replace a model card revision (keyed by model id and version).
    async fn save_model_card_revision(&self, revision: ModelCardRevision) -> Result<()>;

    /// Point the model's card at the given revision.
    async fn set_latest_model_card(&self, model_id: &str, version: u32) -> Result<()>;

    /// Fetch releases by semver. Every missing semver is reported in one `NotFound`.
    async fn get_releases(&self, model_id: &str, semvers: &[String]) -> Result<Vec<Release>>;

    async fn find_release(&self, model_id: &str, semver: &str) -> Result<Option<Release>>;

    /// Insert or replace a release (keyed by model id and semver).
    async fn save_release(&self, release: Release) -> Result<()>;

    /// Fetch files of a model by id. Every missing id is reported in one `NotFound`.
    async fn get_files(&self, model_id: &str, file_ids: &[String]) -> Result<Vec<FileRecord>>;

    async fn get_file(&self, file_id: &str) -> Result<FileRecord>;

    /// Insert or replace a file record.
    async fn save_file(&self, file: FileRecord) -> Result<()>;
}

/// Authorization decisions.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn model(&self, user: &User, model: &Model, action: ModelAction) -> AuthResponse;

    async fn release(
        &self,
        user: &User,
        model: &Model,
        release: &Release,
        action: ReleaseAction,
    ) -> AuthResponse;
}

/// Object storage used as the export sink and for file content.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a stream under `bucket/key` and return the number of bytes written.
    /// An error item in the stream aborts the upload and nothing is stored.
    async fn put_object_stream(&self, bucket: &str, key: &str, body: ByteStream) -> Result<u64>;

    /// Open a stored object for streaming reads.
    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream>;
}
