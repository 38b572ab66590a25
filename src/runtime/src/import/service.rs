//! Import entry points.

use futures::TryStreamExt;

use modelmirror_core::error::{MirrorError, Result};
use modelmirror_core::metadata::MirrorInformation;
use modelmirror_core::model::User;
use modelmirror_core::services::ByteStream;

use super::import_archive;
use crate::context::MirrorContext;

/// Imports mirror archives fetched over HTTP or handed over as a stream.
pub struct ImportService {
    ctx: MirrorContext,
    http: reqwest::Client,
}

impl ImportService {
    pub fn new(ctx: MirrorContext) -> Self {
        Self {
            ctx,
            http: reqwest::Client::new(),
        }
    }

    /// Download an archive and import it while it streams in.
    pub async fn import_from_url(&self, user: &User, url: &str) -> Result<MirrorInformation> {
        tracing::info!(url, "Fetching mirror archive");
        let response = self.http.get(url).send().await.map_err(|e| {
            MirrorError::internal(format!("Failed to fetch mirror archive: {e}"))
                .with_context("url", url)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::internal("Unable to get the archive from the URL")
                .with_context("url", url)
                .with_context("status", status.as_u16()));
        }

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        import_archive(&self.ctx, user, body).await
    }

    /// Import an archive from an already open byte stream.
    pub async fn import_from_stream(
        &self,
        user: &User,
        source: ByteStream,
    ) -> Result<MirrorInformation> {
        import_archive(&self.ctx, user, source).await
    }
}
