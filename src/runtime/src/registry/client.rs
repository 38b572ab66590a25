//! OCI distribution API client.
//!
//! Speaks just enough of the registry HTTP API to relay images: manifest
//! get/put, streaming blob get, blob existence probes and monolithic blob
//! uploads.

use bytes::Bytes;
use futures::TryStreamExt;
use oci_spec::image::ImageManifest;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};

use modelmirror_core::config::RegistryConfig;
use modelmirror_core::error::{MirrorError, Result};
use modelmirror_core::services::ByteStream;

/// Manifest media types accepted from registries.
pub const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Media type used when a registry does not report one.
pub const DEFAULT_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Basic auth when both credentials are configured, else anonymous.
    pub fn from_config(config: &RegistryConfig) -> Self {
        match (&config.username, &config.password) {
            (Some(u), Some(p)) => Self::basic(u.clone(), p.clone()),
            _ => Self::anonymous(),
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => request.basic_auth(u, Some(p)),
            _ => request,
        }
    }
}

/// A manifest as fetched: parsed for its descriptors, raw for relaying
/// byte-for-byte.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    pub manifest: ImageManifest,
    pub raw: Bytes,
    pub media_type: String,
}

/// Registry HTTP client.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    auth: RegistryAuth,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        Self::with_auth(&config.url, RegistryAuth::from_config(config))
    }

    pub fn with_auth(base_url: impl Into<String>, auth: RegistryAuth) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(MirrorError::internal(format!(
                "Registry URL must be http(s): {base_url}"
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("modelmirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MirrorError::internal(format!("Failed to build registry client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, repository: &str, suffix: &str) -> String {
        format!("{}/v2/{}/{}", self.base_url, repository, suffix)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.auth.apply(self.http.request(method, url))
    }

    fn error(&self, message: impl Into<String>) -> MirrorError {
        MirrorError::Registry {
            registry: self.base_url.clone(),
            message: message.into(),
        }
    }

    /// Send a request, mapping transport failures and non-success statuses.
    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| self.error(format!("{operation} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(operation, %status, body = %body, "Registry request failed");
        if status == StatusCode::NOT_FOUND {
            return Err(MirrorError::not_found(format!("{operation}: not found in registry"))
                .with_context("registry", &self.base_url));
        }
        Err(self.error(format!("{operation} returned {status}")))
    }

    /// Fetch an image manifest by tag or digest.
    pub async fn get_manifest(&self, repository: &str, reference: &str) -> Result<FetchedManifest> {
        let url = self.url(repository, &format!("manifests/{reference}"));
        let response = self
            .send(
                self.request(Method::GET, &url).header(ACCEPT, MANIFEST_MEDIA_TYPES),
                &format!("Fetching manifest {repository}:{reference}"),
            )
            .await?;

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty() && v != "application/json")
            .unwrap_or_else(|| DEFAULT_MANIFEST_MEDIA_TYPE.to_string());
        let raw = response
            .bytes()
            .await
            .map_err(|e| self.error(format!("Reading manifest failed: {e}")))?;
        let manifest: ImageManifest = serde_json::from_slice(&raw).map_err(|e| {
            self.error(format!("Failed to parse manifest {repository}:{reference}: {e}"))
        })?;

        Ok(FetchedManifest {
            manifest,
            raw,
            media_type,
        })
    }

    /// Stream a blob. The returned stream owns the HTTP connection; dropping
    /// it closes the connection.
    pub async fn get_blob(&self, repository: &str, digest: &str) -> Result<ByteStream> {
        let url = self.url(repository, &format!("blobs/{digest}"));
        let response = self
            .send(
                self.request(Method::GET, &url),
                &format!("Fetching blob {digest}"),
            )
            .await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }

    /// Probe for a blob with HEAD.
    pub async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool> {
        let url = self.url(repository, &format!("blobs/{digest}"));
        let response = self
            .request(Method::HEAD, &url)
            .send()
            .await
            .map_err(|e| self.error(format!("Probing blob {digest} failed: {e}")))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(self.error(format!("Probing blob {digest} returned {status}"))),
        }
    }

    /// Start a blob upload session and return its absolute location.
    pub async fn initiate_upload(&self, repository: &str) -> Result<String> {
        let url = self.url(repository, "blobs/uploads/");
        let response = self
            .send(
                self.request(Method::POST, &url).header(CONTENT_LENGTH, 0),
                &format!("Initiating upload to {repository}"),
            )
            .await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| self.error("Upload session response has no Location header"))?;
        Ok(self.absolute(location))
    }

    fn absolute(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }

    /// Complete an upload session with the whole blob in one streaming PUT.
    pub async fn put_blob(
        &self,
        location: &str,
        digest: &str,
        size: u64,
        body: ByteStream,
    ) -> Result<()> {
        let separator = if location.contains('?') { '&' } else { '?' };
        let url = format!("{location}{separator}digest={digest}");
        self.send(
            self.request(Method::PUT, &url)
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_LENGTH, size)
                .body(reqwest::Body::wrap_stream(SyncStream::new(body))),
            &format!("Uploading blob {digest}"),
        )
        .await?;
        Ok(())
    }

    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        body: Bytes,
    ) -> Result<()> {
        let url = self.url(repository, &format!("manifests/{reference}"));
        self.send(
            self.request(Method::PUT, &url)
                .header(CONTENT_TYPE, media_type)
                .body(body),
            &format!("Pushing manifest {repository}:{reference}"),
        )
        .await?;
        Ok(())
    }
}

/// `reqwest::Body::wrap_stream` needs a `Sync` stream. Polling goes through
/// `&mut`, so the mutex is never actually locked.
struct SyncStream {
    inner: std::sync::Mutex<ByteStream>,
}

impl SyncStream {
    fn new(inner: ByteStream) -> Self {
        Self {
            inner: std::sync::Mutex::new(inner),
        }
    }
}

impl futures::Stream for SyncStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.get_mut() {
            Ok(inner) => inner.as_mut().poll_next(cx),
            Err(poisoned) => poisoned.into_inner().as_mut().poll_next(cx),
        }
    }
}
