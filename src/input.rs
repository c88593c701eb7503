//! Removal inputs and their normalization into a decoded raster

use crate::{
    error::{RemovalError, Result},
    types::{Bitmap, Blob},
};
use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reference to an image element by its source URLs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageElement {
    pub src: String,
    /// Source actually selected by the host, when it differs from `src`
    pub current_src: Option<String>,
}

impl ImageElement {
    pub fn new<S: Into<String>>(src: S) -> Self {
        Self {
            src: src.into(),
            current_src: None,
        }
    }

    /// `current_src` when set, else `src`; `None` when both are empty
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.current_src
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.src.as_str()).filter(|s| !s.is_empty()))
    }
}

/// Shared drawable surface owned by the caller
///
/// The pixels stay with the caller, so a canvas can never cross into a
/// background worker.
#[derive(Debug, Clone)]
pub struct CanvasElement {
    pixels: Arc<Mutex<RgbaImage>>,
}

impl CanvasElement {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(Mutex::new(image)),
        }
    }

    /// Copy of the current pixels
    #[must_use]
    pub fn snapshot(&self) -> RgbaImage {
        match self.pixels.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Shared handle to the pixels
    #[must_use]
    pub fn pixels(&self) -> Arc<Mutex<RgbaImage>> {
        Arc::clone(&self.pixels)
    }
}

/// Every input kind the client accepts
#[derive(Debug, Clone)]
pub enum RemovalInput {
    /// `http(s)://`, `file://` or a filesystem path
    Url(String),
    Blob(Blob),
    Bitmap(Bitmap),
    Image(ImageElement),
    Canvas(CanvasElement),
}

impl RemovalInput {
    /// Whether the input can be handed to a background worker
    #[must_use]
    pub fn is_boundary_safe(&self) -> bool {
        match self {
            Self::Url(_) | Self::Blob(_) | Self::Bitmap(_) => true,
            Self::Image(_) | Self::Canvas(_) => false,
        }
    }

    /// Convert into the worker wire form, or give the input back unchanged
    pub fn into_transferable(self) -> std::result::Result<TransferableInput, RemovalInput> {
        match self {
            Self::Url(url) => Ok(TransferableInput::Url(url)),
            Self::Blob(blob) => Ok(TransferableInput::Blob(blob)),
            Self::Bitmap(bitmap) => Ok(TransferableInput::Bitmap(bitmap)),
            other @ (Self::Image(_) | Self::Canvas(_)) => Err(other),
        }
    }

    /// Short name for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::Blob(_) => "blob",
            Self::Bitmap(_) => "bitmap",
            Self::Image(_) => "image",
            Self::Canvas(_) => "canvas",
        }
    }
}

impl From<String> for RemovalInput {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<&str> for RemovalInput {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<Blob> for RemovalInput {
    fn from(blob: Blob) -> Self {
        Self::Blob(blob)
    }
}

impl From<Bitmap> for RemovalInput {
    fn from(bitmap: Bitmap) -> Self {
        Self::Bitmap(bitmap)
    }
}

impl From<RgbaImage> for RemovalInput {
    fn from(image: RgbaImage) -> Self {
        Self::Bitmap(Bitmap::new(image))
    }
}

/// Inputs that may cross the worker boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum TransferableInput {
    Url(String),
    Blob(Blob),
    Bitmap(Bitmap),
}

impl From<TransferableInput> for RemovalInput {
    fn from(input: TransferableInput) -> Self {
        match input {
            TransferableInput::Url(url) => Self::Url(url),
            TransferableInput::Blob(blob) => Self::Blob(blob),
            TransferableInput::Bitmap(bitmap) => Self::Bitmap(bitmap),
        }
    }
}

/// Runs a cleanup action exactly once
///
/// The action fires on [`ReleaseGuard::release`] or, failing that, on drop.
#[derive(Default)]
pub struct ReleaseGuard {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl ReleaseGuard {
    pub fn new<F: FnOnce() + Send + 'static>(action: F) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Guard with nothing to release
    #[must_use]
    pub fn noop() -> Self {
        Self { action: None }
    }

    /// Run the action now; later calls and the drop do nothing
    pub fn release(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ReleaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseGuard")
            .field("armed", &self.action.is_some())
            .finish()
    }
}

/// Decoded raster plus the cleanup tied to producing it
///
/// The same buffer serves as pixel source for inference and as the drawable
/// the alpha channel is written into.
#[derive(Debug)]
pub struct NormalizedInput {
    pub image: RgbaImage,
    pub release: ReleaseGuard,
}

impl NormalizedInput {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            release: ReleaseGuard::noop(),
        }
    }

    #[must_use]
    pub fn with_release(image: RgbaImage, release: ReleaseGuard) -> Self {
        Self { image, release }
    }
}

/// Fetches encoded image bytes by URL
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Blob>;
}

/// Fetcher for `http(s)://` URLs, `file://` URLs and plain paths
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RemovalError::internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_remote(&self, url: &str) -> Result<Blob> {
        log::debug!("Fetching image input: {}", url);
        let response = self.client.get(url).send().await.map_err(|e| {
            RemovalError::unsupported_input(format!("Failed to fetch image input {}: {}", url, e))
        })?;

        if !response.status().is_success() {
            return Err(RemovalError::unsupported_input(format!(
                "Failed to fetch image input: HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| {
            RemovalError::unsupported_input(format!("Failed to read image input {}: {}", url, e))
        })?;

        Ok(Blob {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }

    async fn fetch_local(path: &Path) -> Result<Blob> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RemovalError::unsupported_input(format!(
                "Failed to read image input '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Blob::new(bytes))
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Blob> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_remote(url).await
        } else if let Some(path) = url.strip_prefix("file://") {
            Self::fetch_local(Path::new(path)).await
        } else {
            Self::fetch_local(Path::new(url)).await
        }
    }
}

/// Turns any accepted input into a decoded raster
#[async_trait]
pub trait InputNormalizer: Send + Sync {
    async fn normalize(&self, input: RemovalInput) -> Result<NormalizedInput>;
}

/// Normalizer decoding through the `image` crate
#[derive(Clone)]
pub struct DefaultNormalizer {
    fetcher: Arc<dyn ImageFetcher>,
}

impl DefaultNormalizer {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Normalizer backed by an [`HttpFetcher`]
    pub fn http() -> Result<Self> {
        Ok(Self::new(Arc::new(HttpFetcher::new()?)))
    }
}

impl std::fmt::Debug for DefaultNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultNormalizer").finish_non_exhaustive()
    }
}

#[async_trait]
impl InputNormalizer for DefaultNormalizer {
    async fn normalize(&self, input: RemovalInput) -> Result<NormalizedInput> {
        match input {
            RemovalInput::Url(url) => {
                let blob = self.fetcher.fetch(&url).await?;
                decode_blob(&blob).map(NormalizedInput::new)
            },
            RemovalInput::Image(element) => {
                let source = element.source().ok_or_else(|| {
                    RemovalError::unsupported_input("Image element has no source URL.")
                })?;
                let blob = self.fetcher.fetch(source).await?;
                decode_blob(&blob).map(NormalizedInput::new)
            },
            RemovalInput::Blob(blob) => decode_blob(&blob).map(NormalizedInput::new),
            RemovalInput::Bitmap(bitmap) => Ok(NormalizedInput::new(bitmap.into_image())),
            RemovalInput::Canvas(canvas) => Ok(NormalizedInput::new(canvas.snapshot())),
        }
    }
}

/// Decode encoded bytes, honouring the MIME hint when it names a known format
pub fn decode_blob(blob: &Blob) -> Result<RgbaImage> {
    if blob.bytes.is_empty() {
        return Err(RemovalError::unsupported_input("Image input is empty."));
    }

    let hinted = blob
        .mime_type
        .as_deref()
        .and_then(|mime| mime.split(';').next())
        .and_then(|mime| ImageFormat::from_mime_type(mime.trim()));

    let decoded = match hinted {
        Some(format) => image::load_from_memory_with_format(&blob.bytes, format)
            .or_else(|_| image::load_from_memory(&blob.bytes)),
        None => image::load_from_memory(&blob.bytes),
    };

    decoded
        .map(|image| image.to_rgba8())
        .map_err(|e| RemovalError::unsupported_input(format!("Failed to decode image input: {}", e)))
}
