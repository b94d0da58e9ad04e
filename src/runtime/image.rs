// ABOUTME: Image operations trait for the runtime driver.
// ABOUTME: Existence checks and pulls for runner images.

use crate::types::ImageRef;
use async_trait::async_trait;

/// Registry authentication credentials for private runner images.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server: Option<String>,
}

/// Image operations.
#[async_trait]
pub trait ImageOps: Send + Sync {
    /// Pull an image from its registry, consuming progress until complete.
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError>;

    /// Check whether an image is present locally.
    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError>;
}

/// Errors from image operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("failed to pull image: {0}")]
    PullFailed(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
