//! Gallery collaborator: where manifests and READMEs come from.

mod client;

use async_trait::async_trait;
use tether_types::{GalleryMcpServer, McpServerManifest};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use client::McpGalleryClient;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("Gallery request cancelled")]
    Cancelled,

    #[error("Invalid gallery URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Gallery request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Gallery returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid manifest from {url}: {reason}")]
    InvalidManifest { url: String, reason: String },

    #[error("{name} does not publish a README")]
    NoReadme { name: String },

    #[error("Failed to build gallery client: {reason}")]
    Client { reason: String },
}

/// Fetches server metadata from a gallery.
#[async_trait]
pub trait McpGalleryService: Send + Sync {
    async fn get_manifest(&self, server: &GalleryMcpServer, token: &CancellationToken) -> Result<McpServerManifest, GalleryError>;

    async fn get_readme(&self, server: &GalleryMcpServer, token: &CancellationToken) -> Result<String, GalleryError>;
}
