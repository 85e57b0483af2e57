//! Error types for MCP server management.

use thiserror::Error;

use crate::{channel::ChannelError, files::FileError, gallery::GalleryError, scanner::ScanError, synthesizer::SynthesisError};

/// Main error type for management operations.
#[derive(Debug, Error)]
pub enum McpManagementError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Launch configuration error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Gallery error: {0}")]
    Gallery(#[from] GalleryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel error: {0}")]
    Channel(ChannelError),

    #[error("MCP server not found: {name}")]
    NotFound { name: String },

    #[error("Failed to install MCP server: {name}")]
    InstallFailed { name: String },

    #[error("Remote error: {message}")]
    Remote { message: String },
}

impl McpManagementError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn install_failed(name: impl Into<String>) -> Self {
        Self::InstallFailed { name: name.into() }
    }
}

impl From<ChannelError> for McpManagementError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Remote { message } => Self::Remote { message },
            other => Self::Channel(other),
        }
    }
}
