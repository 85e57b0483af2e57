//! Shared type definitions for Tether.
//!
//! These are the shapes that travel between the management core, its
//! collaborators and the cross-process channel: server definitions, gallery
//! manifests and lifecycle events.

pub mod events;
pub mod manifest;
pub mod server;

pub use events::{DidUninstallMcpServerEvent, InstallMcpServerEvent, InstallMcpServerResult, UninstallMcpServerEvent};
pub use manifest::{
    GalleryMcpServer, LocalMcpServerInfo, McpServerArgument, McpServerKeyValueInput, McpServerManifest, McpServerPackage,
    McpServerRemote, McpServerVariable, McpServerVariables,
};
pub use server::{
    InstallOptions, InstallableMcpServer, LocalMcpServer, McpRemoteServerConfig, McpServerConfig, McpServerSource,
    McpServerVariableInput, McpServerVariableType, McpStdioServerConfig, ScannedMcpServer, UninstallOptions,
};

/// Markdown-formatted, human-readable text.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MarkdownString {
    pub value: String,
}

impl MarkdownString {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

impl std::fmt::Display for MarkdownString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}
