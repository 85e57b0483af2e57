//! Reading and writing the server list of a resource.

mod json;
mod model;

use async_trait::async_trait;
use tether_types::ScannedMcpServer;
use thiserror::Error;
use url::Url;

use crate::files::FileError;

pub use json::JsonResourceScanner;
pub use model::McpServersConfiguration;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{0}")]
    File(#[from] FileError),

    #[error("Malformed MCP configuration in {resource}: {source}")]
    Malformed {
        resource: Url,
        #[source]
        source: serde_json::Error,
    },

    #[error("Expected a JSON object in {resource}")]
    NotAnObject { resource: Url },

    #[error("Expected `servers` in {resource} to be a JSON object")]
    ServersNotAnObject { resource: Url },
}

/// Persists server definitions for one or more resources.
#[async_trait]
pub trait McpResourceScanner: Send + Sync {
    /// Reads every server listed by `mcp_resource`. A missing resource lists nothing.
    async fn scan_mcp_servers(&self, mcp_resource: &Url) -> Result<McpServersConfiguration, ScanError>;

    /// Upserts `servers` into `mcp_resource`, creating it when needed.
    async fn add_mcp_servers(&self, servers: &[ScannedMcpServer], mcp_resource: &Url) -> Result<(), ScanError>;

    /// Removes the named servers from `mcp_resource`.
    async fn remove_mcp_servers(&self, names: &[String], mcp_resource: &Url) -> Result<(), ScanError>;
}
