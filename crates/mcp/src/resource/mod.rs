//! Per-resource reconciliation engines.
//!
//! An engine owns one resource URL. It keeps an in-memory map of the servers
//! that resource lists, rebuilt from a full scan on every reconciliation, and
//! publishes what changed between two scans.

mod diff;
mod engine;
mod gallery;

use async_trait::async_trait;
use tether_types::{LocalMcpServer, ScannedMcpServer};
use url::Url;

pub use diff::{ServerDiff, diff_servers};
pub use engine::McpResourceEngine;
pub use gallery::{GalleryResourceEngine, GalleryServerCache};

/// Builds the runtime view of a scanned server during reconciliation.
#[async_trait]
pub trait LocalServerInfoProvider: Send + Sync {
    async fn local_server(&self, scanned: &ScannedMcpServer, mcp_resource: &Url) -> LocalMcpServer;
}

/// Provider that knows nothing beyond what the resource itself says.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimalServerInfo;

#[async_trait]
impl LocalServerInfoProvider for MinimalServerInfo {
    async fn local_server(&self, scanned: &ScannedMcpServer, mcp_resource: &Url) -> LocalMcpServer {
        LocalMcpServer::minimal(scanned, mcp_resource.clone())
    }
}
