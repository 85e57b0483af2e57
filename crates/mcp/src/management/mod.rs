//! The management surface consumers talk to.
//!
//! [`McpManagementService`] is implemented both by the in-process
//! [`McpManager`] and by the channel client, so callers do not care which side
//! of a process boundary the engines live on.

mod manager;
mod policy;
mod profile;

use async_trait::async_trait;
use tether_types::{GalleryMcpServer, InstallOptions, InstallableMcpServer, LocalMcpServer, UninstallOptions};
use url::Url;

use crate::events::ManagementEvents;
use crate::types::McpManagementError;

pub use manager::McpManager;
pub use policy::{AccessLevelPolicy, AllowedMcpServersPolicy, CanInstall, InstallCandidate, McpAccessLevel, UnknownAccessLevel};
pub use profile::{ProfileResolver, StaticProfileResolver};

/// Operations and event streams of MCP server management.
///
/// Every operation targets one resource: the one named by the caller, or the
/// active profile's resource when none is given.
#[async_trait]
pub trait McpManagementService: Send + Sync {
    fn events(&self) -> &ManagementEvents;

    async fn get_installed(&self, mcp_resource: Option<Url>) -> Result<Vec<LocalMcpServer>, McpManagementError>;

    async fn install(&self, server: InstallableMcpServer, options: InstallOptions) -> Result<LocalMcpServer, McpManagementError>;

    async fn install_from_gallery(&self, server: GalleryMcpServer, options: InstallOptions) -> Result<LocalMcpServer, McpManagementError>;

    async fn uninstall(&self, server: LocalMcpServer, options: UninstallOptions) -> Result<(), McpManagementError>;

    async fn update_metadata(
        &self,
        local: LocalMcpServer,
        gallery: GalleryMcpServer,
        mcp_resource: Option<Url>,
    ) -> Result<LocalMcpServer, McpManagementError>;
}
