use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tether_types::{GalleryMcpServer, InstallOptions, InstallableMcpServer, LocalMcpServer, UninstallOptions};
use tether_util::sanitize_path_segment;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{AllowedMcpServersPolicy, CanInstall, InstallCandidate, McpManagementService, ProfileResolver};
use crate::events::ManagementEvents;
use crate::files::{FileService, join_segment};
use crate::gallery::McpGalleryService;
use crate::resource::GalleryResourceEngine;
use crate::scanner::McpResourceScanner;
use crate::types::McpManagementError;

struct ScopedEngine {
    engine: Arc<GalleryResourceEngine>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ScopedEngine {
    fn dispose(self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
        self.engine.dispose();
    }
}

/// Routes management calls to one engine per resource.
///
/// Engines are created on first use, one per resource URL, and kept until
/// [`McpManager::dispose`]. Their events are re-published on the manager's
/// own streams.
pub struct McpManager {
    files: Arc<dyn FileService>,
    scanner: Arc<dyn McpResourceScanner>,
    gallery: Arc<dyn McpGalleryService>,
    policy: Arc<dyn AllowedMcpServersPolicy>,
    profiles: Arc<dyn ProfileResolver>,
    cache_root: Url,
    engines: Mutex<HashMap<Url, ScopedEngine>>,
    events: ManagementEvents,
    cancellation: std::sync::Mutex<CancellationToken>,
}

impl McpManager {
    pub fn new(
        files: Arc<dyn FileService>,
        scanner: Arc<dyn McpResourceScanner>,
        gallery: Arc<dyn McpGalleryService>,
        policy: Arc<dyn AllowedMcpServersPolicy>,
        profiles: Arc<dyn ProfileResolver>,
        cache_root: Url,
    ) -> Self {
        Self {
            files,
            scanner,
            gallery,
            policy,
            profiles,
            cache_root,
            engines: Mutex::new(HashMap::new()),
            events: ManagementEvents::new(),
            cancellation: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// Consults the allow-list policy. Advisory: `install` does not re-check.
    pub fn can_install(&self, candidate: InstallCandidate<'_>) -> CanInstall {
        self.policy.is_allowed(&candidate)
    }

    pub fn default_mcp_resource(&self) -> Url {
        self.profiles.default_mcp_resource()
    }

    /// Resources that currently have a live engine.
    pub async fn scopes(&self) -> Vec<Url> {
        self.engines.lock().await.keys().cloned().collect()
    }

    /// Engine for `mcp_resource`, created on first use.
    pub async fn engine(&self, mcp_resource: &Url) -> Result<Arc<GalleryResourceEngine>, McpManagementError> {
        let mut engines = self.engines.lock().await;
        if let Some(scoped) = engines.get(mcp_resource) {
            return Ok(scoped.engine.clone());
        }

        let cache_root = join_segment(&self.cache_root, &sanitize_path_segment(mcp_resource.as_str()))?;
        let engine = Arc::new(GalleryResourceEngine::new(
            mcp_resource.clone(),
            self.files.clone(),
            self.scanner.clone(),
            self.gallery.clone(),
            cache_root,
        ));
        let forwarders = self.events.forward_from(engine.events());
        tracing::debug!(resource = %mcp_resource, "Created MCP resource engine");

        engines.insert(
            mcp_resource.clone(),
            ScopedEngine {
                engine: engine.clone(),
                forwarders,
            },
        );
        Ok(engine)
    }

    /// Tears down every engine and cancels in-flight gallery requests.
    pub async fn dispose(&self) {
        let previous = {
            let mut token = self.cancellation.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *token, CancellationToken::new())
        };
        previous.cancel();

        let engines: Vec<ScopedEngine> = self.engines.lock().await.drain().map(|(_, scoped)| scoped).collect();
        let count = engines.len();
        for scoped in engines {
            scoped.dispose();
        }
        tracing::debug!(count, "Disposed MCP resource engines");
    }

    fn resolve(&self, mcp_resource: Option<Url>) -> Url {
        mcp_resource.unwrap_or_else(|| self.profiles.default_mcp_resource())
    }

    fn request_token(&self) -> CancellationToken {
        self.cancellation.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).child_token()
    }
}

#[async_trait]
impl McpManagementService for McpManager {
    fn events(&self) -> &ManagementEvents {
        &self.events
    }

    async fn get_installed(&self, mcp_resource: Option<Url>) -> Result<Vec<LocalMcpServer>, McpManagementError> {
        let engine = self.engine(&self.resolve(mcp_resource)).await?;
        engine.get_installed().await
    }

    async fn install(&self, server: InstallableMcpServer, options: InstallOptions) -> Result<LocalMcpServer, McpManagementError> {
        let engine = self.engine(&self.resolve(options.mcp_resource)).await?;
        engine.install(server).await
    }

    async fn install_from_gallery(&self, server: GalleryMcpServer, options: InstallOptions) -> Result<LocalMcpServer, McpManagementError> {
        let engine = self.engine(&self.resolve(options.mcp_resource.clone())).await?;
        engine.install_from_gallery(&server, &options, &self.request_token()).await
    }

    async fn uninstall(&self, server: LocalMcpServer, options: UninstallOptions) -> Result<(), McpManagementError> {
        let engine = self.engine(&self.resolve(options.mcp_resource)).await?;
        engine.uninstall(&server).await
    }

    async fn update_metadata(
        &self,
        local: LocalMcpServer,
        gallery: GalleryMcpServer,
        mcp_resource: Option<Url>,
    ) -> Result<LocalMcpServer, McpManagementError> {
        let engine = self.engine(&self.resolve(mcp_resource)).await?;
        engine.update_metadata(&local, &gallery, &self.request_token()).await
    }
}
