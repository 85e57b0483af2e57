use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use tether_types::{
    DidUninstallMcpServerEvent, InstallMcpServerEvent, InstallMcpServerResult, InstallableMcpServer, LocalMcpServer, ScannedMcpServer,
    UninstallMcpServerEvent,
};
use tether_util::RunOnceScheduler;
use tokio::sync::{Mutex, MutexGuard, OnceCell, RwLock, broadcast};
use tokio::task::JoinHandle;
use url::Url;

use super::LocalServerInfoProvider;
use super::diff::{ServerDiff, diff_servers};
use crate::events::ManagementEvents;
use crate::files::{DeleteOptions, FileService, WatchRegistration};
use crate::scanner::McpResourceScanner;
use crate::types::McpManagementError;

/// Quiet period after the last change notification before rescanning.
pub const RECONCILE_DEBOUNCE: Duration = Duration::from_millis(50);

struct ResourceWatch {
    _registration: WatchRegistration,
    listener: JoinHandle<()>,
}

impl Drop for ResourceWatch {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Keeps the servers listed by one resource in sync with an in-memory map.
///
/// The map is populated on first use and rebuilt from a full scan after every
/// write and every (debounced) change notification. Mutating passes are
/// serialized, so a watch-triggered rescan never interleaves with an install
/// or uninstall.
pub struct McpResourceEngine {
    this: Weak<Self>,
    mcp_resource: Url,
    files: Arc<dyn FileService>,
    scanner: Arc<dyn McpResourceScanner>,
    server_info: Arc<dyn LocalServerInfoProvider>,
    events: ManagementEvents,
    servers: RwLock<IndexMap<String, LocalMcpServer>>,
    operations: Mutex<()>,
    initialized: OnceCell<()>,
    watch: std::sync::Mutex<Option<ResourceWatch>>,
}

impl McpResourceEngine {
    pub fn new(
        mcp_resource: Url,
        files: Arc<dyn FileService>,
        scanner: Arc<dyn McpResourceScanner>,
        server_info: Arc<dyn LocalServerInfoProvider>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            mcp_resource,
            files,
            scanner,
            server_info,
            events: ManagementEvents::new(),
            servers: RwLock::new(IndexMap::new()),
            operations: Mutex::new(()),
            initialized: OnceCell::new(),
            watch: std::sync::Mutex::new(None),
        })
    }

    pub fn mcp_resource(&self) -> &Url {
        &self.mcp_resource
    }

    pub fn events(&self) -> &ManagementEvents {
        &self.events
    }

    pub fn files(&self) -> &Arc<dyn FileService> {
        &self.files
    }

    /// Scans the resource and starts watching it.
    ///
    /// Concurrent callers share one scan. A failed scan is returned to the
    /// caller that ran it and the next call tries again.
    pub async fn initialize(&self) -> Result<(), McpManagementError> {
        self.initialized
            .get_or_try_init(|| async {
                {
                    let _operation = self.operations.lock().await;
                    let servers = self.scan_local_servers().await?;
                    tracing::debug!(resource = %self.mcp_resource, count = servers.len(), "Populated MCP servers");
                    *self.servers.write().await = servers;
                }
                self.start_watching();
                Ok::<(), McpManagementError>(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_installed(&self) -> Result<Vec<LocalMcpServer>, McpManagementError> {
        self.initialize().await?;
        Ok(self.servers.read().await.values().cloned().collect())
    }

    /// Persists `server` into the resource and returns its reconciled entry.
    pub async fn install(&self, server: InstallableMcpServer) -> Result<LocalMcpServer, McpManagementError> {
        self.events.fire_install(InstallMcpServerEvent {
            name: server.name.clone(),
            mcp_resource: self.mcp_resource.clone(),
            source: None,
        });

        let name = server.name.clone();
        let result = async move {
            self.initialize().await?;
            let _operation = self.lock_operations().await;
            let scanned = ScannedMcpServer {
                name: server.name,
                config: server.config,
                version: None,
                gallery: None,
                inputs: server.inputs.filter(|inputs| !inputs.is_empty()),
            };
            self.persist_and_reconcile_locked(scanned).await
        }
        .await;

        if let Err(error) = &result {
            tracing::warn!(resource = %self.mcp_resource, server = %name, error = %error, "Failed to install MCP server");
            self.events
                .fire_did_install(vec![InstallMcpServerResult::failed(name, self.mcp_resource.clone(), None, error)]);
        }
        result
    }

    /// Removes `server` from the resource along with its cache folder.
    ///
    /// A resource that lists no servers at all is left untouched.
    pub async fn uninstall(&self, server: &LocalMcpServer) -> Result<(), McpManagementError> {
        self.events.fire_uninstall(UninstallMcpServerEvent {
            name: server.name.clone(),
            mcp_resource: self.mcp_resource.clone(),
        });

        let result = self.uninstall_inner(server).await;
        if let Err(error) = &result {
            tracing::warn!(resource = %self.mcp_resource, server = %server.name, error = %error, "Failed to uninstall MCP server");
            self.events.fire_did_uninstall(DidUninstallMcpServerEvent {
                name: server.name.clone(),
                mcp_resource: self.mcp_resource.clone(),
                error: Some(error.to_string()),
            });
        }
        result
    }

    async fn uninstall_inner(&self, server: &LocalMcpServer) -> Result<(), McpManagementError> {
        self.initialize().await?;
        let _operation = self.lock_operations().await;

        let configuration = self.scanner.scan_mcp_servers(&self.mcp_resource).await?;
        if configuration.is_empty() {
            tracing::debug!(resource = %self.mcp_resource, server = %server.name, "Resource lists no servers; nothing to uninstall");
            return Ok(());
        }

        self.scanner.remove_mcp_servers(std::slice::from_ref(&server.name), &self.mcp_resource).await?;

        // Only this engine's own view decides what gets deleted.
        let location = self.servers.read().await.get(&server.name).and_then(|local| local.location.clone());
        if let Some(location) = location
            && self.files.exists(&location).await?
        {
            self.files.del(&location, DeleteOptions { recursive: true }).await?;
            tracing::debug!(server = %server.name, location = %location, "Removed cached server metadata");
        }

        self.reconcile_locked().await;
        Ok(())
    }

    /// Rescans the resource and publishes what changed.
    ///
    /// Scan failures are logged and the previous state is kept.
    pub async fn update_local(&self) -> Result<(), McpManagementError> {
        self.initialize().await?;
        let _operation = self.lock_operations().await;
        self.reconcile_locked().await;
        Ok(())
    }

    /// Stops watching the resource and drops any pending rescan.
    pub fn dispose(&self) {
        if self.lock_watch().take().is_some() {
            tracing::debug!(resource = %self.mcp_resource, "Stopped watching resource");
        }
    }

    pub(crate) async fn lock_operations(&self) -> MutexGuard<'_, ()> {
        self.operations.lock().await
    }

    /// Upserts `scanned`, reconciles and returns its entry. Caller holds the operation lock.
    pub(crate) async fn persist_and_reconcile_locked(&self, scanned: ScannedMcpServer) -> Result<LocalMcpServer, McpManagementError> {
        let name = scanned.name.clone();
        self.scanner.add_mcp_servers(std::slice::from_ref(&scanned), &self.mcp_resource).await?;
        self.reconcile_locked().await;
        self.find(&name).await.ok_or_else(|| McpManagementError::install_failed(name))
    }

    pub(crate) async fn find(&self, name: &str) -> Option<LocalMcpServer> {
        self.servers.read().await.get(name).cloned()
    }

    /// One reconciliation pass. Caller holds the operation lock.
    pub(crate) async fn reconcile_locked(&self) {
        let current = match self.scan_local_servers().await {
            Ok(current) => current,
            Err(error) => {
                tracing::warn!(resource = %self.mcp_resource, error = %error, "Failed to rescan MCP resource; keeping previous state");
                return;
            }
        };

        let diff = {
            let mut servers = self.servers.write().await;
            let diff = diff_servers(&servers, &current);
            *servers = current;
            diff
        };
        self.publish(diff);
    }

    fn publish(&self, diff: ServerDiff) {
        if diff.is_empty() {
            return;
        }
        tracing::debug!(
            resource = %self.mcp_resource,
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "Reconciled MCP servers"
        );

        for name in diff.removed {
            self.events.fire_did_uninstall(DidUninstallMcpServerEvent {
                name,
                mcp_resource: self.mcp_resource.clone(),
                error: None,
            });
        }
        self.events
            .fire_did_update(diff.updated.into_iter().map(InstallMcpServerResult::installed).collect());
        self.events
            .fire_did_install(diff.added.into_iter().map(InstallMcpServerResult::installed).collect());
    }

    async fn scan_local_servers(&self) -> Result<IndexMap<String, LocalMcpServer>, McpManagementError> {
        let configuration = self.scanner.scan_mcp_servers(&self.mcp_resource).await?;
        let mut servers = IndexMap::with_capacity(configuration.servers.len());
        for scanned in &configuration.servers {
            let local = self.server_info.local_server(scanned, &self.mcp_resource).await;
            servers.insert(local.name.clone(), local);
        }
        Ok(servers)
    }

    fn lock_watch(&self) -> std::sync::MutexGuard<'_, Option<ResourceWatch>> {
        self.watch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Kept synchronous: the rescan task it schedules re-enters `initialize`.
    fn start_watching(&self) {
        let mut changes = self.files.on_did_files_change();
        let registration = match self.files.watch(&self.mcp_resource) {
            Ok(registration) => registration,
            Err(error) => {
                tracing::warn!(resource = %self.mcp_resource, error = %error, "Failed to watch MCP resource");
                WatchRegistration::none()
            }
        };

        let this = self.this.clone();
        let scheduler = RunOnceScheduler::new(RECONCILE_DEBOUNCE, move || {
            let this = this.clone();
            async move {
                let Some(engine) = this.upgrade() else {
                    return;
                };
                if let Err(error) = engine.update_local().await {
                    tracing::warn!(resource = %engine.mcp_resource, error = %error, "Watch-triggered reconciliation failed");
                }
            }
        });

        let resource = self.mcp_resource.clone();
        let listener = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        if event.affects(&resource) {
                            scheduler.schedule();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(resource = %resource, skipped, "File change listener lagged; rescanning");
                        scheduler.schedule();
                    }
                }
            }
        });

        *self.lock_watch() = Some(ResourceWatch {
            _registration: registration,
            listener,
        });
    }
}

impl std::fmt::Debug for McpResourceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpResourceEngine")
            .field("mcp_resource", &self.mcp_resource)
            .field("initialized", &self.initialized.initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::InMemoryFileService;
    use crate::resource::MinimalServerInfo;
    use crate::scanner::JsonResourceScanner;
    use tether_types::{McpServerConfig, McpStdioServerConfig};

    fn resource() -> Url {
        Url::parse("file:///home/me/.config/tether/mcp.json").unwrap()
    }

    fn engine_with(files: Arc<InMemoryFileService>) -> Arc<McpResourceEngine> {
        let scanner = Arc::new(JsonResourceScanner::new(files.clone()));
        McpResourceEngine::new(resource(), files, scanner, Arc::new(MinimalServerInfo))
    }

    fn installable(name: &str, command: &str) -> InstallableMcpServer {
        InstallableMcpServer {
            name: name.into(),
            config: McpServerConfig::Local(McpStdioServerConfig {
                command: command.into(),
                ..Default::default()
            }),
            inputs: None,
        }
    }

    #[tokio::test]
    async fn install_then_uninstall_round_trips() {
        let files = Arc::new(InMemoryFileService::new());
        let engine = engine_with(files);

        let installed = engine.install(installable("fs", "node")).await.unwrap();
        assert_eq!(installed.name, "fs");
        assert_eq!(engine.get_installed().await.unwrap().len(), 1);

        engine.uninstall(&installed).await.unwrap();
        assert!(engine.get_installed().await.unwrap().is_empty());
        engine.dispose();
    }

    #[tokio::test]
    async fn update_local_twice_is_idempotent() {
        let files = Arc::new(InMemoryFileService::new());
        files
            .write_file(&resource(), br#"{"servers":{"fs":{"type":"stdio","command":"node"}}}"#)
            .await
            .unwrap();
        let engine = engine_with(files);
        engine.initialize().await.unwrap();

        let mut installs = engine.events().on_did_install_mcp_servers();
        let mut updates = engine.events().on_did_update_mcp_servers();
        let mut uninstalls = engine.events().on_did_uninstall_mcp_server();

        engine.update_local().await.unwrap();
        engine.update_local().await.unwrap();

        assert!(installs.try_recv().is_err());
        assert!(updates.try_recv().is_err());
        assert!(uninstalls.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_rescan_keeps_previous_state() {
        let files = Arc::new(InMemoryFileService::new());
        files
            .write_file(&resource(), br#"{"servers":{"fs":{"type":"stdio","command":"node"}}}"#)
            .await
            .unwrap();
        let engine = engine_with(files.clone());
        engine.initialize().await.unwrap();

        files.write_file(&resource(), b"{ broken").await.unwrap();
        engine.update_local().await.unwrap();

        let installed = engine.get_installed().await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].name, "fs");
    }

    #[tokio::test]
    async fn failed_first_scan_propagates_and_retries() {
        let files = Arc::new(InMemoryFileService::new());
        files.write_file(&resource(), b"[1, 2, 3]").await.unwrap();
        let engine = engine_with(files.clone());

        assert!(matches!(engine.get_installed().await, Err(McpManagementError::Scan(_))));

        files.write_file(&resource(), br#"{"servers":{}}"#).await.unwrap();
        assert!(engine.get_installed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uninstall_from_empty_resource_is_a_no_op() {
        let files = Arc::new(InMemoryFileService::new());
        let engine = engine_with(files.clone());
        let mut uninstalls = engine.events().on_did_uninstall_mcp_server();

        let ghost = LocalMcpServer::minimal(
            &ScannedMcpServer {
                name: "ghost".into(),
                config: installable("ghost", "x").config,
                version: None,
                gallery: None,
                inputs: None,
            },
            resource(),
        );
        engine.uninstall(&ghost).await.unwrap();

        assert!(uninstalls.try_recv().is_err());
        assert!(files.paths().is_empty());
    }

    #[tokio::test]
    async fn install_failure_fires_error_result() {
        let files = Arc::new(InMemoryFileService::new());
        files.write_file(&resource(), b"\"not an object\"").await.unwrap();
        let engine = engine_with(files);
        let mut installs = engine.events().on_did_install_mcp_servers();

        assert!(engine.install(installable("fs", "node")).await.is_err());

        let batch = installs.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].is_error());
        assert_eq!(batch[0].name, "fs");
    }

    #[tokio::test]
    async fn uninstall_failure_fires_error_event() {
        let files = Arc::new(InMemoryFileService::new());
        let engine = engine_with(files.clone());
        let installed = engine.install(installable("fs", "node")).await.unwrap();
        let mut uninstalls = engine.events().on_did_uninstall_mcp_server();

        files.write_file(&resource(), b"{ broken").await.unwrap();
        assert!(matches!(engine.uninstall(&installed).await, Err(McpManagementError::Scan(_))));

        let event = uninstalls.recv().await.unwrap();
        assert_eq!(event.name, "fs");
        assert_eq!(event.mcp_resource, resource());
        assert!(event.error.is_some());
        engine.dispose();
    }
}
