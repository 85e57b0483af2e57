//! Lifecycle event streams.
//!
//! Every engine owns one [`ManagementEvents`]; the manager owns another and
//! forwards each engine's streams into it, so subscribers see one stream
//! across all resources.

use tether_types::{DidUninstallMcpServerEvent, InstallMcpServerEvent, InstallMcpServerResult, UninstallMcpServerEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

/// The five broadcast streams published by engines and the manager.
#[derive(Debug, Clone)]
pub struct ManagementEvents {
    install: broadcast::Sender<InstallMcpServerEvent>,
    did_install: broadcast::Sender<Vec<InstallMcpServerResult>>,
    did_update: broadcast::Sender<Vec<InstallMcpServerResult>>,
    uninstall: broadcast::Sender<UninstallMcpServerEvent>,
    did_uninstall: broadcast::Sender<DidUninstallMcpServerEvent>,
}

impl ManagementEvents {
    pub fn new() -> Self {
        let (install, _) = broadcast::channel(EVENT_CAPACITY);
        let (did_install, _) = broadcast::channel(EVENT_CAPACITY);
        let (did_update, _) = broadcast::channel(EVENT_CAPACITY);
        let (uninstall, _) = broadcast::channel(EVENT_CAPACITY);
        let (did_uninstall, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            install,
            did_install,
            did_update,
            uninstall,
            did_uninstall,
        }
    }

    pub fn fire_install(&self, event: InstallMcpServerEvent) {
        let _ = self.install.send(event);
    }

    /// Publishes an install batch; empty batches are dropped.
    pub fn fire_did_install(&self, results: Vec<InstallMcpServerResult>) {
        if !results.is_empty() {
            let _ = self.did_install.send(results);
        }
    }

    /// Publishes an update batch; empty batches are dropped.
    pub fn fire_did_update(&self, results: Vec<InstallMcpServerResult>) {
        if !results.is_empty() {
            let _ = self.did_update.send(results);
        }
    }

    pub fn fire_uninstall(&self, event: UninstallMcpServerEvent) {
        let _ = self.uninstall.send(event);
    }

    pub fn fire_did_uninstall(&self, event: DidUninstallMcpServerEvent) {
        let _ = self.did_uninstall.send(event);
    }

    pub fn on_install_mcp_server(&self) -> broadcast::Receiver<InstallMcpServerEvent> {
        self.install.subscribe()
    }

    pub fn on_did_install_mcp_servers(&self) -> broadcast::Receiver<Vec<InstallMcpServerResult>> {
        self.did_install.subscribe()
    }

    pub fn on_did_update_mcp_servers(&self) -> broadcast::Receiver<Vec<InstallMcpServerResult>> {
        self.did_update.subscribe()
    }

    pub fn on_uninstall_mcp_server(&self) -> broadcast::Receiver<UninstallMcpServerEvent> {
        self.uninstall.subscribe()
    }

    pub fn on_did_uninstall_mcp_server(&self) -> broadcast::Receiver<DidUninstallMcpServerEvent> {
        self.did_uninstall.subscribe()
    }

    /// Re-publishes every event of `source` on `self` until `source` goes away.
    ///
    /// Subscriptions are taken before this returns, so nothing fired afterwards
    /// on `source` is missed.
    pub fn forward_from(&self, source: &ManagementEvents) -> Vec<JoinHandle<()>> {
        vec![
            forward(source.on_install_mcp_server(), self.install.clone(), "install"),
            forward(source.on_did_install_mcp_servers(), self.did_install.clone(), "did-install"),
            forward(source.on_did_update_mcp_servers(), self.did_update.clone(), "did-update"),
            forward(source.on_uninstall_mcp_server(), self.uninstall.clone(), "uninstall"),
            forward(source.on_did_uninstall_mcp_server(), self.did_uninstall.clone(), "did-uninstall"),
        ]
    }
}

impl Default for ManagementEvents {
    fn default() -> Self {
        Self::new()
    }
}

fn forward<T: Clone + Send + 'static>(
    mut receiver: broadcast::Receiver<T>,
    sender: broadcast::Sender<T>,
    stream: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let _ = sender.send(event);
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(stream, skipped, "Event forwarder lagged");
                }
            }
        }
    })
}
