//! Management over a process boundary.
//!
//! [`McpManagementChannel`] exposes an [`McpManagementService`] as named
//! commands and event streams carrying JSON values. [`McpManagementChannelClient`]
//! consumes them through a [`ChannelTransport`] and implements the same service
//! trait on the other side. URIs embedded in payloads are rewritten on the way
//! in and out by a [`UriTransformer`].
//!
//! [`McpManagementService`]: crate::management::McpManagementService

mod client;
mod server;
mod uri;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use client::McpManagementChannelClient;
pub use server::McpManagementChannel;
pub use uri::{IdentityUriTransformer, RemoteUriTransformer, TransformUris, UriTransformer};

/// Command names understood by [`McpManagementChannel`].
pub mod commands {
    pub const GET_INSTALLED: &str = "getInstalled";
    pub const INSTALL: &str = "install";
    pub const INSTALL_FROM_GALLERY: &str = "installFromGallery";
    pub const UNINSTALL: &str = "uninstall";
    pub const UPDATE_METADATA: &str = "updateMetadata";
}

/// Event names published by [`McpManagementChannel`].
pub mod event_names {
    pub const ON_INSTALL_MCP_SERVER: &str = "onInstallMcpServer";
    pub const ON_DID_INSTALL_MCP_SERVERS: &str = "onDidInstallMcpServers";
    pub const ON_DID_UPDATE_MCP_SERVERS: &str = "onDidUpdateMcpServers";
    pub const ON_UNINSTALL_MCP_SERVER: &str = "onUninstallMcpServer";
    pub const ON_DID_UNINSTALL_MCP_SERVER: &str = "onDidUninstallMcpServer";
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Unknown channel command '{command}'")]
    UnknownCommand { command: String },

    #[error("Unknown channel event '{event}'")]
    UnknownEvent { event: String },

    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },

    /// The service on the other side rejected the call.
    #[error("{message}")]
    Remote { message: String },

    #[error("Channel payload error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel closed")]
    Closed,
}

impl ChannelError {
    pub fn invalid_arguments(command: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

/// Identity of the peer a server channel is talking to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerContext {
    /// Authority the peer uses to address this side, if it is remote.
    pub remote_authority: Option<String>,
}

impl PeerContext {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(authority: impl Into<String>) -> Self {
        Self {
            remote_authority: Some(authority.into()),
        }
    }
}

/// Server half of the RPC substrate.
#[async_trait]
pub trait ServerChannel: Send + Sync {
    async fn call(&self, ctx: &PeerContext, command: &str, args: Value) -> Result<Value, ChannelError>;

    /// Starts streaming `event` to the peer. Must be called inside a Tokio runtime.
    fn listen(&self, ctx: &PeerContext, event: &str) -> Result<mpsc::UnboundedReceiver<Value>, ChannelError>;
}

/// Client half of the RPC substrate.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn call(&self, command: &str, args: Value) -> Result<Value, ChannelError>;

    fn listen(&self, event: &str) -> Result<mpsc::UnboundedReceiver<Value>, ChannelError>;
}

/// Transport that dispatches straight into a server channel in the same process.
pub struct InProcessTransport {
    channel: Arc<dyn ServerChannel>,
    ctx: PeerContext,
}

impl InProcessTransport {
    pub fn new(channel: Arc<dyn ServerChannel>, ctx: PeerContext) -> Self {
        Self { channel, ctx }
    }
}

#[async_trait]
impl ChannelTransport for InProcessTransport {
    async fn call(&self, command: &str, args: Value) -> Result<Value, ChannelError> {
        self.channel.call(&self.ctx, command, args).await
    }

    fn listen(&self, event: &str) -> Result<mpsc::UnboundedReceiver<Value>, ChannelError> {
        self.channel.listen(&self.ctx, event)
    }
}
