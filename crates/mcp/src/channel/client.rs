use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tether_types::{GalleryMcpServer, InstallOptions, InstallableMcpServer, LocalMcpServer, UninstallOptions};
use tokio::task::JoinHandle;
use url::Url;

use super::uri::{IdentityUriTransformer, TransformUris, UriTransformer};
use super::{ChannelError, ChannelTransport, commands, event_names};
use crate::events::ManagementEvents;
use crate::management::McpManagementService;
use crate::types::McpManagementError;

/// [`McpManagementService`] backed by a remote [`McpManagementChannel`](super::McpManagementChannel).
///
/// Remote events are re-fired on the client's own [`ManagementEvents`] for as
/// long as the client lives.
pub struct McpManagementChannelClient {
    transport: Arc<dyn ChannelTransport>,
    transformer: Arc<dyn UriTransformer>,
    events: ManagementEvents,
    listeners: Vec<JoinHandle<()>>,
}

impl McpManagementChannelClient {
    /// Subscribes to every remote event stream. Must be called inside a Tokio runtime.
    pub fn new(transport: Arc<dyn ChannelTransport>, transformer: Option<Arc<dyn UriTransformer>>) -> Result<Self, ChannelError> {
        let transformer = transformer.unwrap_or_else(|| Arc::new(IdentityUriTransformer));
        let events = ManagementEvents::new();

        let listeners = vec![
            relay(transport.as_ref(), event_names::ON_INSTALL_MCP_SERVER, &events, &transformer, ManagementEvents::fire_install)?,
            relay(
                transport.as_ref(),
                event_names::ON_DID_INSTALL_MCP_SERVERS,
                &events,
                &transformer,
                ManagementEvents::fire_did_install,
            )?,
            relay(
                transport.as_ref(),
                event_names::ON_DID_UPDATE_MCP_SERVERS,
                &events,
                &transformer,
                ManagementEvents::fire_did_update,
            )?,
            relay(transport.as_ref(), event_names::ON_UNINSTALL_MCP_SERVER, &events, &transformer, ManagementEvents::fire_uninstall)?,
            relay(
                transport.as_ref(),
                event_names::ON_DID_UNINSTALL_MCP_SERVER,
                &events,
                &transformer,
                ManagementEvents::fire_did_uninstall,
            )?,
        ];

        Ok(Self {
            transport,
            transformer,
            events,
            listeners,
        })
    }

    async fn call<T>(&self, command: &str, args: Value) -> Result<T, McpManagementError>
    where
        T: DeserializeOwned + TransformUris,
    {
        let reply = self.transport.call(command, args).await?;
        let value: T = serde_json::from_value(reply)?;
        Ok(value.incoming(self.transformer.as_ref()))
    }

    fn outgoing<T: TransformUris>(&self, value: T) -> T {
        value.outgoing(self.transformer.as_ref())
    }
}

impl Drop for McpManagementChannelClient {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

/// Re-fires one remote stream on `events` after mapping its URIs inward.
fn relay<T>(
    transport: &dyn ChannelTransport,
    event: &'static str,
    events: &ManagementEvents,
    transformer: &Arc<dyn UriTransformer>,
    fire: fn(&ManagementEvents, T),
) -> Result<JoinHandle<()>, ChannelError>
where
    T: DeserializeOwned + TransformUris + Send + 'static,
{
    let mut remote = transport.listen(event)?;
    let events = events.clone();
    let transformer = transformer.clone();
    Ok(tokio::spawn(async move {
        while let Some(value) = remote.recv().await {
            match serde_json::from_value::<T>(value) {
                Ok(payload) => fire(&events, payload.incoming(transformer.as_ref())),
                Err(error) => tracing::warn!(event, error = %error, "Dropping malformed channel event"),
            }
        }
        tracing::trace!(event, "Remote management stream ended");
    }))
}

#[async_trait]
impl McpManagementService for McpManagementChannelClient {
    fn events(&self) -> &ManagementEvents {
        &self.events
    }

    async fn get_installed(&self, mcp_resource: Option<Url>) -> Result<Vec<LocalMcpServer>, McpManagementError> {
        let mcp_resource = self.outgoing(mcp_resource);
        self.call(commands::GET_INSTALLED, json!([mcp_resource])).await
    }

    async fn install(&self, server: InstallableMcpServer, options: InstallOptions) -> Result<LocalMcpServer, McpManagementError> {
        let options = self.outgoing(options);
        self.call(commands::INSTALL, json!([server, options])).await
    }

    async fn install_from_gallery(&self, server: GalleryMcpServer, options: InstallOptions) -> Result<LocalMcpServer, McpManagementError> {
        let options = self.outgoing(options);
        self.call(commands::INSTALL_FROM_GALLERY, json!([server, options])).await
    }

    async fn uninstall(&self, server: LocalMcpServer, options: UninstallOptions) -> Result<(), McpManagementError> {
        let (server, options) = (self.outgoing(server), self.outgoing(options));
        self.transport.call(commands::UNINSTALL, json!([server, options])).await?;
        Ok(())
    }

    async fn update_metadata(
        &self,
        local: LocalMcpServer,
        gallery: GalleryMcpServer,
        mcp_resource: Option<Url>,
    ) -> Result<LocalMcpServer, McpManagementError> {
        let (local, mcp_resource) = (self.outgoing(local), self.outgoing(mcp_resource));
        self.call(commands::UPDATE_METADATA, json!([local, gallery, mcp_resource])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{InProcessTransport, McpManagementChannel, PeerContext};
    use crate::files::InMemoryFileService;
    use crate::gallery::{GalleryError, McpGalleryService};
    use crate::management::{AccessLevelPolicy, McpAccessLevel, McpManager, StaticProfileResolver};
    use crate::scanner::JsonResourceScanner;
    use std::time::Duration;
    use tether_types::{McpServerConfig, McpServerManifest, McpStdioServerConfig};
    use tokio_util::sync::CancellationToken;

    struct NoGallery;

    #[async_trait]
    impl McpGalleryService for NoGallery {
        async fn get_manifest(&self, server: &GalleryMcpServer, _token: &CancellationToken) -> Result<McpServerManifest, GalleryError> {
            Err(GalleryError::NoReadme { name: server.name.clone() })
        }

        async fn get_readme(&self, server: &GalleryMcpServer, _token: &CancellationToken) -> Result<String, GalleryError> {
            Err(GalleryError::NoReadme { name: server.name.clone() })
        }
    }

    fn client() -> McpManagementChannelClient {
        let files = Arc::new(InMemoryFileService::new());
        let scanner = Arc::new(JsonResourceScanner::new(files.clone()));
        let manager = McpManager::new(
            files,
            scanner,
            Arc::new(NoGallery),
            Arc::new(AccessLevelPolicy::new(McpAccessLevel::All)),
            Arc::new(StaticProfileResolver::new(Url::parse("file:///user/mcp.json").unwrap())),
            Url::parse("file:///cache/").unwrap(),
        );
        let channel = Arc::new(McpManagementChannel::with_identity(Arc::new(manager)));
        let transport = Arc::new(InProcessTransport::new(channel, PeerContext::local()));
        McpManagementChannelClient::new(transport, None).unwrap()
    }

    fn server(name: &str) -> InstallableMcpServer {
        InstallableMcpServer {
            name: name.into(),
            config: McpServerConfig::Local(McpStdioServerConfig {
                command: "node".into(),
                ..Default::default()
            }),
            inputs: None,
        }
    }

    #[tokio::test]
    async fn operations_round_trip_through_channel() {
        let client = client();
        let mut installs = client.events().on_did_install_mcp_servers();

        let installed = client.install(server("fs"), InstallOptions::default()).await.unwrap();
        assert_eq!(installed.mcp_resource.as_str(), "file:///user/mcp.json");

        let batch = tokio::time::timeout(Duration::from_secs(1), installs.recv()).await.unwrap().unwrap();
        assert_eq!(batch[0].name, "fs");

        client.uninstall(installed, UninstallOptions::default()).await.unwrap();
        assert!(client.get_installed(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_failures_surface_as_remote_errors() {
        let client = client();
        let gallery = GalleryMcpServer {
            name: "io.github.acme/weather".into(),
            manifest_url: "https://gallery.example.com/weather.json".into(),
            ..Default::default()
        };

        let error = client.install_from_gallery(gallery, InstallOptions::default()).await.unwrap_err();
        assert!(matches!(error, McpManagementError::Remote { .. }));
    }
}
