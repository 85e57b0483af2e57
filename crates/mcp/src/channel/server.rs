use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_types::{GalleryMcpServer, InstallOptions, InstallableMcpServer, LocalMcpServer, UninstallOptions};
use tokio::sync::{broadcast, mpsc};
use url::Url;

use super::uri::{IdentityUriTransformer, TransformUris, UriTransformer};
use super::{ChannelError, PeerContext, ServerChannel, commands, event_names};
use crate::management::McpManagementService;

type TransformerFactory = dyn Fn(&PeerContext) -> Arc<dyn UriTransformer> + Send + Sync;

/// Serves an [`McpManagementService`] to channel peers.
pub struct McpManagementChannel {
    service: Arc<dyn McpManagementService>,
    transformers: Box<TransformerFactory>,
}

impl McpManagementChannel {
    /// `transformers` picks the URI transformer for each peer.
    pub fn new(
        service: Arc<dyn McpManagementService>,
        transformers: impl Fn(&PeerContext) -> Arc<dyn UriTransformer> + Send + Sync + 'static,
    ) -> Self {
        Self {
            service,
            transformers: Box::new(transformers),
        }
    }

    /// Channel that leaves URIs untouched for every peer.
    pub fn with_identity(service: Arc<dyn McpManagementService>) -> Self {
        Self::new(service, |_: &PeerContext| -> Arc<dyn UriTransformer> { Arc::new(IdentityUriTransformer) })
    }

    fn transformer(&self, ctx: &PeerContext) -> Arc<dyn UriTransformer> {
        (self.transformers)(ctx)
    }
}

#[async_trait]
impl ServerChannel for McpManagementChannel {
    async fn call(&self, ctx: &PeerContext, command: &str, args: Value) -> Result<Value, ChannelError> {
        let transformer = self.transformer(ctx);
        let uris = transformer.as_ref();
        let mut args = Arguments::new(command, args)?;
        tracing::trace!(command, "Handling management channel call");

        match command {
            commands::GET_INSTALLED => {
                let mcp_resource = args.optional::<Url>(0)?.incoming(uris);
                let servers = self.service.get_installed(mcp_resource).await.map_err(remote)?;
                reply(servers, uris)
            }
            commands::INSTALL => {
                let server = args.required::<InstallableMcpServer>(0)?;
                let options = args.optional::<InstallOptions>(1)?.unwrap_or_default().incoming(uris);
                let installed = self.service.install(server, options).await.map_err(remote)?;
                reply(installed, uris)
            }
            commands::INSTALL_FROM_GALLERY => {
                let server = args.required::<GalleryMcpServer>(0)?;
                let options = args.optional::<InstallOptions>(1)?.unwrap_or_default().incoming(uris);
                let installed = self.service.install_from_gallery(server, options).await.map_err(remote)?;
                reply(installed, uris)
            }
            commands::UNINSTALL => {
                let server = args.required::<LocalMcpServer>(0)?.incoming(uris);
                let options = args.optional::<UninstallOptions>(1)?.unwrap_or_default().incoming(uris);
                self.service.uninstall(server, options).await.map_err(remote)?;
                Ok(Value::Null)
            }
            commands::UPDATE_METADATA => {
                let local = args.required::<LocalMcpServer>(0)?.incoming(uris);
                let gallery = args.required::<GalleryMcpServer>(1)?;
                let mcp_resource = args.optional::<Url>(2)?.incoming(uris);
                let updated = self.service.update_metadata(local, gallery, mcp_resource).await.map_err(remote)?;
                reply(updated, uris)
            }
            _ => Err(ChannelError::UnknownCommand {
                command: command.to_string(),
            }),
        }
    }

    fn listen(&self, ctx: &PeerContext, event: &str) -> Result<mpsc::UnboundedReceiver<Value>, ChannelError> {
        let transformer = self.transformer(ctx);
        let events = self.service.events();
        let receiver = match event {
            event_names::ON_INSTALL_MCP_SERVER => stream(event, events.on_install_mcp_server(), transformer),
            event_names::ON_DID_INSTALL_MCP_SERVERS => stream(event, events.on_did_install_mcp_servers(), transformer),
            event_names::ON_DID_UPDATE_MCP_SERVERS => stream(event, events.on_did_update_mcp_servers(), transformer),
            event_names::ON_UNINSTALL_MCP_SERVER => stream(event, events.on_uninstall_mcp_server(), transformer),
            event_names::ON_DID_UNINSTALL_MCP_SERVER => stream(event, events.on_did_uninstall_mcp_server(), transformer),
            _ => {
                return Err(ChannelError::UnknownEvent { event: event.to_string() });
            }
        };
        Ok(receiver)
    }
}

fn remote(error: impl ToString) -> ChannelError {
    ChannelError::Remote { message: error.to_string() }
}

fn reply<T: TransformUris + Serialize>(value: T, uris: &dyn UriTransformer) -> Result<Value, ChannelError> {
    Ok(serde_json::to_value(value.outgoing(uris))?)
}

/// Pumps one broadcast stream to a peer until either side goes away.
fn stream<T>(event: &str, mut events: broadcast::Receiver<T>, transformer: Arc<dyn UriTransformer>) -> mpsc::UnboundedReceiver<Value>
where
    T: TransformUris + Serialize + Clone + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let event = event.to_string();
    tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                _ = tx.closed() => break,
                received = events.recv() => match received {
                    Ok(payload) => payload,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(event = %event, skipped, "Management channel listener lagged");
                        continue;
                    }
                },
            };
            match serde_json::to_value(payload.outgoing(transformer.as_ref())) {
                Ok(value) => {
                    if tx.send(value).is_err() {
                        break;
                    }
                }
                Err(error) => tracing::warn!(event = %event, error = %error, "Dropping unserializable channel event"),
            }
        }
        tracing::trace!(event = %event, "Management channel listener stopped");
    });
    rx
}

/// Positional arguments of one call.
struct Arguments {
    command: String,
    values: Vec<Value>,
}

impl Arguments {
    fn new(command: &str, args: Value) -> Result<Self, ChannelError> {
        let values = match args {
            Value::Array(values) => values,
            Value::Null => Vec::new(),
            other => return Err(ChannelError::invalid_arguments(command, format!("expected an array, got {other}"))),
        };
        Ok(Self {
            command: command.to_string(),
            values,
        })
    }

    fn take(&mut self, index: usize) -> Value {
        self.values.get_mut(index).map(Value::take).unwrap_or(Value::Null)
    }

    fn optional<T: DeserializeOwned>(&mut self, index: usize) -> Result<Option<T>, ChannelError> {
        match self.take(index) {
            Value::Null => Ok(None),
            value => serde_json::from_value(value)
                .map(Some)
                .map_err(|error| ChannelError::invalid_arguments(&self.command, format!("argument {index}: {error}"))),
        }
    }

    fn required<T: DeserializeOwned>(&mut self, index: usize) -> Result<T, ChannelError> {
        self.optional(index)?
            .ok_or_else(|| ChannelError::invalid_arguments(&self.command, format!("missing argument {index}")))
    }
}
