use tether_types::{
    DidUninstallMcpServerEvent, InstallMcpServerEvent, InstallMcpServerResult, InstallOptions, LocalMcpServer, UninstallMcpServerEvent,
    UninstallOptions,
};
use url::Url;

/// Maps URIs between this process's view and a peer's view.
pub trait UriTransformer: Send + Sync {
    /// Peer URI to local URI.
    fn transform_incoming(&self, uri: &Url) -> Url;
    /// Local URI to peer URI.
    fn transform_outgoing(&self, uri: &Url) -> Url;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityUriTransformer;

impl UriTransformer for IdentityUriTransformer {
    fn transform_incoming(&self, uri: &Url) -> Url {
        uri.clone()
    }

    fn transform_outgoing(&self, uri: &Url) -> Url {
        uri.clone()
    }
}

/// Maps `file:///p` to `<scheme>://<authority>/p` and back.
///
/// Query and fragment are carried across. Host-bearing `file` URIs and URIs
/// of any other shape pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUriTransformer {
    base: Option<Url>,
}

impl RemoteUriTransformer {
    pub fn new(scheme: impl Into<String>, authority: impl Into<String>) -> Self {
        let (scheme, authority) = (scheme.into(), authority.into());
        let base = match Url::parse(&format!("{scheme}://{authority}/")) {
            Ok(base) => Some(base),
            Err(error) => {
                tracing::warn!(scheme = %scheme, authority = %authority, error = %error, "Invalid remote authority; URIs pass through");
                None
            }
        };
        Self { base }
    }

    fn is_remote(&self, uri: &Url) -> bool {
        self.base.as_ref().is_some_and(|base| {
            uri.scheme() == base.scheme() && uri.host_str() == base.host_str() && uri.port() == base.port()
        })
    }
}

fn is_local_file(uri: &Url) -> bool {
    uri.scheme() == "file" && matches!(uri.host_str(), None | Some(""))
}

fn with_location(mut target: Url, source: &Url) -> Url {
    target.set_path(source.path());
    target.set_query(source.query());
    target.set_fragment(source.fragment());
    target
}

impl UriTransformer for RemoteUriTransformer {
    fn transform_incoming(&self, uri: &Url) -> Url {
        if !self.is_remote(uri) {
            return uri.clone();
        }
        match Url::parse("file:///") {
            Ok(file) => with_location(file, uri),
            Err(_) => uri.clone(),
        }
    }

    fn transform_outgoing(&self, uri: &Url) -> Url {
        match &self.base {
            Some(base) if is_local_file(uri) => with_location(base.clone(), uri),
            _ => uri.clone(),
        }
    }
}

/// Rewrites every URI carried by a payload.
///
/// Implemented explicitly for each payload shape that crosses the channel.
pub trait TransformUris {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url);

    fn incoming(mut self, transformer: &dyn UriTransformer) -> Self
    where
        Self: Sized,
    {
        self.transform_uris(&|uri| transformer.transform_incoming(uri));
        self
    }

    fn outgoing(mut self, transformer: &dyn UriTransformer) -> Self
    where
        Self: Sized,
    {
        self.transform_uris(&|uri| transformer.transform_outgoing(uri));
        self
    }
}

impl TransformUris for Url {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        *self = map(self);
    }
}

impl<T: TransformUris> TransformUris for Option<T> {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        if let Some(value) = self {
            value.transform_uris(map);
        }
    }
}

impl<T: TransformUris> TransformUris for Vec<T> {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        for value in self {
            value.transform_uris(map);
        }
    }
}

impl TransformUris for () {
    fn transform_uris(&mut self, _map: &dyn Fn(&Url) -> Url) {}
}

impl TransformUris for LocalMcpServer {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        self.mcp_resource.transform_uris(map);
        self.location.transform_uris(map);
        self.readme_url.transform_uris(map);
    }
}

impl TransformUris for InstallOptions {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        self.mcp_resource.transform_uris(map);
    }
}

impl TransformUris for UninstallOptions {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        self.mcp_resource.transform_uris(map);
    }
}

impl TransformUris for InstallMcpServerEvent {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        self.mcp_resource.transform_uris(map);
    }
}

impl TransformUris for InstallMcpServerResult {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        self.mcp_resource.transform_uris(map);
        self.local.transform_uris(map);
    }
}

impl TransformUris for UninstallMcpServerEvent {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        self.mcp_resource.transform_uris(map);
    }
}

impl TransformUris for DidUninstallMcpServerEvent {
    fn transform_uris(&mut self, map: &dyn Fn(&Url) -> Url) {
        self.mcp_resource.transform_uris(map);
    }
}
