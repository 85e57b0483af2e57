use url::Url;

/// Resolves the resource used when a caller names none.
pub trait ProfileResolver: Send + Sync {
    fn default_mcp_resource(&self) -> Url;
}

/// Resolver pinned to a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticProfileResolver {
    mcp_resource: Url,
}

impl StaticProfileResolver {
    pub fn new(mcp_resource: Url) -> Self {
        Self { mcp_resource }
    }
}

impl ProfileResolver for StaticProfileResolver {
    fn default_mcp_resource(&self) -> Url {
        self.mcp_resource.clone()
    }
}
