use indexmap::IndexMap;
use tether_types::LocalMcpServer;

/// What changed between two scans of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDiff {
    /// Servers only in the new scan.
    pub added: Vec<LocalMcpServer>,
    /// Servers in both scans whose runtime view differs.
    pub updated: Vec<LocalMcpServer>,
    /// Names only in the previous scan.
    pub removed: Vec<String>,
}

impl ServerDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Compares two maps keyed by server name, using structural equality.
pub fn diff_servers(previous: &IndexMap<String, LocalMcpServer>, current: &IndexMap<String, LocalMcpServer>) -> ServerDiff {
    let removed = previous.keys().filter(|name| !current.contains_key(*name)).cloned().collect();

    let mut added = Vec::new();
    let mut updated = Vec::new();
    for (name, server) in current {
        match previous.get(name) {
            None => added.push(server.clone()),
            Some(existing) if existing != server => updated.push(server.clone()),
            Some(_) => {}
        }
    }

    ServerDiff { added, updated, removed }
}
