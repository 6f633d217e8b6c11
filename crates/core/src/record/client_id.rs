//! Locally generated ids for entities without a server id.

use super::DataId;

/// Default reserved prefix for client ids.
pub const CLIENT_ID_PREFIX: &str = "client:";

/// Monotonic generator of client ids.
#[derive(Debug, Clone)]
pub struct ClientIdGenerator {
    prefix: String,
    next: u64,
}

impl Default for ClientIdGenerator {
    fn default() -> Self {
        Self::new(CLIENT_ID_PREFIX)
    }
}

impl ClientIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), next: 0 }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Mint a fresh client id.
    pub fn generate(&mut self) -> DataId {
        self.next += 1;
        DataId::new(format!("{}{}", self.prefix, self.next))
    }

    /// Edge ids are derived from the connection and node so that refetching
    /// the same page yields the same edge records.
    pub fn edge_id(&self, connection_id: &DataId, node_id: &DataId) -> DataId {
        DataId::new(format!("{}{}:{}", self.prefix, connection_id, node_id))
    }

    pub fn is_client_id(&self, id: &DataId) -> bool {
        id.as_str().starts_with(&self.prefix)
    }
}
