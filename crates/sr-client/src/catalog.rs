//! Server catalog
//!
//! Ordered list of servers plus the current selection. The selection is
//! tracked by position but always re-resolved by identity (address + port)
//! whenever the list is replaced or re-sorted.

use sr_core::traits::{LatencyResult, ProbeTarget};
use sr_core::{Latency, Server, ServerKey, SrError};

#[derive(Debug, Clone, Default)]
pub struct ServerCatalog {
    servers: Vec<Server>,
    selected: Option<usize>,
}

impl ServerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the first entry selected
    pub fn from_servers(servers: Vec<Server>) -> Self {
        let mut catalog = Self::new();
        catalog.replace(servers);
        catalog
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Server> {
        self.servers.get(index)
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected(&self) -> Option<&Server> {
        self.selected.and_then(|i| self.servers.get(i))
    }

    /// Position of the entry with the given identity
    pub fn position(&self, key: &ServerKey) -> Option<usize> {
        self.servers
            .iter()
            .position(|s| s.matches(&key.address, key.port))
    }

    /// Replace the whole list, e.g. after a subscription refresh.
    ///
    /// The selection follows its entry by identity if it still exists,
    /// otherwise falls back to the first entry.
    pub fn replace(&mut self, servers: Vec<Server>) {
        let previous = self.selected().map(Server::key);
        self.servers = servers;
        self.selected = previous
            .and_then(|key| self.position(&key))
            .or(if self.servers.is_empty() { None } else { Some(0) });
    }

    /// Select an entry by position
    pub fn select(&mut self, index: usize) -> Result<(), SrError> {
        if index >= self.servers.len() {
            return Err(SrError::InvalidSelection {
                index,
                len: self.servers.len(),
            });
        }
        self.selected = Some(index);
        Ok(())
    }

    /// Move the selection by `delta`, clamped to the list bounds
    pub fn move_selection(&mut self, delta: isize) -> Option<usize> {
        if self.servers.is_empty() {
            return None;
        }
        let last = self.servers.len() - 1;
        let current = self.selected.unwrap_or(0);
        let next = if delta.is_negative() {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta as usize).min(last)
        };
        self.selected = Some(next);
        self.selected
    }

    /// Probe targets for every entry, in catalog order
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.servers.iter().map(ProbeTarget::from).collect()
    }

    /// Fold probe results back into the entries and re-sort.
    ///
    /// Entries are matched by address and port. A successful result sets
    /// the measured latency; a failed result or no result at all marks the
    /// entry timed out.
    pub fn apply_latency(&mut self, results: &[LatencyResult]) {
        for server in &mut self.servers {
            let result = results
                .iter()
                .find(|r| server.matches(&r.address, r.port));
            server.latency = match result {
                Some(LatencyResult {
                    succeeded: true,
                    latency_ms: Some(ms),
                    ..
                }) => Latency::Measured(*ms),
                _ => Latency::TimedOut,
            };
        }
        self.sort_by_latency();
    }

    /// Stable sort: measured entries ascending, then everything else in
    /// its existing relative order. The selected entry stays selected.
    pub fn sort_by_latency(&mut self) {
        let selected = self.selected().map(Server::key);
        self.servers.sort_by_key(|s| match s.latency {
            Latency::Measured(ms) => (0u8, ms),
            Latency::Untested | Latency::TimedOut => (1u8, 0),
        });
        if let Some(key) = selected {
            self.selected = self.position(&key);
        }
    }
}
