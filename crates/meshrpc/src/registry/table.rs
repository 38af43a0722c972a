// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Published-address table shared by the in-memory registry and the
//! registry server.

use super::RegistryEntry;
use crate::metadata::ServiceKey;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

/// Identifies the session (connection) that published an entry.
pub type SessionId = u64;

/// A registry entry plus liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct PublishedEntry {
    pub entry: RegistryEntry,

    /// Publishing session
    pub session: SessionId,

    /// Last heartbeat or publish
    pub last_seen: Instant,

    /// First publish
    pub registered_at: Instant,
}

impl PublishedEntry {
    fn new(entry: RegistryEntry, session: SessionId) -> Self {
        let now = Instant::now();
        Self {
            entry,
            session,
            last_seen: now,
            registered_at: now,
        }
    }

    /// Check if lease has expired.
    pub fn is_expired(&self, lease_duration: Duration) -> bool {
        self.last_seen.elapsed() > lease_duration
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// Address table indexed by service key, with a per-session index for
/// cleanup on disconnect.
#[derive(Debug, Default)]
pub struct ServiceTable {
    /// key -> address -> entry; addresses kept sorted for stable resolution
    entries: HashMap<ServiceKey, BTreeMap<String, PublishedEntry>>,

    /// session -> (key, address) it published
    session_index: HashMap<SessionId, HashSet<(ServiceKey, String)>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an entry. Returns true when the address set of the
    /// key changed (a new address appeared).
    pub fn upsert(&mut self, session: SessionId, entry: RegistryEntry) -> bool {
        let key = entry.key.clone();
        let address = entry.address.clone();
        let by_addr = self.entries.entry(key.clone()).or_default();

        let changed = match by_addr.get_mut(&address) {
            Some(existing) => {
                if existing.session != session {
                    if let Some(set) = self.session_index.get_mut(&existing.session) {
                        set.remove(&(key.clone(), address.clone()));
                    }
                }
                existing.entry = entry;
                existing.session = session;
                existing.touch();
                false
            }
            None => {
                by_addr.insert(address.clone(), PublishedEntry::new(entry, session));
                true
            }
        };

        self.session_index
            .entry(session)
            .or_default()
            .insert((key, address));
        changed
    }

    /// Remove one address. Returns the removed entry if it existed.
    pub fn remove(&mut self, key: &ServiceKey, address: &str) -> Option<PublishedEntry> {
        let by_addr = self.entries.get_mut(key)?;
        let removed = by_addr.remove(address)?;
        if by_addr.is_empty() {
            self.entries.remove(key);
        }
        if let Some(set) = self.session_index.get_mut(&removed.session) {
            set.remove(&(key.clone(), address.to_string()));
            if set.is_empty() {
                self.session_index.remove(&removed.session);
            }
        }
        Some(removed)
    }

    /// Remove everything a session published. Returns the keys that changed.
    pub fn remove_session(&mut self, session: SessionId) -> Vec<ServiceKey> {
        let owned = match self.session_index.remove(&session) {
            Some(owned) => owned,
            None => return Vec::new(),
        };

        let mut changed = BTreeSet::new();
        for (key, address) in owned {
            if let Some(by_addr) = self.entries.get_mut(&key) {
                if by_addr.remove(&address).is_some() {
                    changed.insert(key.clone());
                }
                if by_addr.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
        changed.into_iter().collect()
    }

    /// Remove an address under every key (provider considered dead).
    pub fn remove_address(&mut self, address: &str) -> Vec<ServiceKey> {
        let keys: Vec<ServiceKey> = self
            .entries
            .iter()
            .filter(|(_, by_addr)| by_addr.contains_key(address))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.remove(key, address);
        }
        keys
    }

    /// Renew the lease of every entry a session owns.
    pub fn touch_session(&mut self, session: SessionId) {
        let Some(owned) = self.session_index.get(&session) else {
            return;
        };
        for (key, address) in owned {
            if let Some(entry) = self
                .entries
                .get_mut(key)
                .and_then(|by_addr| by_addr.get_mut(address))
            {
                entry.touch();
            }
        }
    }

    /// Drop entries whose lease ran out. Returns the keys that changed.
    pub fn remove_expired(&mut self, lease_duration: Duration) -> Vec<ServiceKey> {
        let expired: Vec<(ServiceKey, String)> = self
            .entries
            .iter()
            .flat_map(|(key, by_addr)| {
                by_addr
                    .iter()
                    .filter(|(_, e)| e.is_expired(lease_duration))
                    .map(move |(addr, _)| (key.clone(), addr.clone()))
            })
            .collect();

        let mut changed = BTreeSet::new();
        for (key, address) in expired {
            if self.remove(&key, &address).is_some() {
                changed.insert(key);
            }
        }
        changed.into_iter().collect()
    }

    /// Live addresses for a key, sorted.
    pub fn addresses(&self, key: &ServiceKey) -> Vec<String> {
        self.entries
            .get(key)
            .map(|by_addr| by_addr.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entries(&self, key: &ServiceKey) -> Vec<&RegistryEntry> {
        self.entries
            .get(key)
            .map(|by_addr| by_addr.values().map(|e| &e.entry).collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ServiceKey> {
        self.entries.keys()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn session_entry_count(&self, session: SessionId) -> usize {
        self.session_index.get(&session).map_or(0, HashSet::len)
    }

    /// Backdate every entry (lease expiry tests).
    #[cfg(test)]
    pub(crate) fn age_all(&mut self, by: Duration) {
        for by_addr in self.entries.values_mut() {
            for entry in by_addr.values_mut() {
                entry.last_seen -= by;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ServiceKey {
        ServiceKey::new(name, "", "1.0.0")
    }

    fn entry(name: &str, addr: &str) -> RegistryEntry {
        RegistryEntry::new(key(name), addr, 100)
    }

    #[test]
    fn test_upsert_and_resolve() {
        let mut table = ServiceTable::new();
        assert!(table.upsert(1, entry("svc.A", "10.0.0.2:20880")));
        assert!(table.upsert(1, entry("svc.A", "10.0.0.1:20880")));

        assert_eq!(
            table.addresses(&key("svc.A")),
            vec!["10.0.0.1:20880", "10.0.0.2:20880"]
        );
        assert_eq!(table.entry_count(), 2);
    }

    #[test]
    fn test_upsert_idempotent() {
        let mut table = ServiceTable::new();
        assert!(table.upsert(1, entry("svc.A", "10.0.0.1:20880")));
        assert!(!table.upsert(1, entry("svc.A", "10.0.0.1:20880")));
        assert_eq!(table.entry_count(), 1);
        assert_eq!(table.session_entry_count(1), 1);
    }

    #[test]
    fn test_upsert_moves_session() {
        let mut table = ServiceTable::new();
        table.upsert(1, entry("svc.A", "10.0.0.1:20880"));
        table.upsert(2, entry("svc.A", "10.0.0.1:20880"));

        assert_eq!(table.session_entry_count(1), 0);
        assert!(table.remove_session(1).is_empty());
        assert_eq!(table.addresses(&key("svc.A")).len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut table = ServiceTable::new();
        table.upsert(1, entry("svc.A", "10.0.0.1:20880"));

        assert!(table.remove(&key("svc.A"), "10.0.0.1:20880").is_some());
        assert!(table.remove(&key("svc.A"), "10.0.0.1:20880").is_none());
        assert!(table.addresses(&key("svc.A")).is_empty());
        assert_eq!(table.session_entry_count(1), 0);
    }

    #[test]
    fn test_remove_session() {
        let mut table = ServiceTable::new();
        table.upsert(1, entry("svc.A", "10.0.0.1:20880"));
        table.upsert(1, entry("svc.B", "10.0.0.1:20880"));
        table.upsert(2, entry("svc.A", "10.0.0.2:20880"));

        let changed = table.remove_session(1);
        assert_eq!(changed, vec![key("svc.A"), key("svc.B")]);
        assert_eq!(table.addresses(&key("svc.A")), vec!["10.0.0.2:20880"]);
        assert!(table.addresses(&key("svc.B")).is_empty());
    }

    #[test]
    fn test_remove_address() {
        let mut table = ServiceTable::new();
        table.upsert(1, entry("svc.A", "10.0.0.1:20880"));
        table.upsert(1, entry("svc.B", "10.0.0.1:20880"));
        table.upsert(2, entry("svc.B", "10.0.0.2:20880"));

        let changed = table.remove_address("10.0.0.1:20880");
        assert_eq!(changed.len(), 2);
        assert_eq!(table.entry_count(), 1);
    }

    #[test]
    fn test_remove_expired() {
        let mut table = ServiceTable::new();
        table.upsert(1, entry("svc.A", "10.0.0.1:20880"));
        table.age_all(Duration::from_secs(100));
        table.upsert(2, entry("svc.A", "10.0.0.2:20880"));

        let changed = table.remove_expired(Duration::from_secs(30));
        assert_eq!(changed, vec![key("svc.A")]);
        assert_eq!(table.addresses(&key("svc.A")), vec!["10.0.0.2:20880"]);
    }

    #[test]
    fn test_touch_session_renews_lease() {
        let mut table = ServiceTable::new();
        table.upsert(1, entry("svc.A", "10.0.0.1:20880"));
        table.age_all(Duration::from_secs(100));
        table.touch_session(1);

        assert!(table.remove_expired(Duration::from_secs(30)).is_empty());
        assert_eq!(table.entry_count(), 1);
    }
}
