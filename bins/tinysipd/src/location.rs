// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! User location service.
//!
//! Holds the provisioned softphone records and answers the engine's "where is
//! this user" question. Records are mutated only by REGISTER handling; the
//! engine reads resolved snapshots, so a concurrent REGISTER and INVITE for
//! the same user race over the address and the last write wins.

use std::net::{IpAddr, SocketAddr};

use dashmap::DashMap;
use smol_str::SmolStr;

/// One provisioned user. `password` and `realm` are scaffolding for digest
/// authentication, which is not performed yet.
#[derive(Debug, Clone)]
pub struct LocationEntry {
    pub username: SmolStr,
    #[allow(dead_code)]
    pub password: SmolStr,
    pub ip: IpAddr,
    pub port: u16,
    #[allow(dead_code)]
    pub realm: SmolStr,
    pub registered: bool,
}

impl LocationEntry {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Username-keyed table of provisioned users.
pub struct LocationTable {
    entries: DashMap<SmolStr, LocationEntry>,
}

impl LocationTable {
    pub fn new(seed: impl IntoIterator<Item = LocationEntry>) -> Self {
        let entries = DashMap::new();
        for entry in seed {
            entries.insert(entry.username.clone(), entry);
        }
        Self { entries }
    }

    /// Exact-match lookup. Returns a snapshot of the record.
    pub fn lookup(&self, username: &str) -> Option<LocationEntry> {
        self.entries.get(username).map(|entry| entry.value().clone())
    }

    /// Overwrites a known user's transport address and marks it registered.
    /// Returns the updated snapshot, or [`None`] for unknown usernames.
    pub fn register(&self, username: &str, addr: SocketAddr) -> Option<LocationEntry> {
        let mut entry = self.entries.get_mut(username)?;
        entry.ip = addr.ip();
        entry.port = addr.port();
        entry.registered = true;
        Some(entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::seed_users;

    fn table() -> LocationTable {
        LocationTable::new(seed_users("test"))
    }

    #[test]
    fn lookup_is_exact_match() {
        let table = table();
        assert!(table.lookup("1001").is_some());
        assert!(table.lookup("100").is_none());
        assert!(table.lookup("10011").is_none());
        assert!(table.lookup("9999").is_none());
    }

    #[test]
    fn register_overwrites_address_and_flag() {
        let table = table();
        let addr: SocketAddr = "10.0.0.5:5062".parse().unwrap();
        let updated = table.register("1001", addr).expect("known user");
        assert_eq!(updated.addr(), addr);
        assert!(updated.registered);

        let snapshot = table.lookup("1001").unwrap();
        assert_eq!(snapshot.addr(), addr);
        assert!(snapshot.registered);
    }

    #[test]
    fn register_unknown_user_mutates_nothing() {
        let table = table();
        let before = table.len();
        assert!(table.register("9999", "10.0.0.5:5062".parse().unwrap()).is_none());
        assert_eq!(table.len(), before);
        assert!(table.lookup("9999").is_none());
    }

    #[test]
    fn reregister_with_same_address_is_idempotent() {
        let table = table();
        let addr: SocketAddr = "10.0.0.5:5062".parse().unwrap();
        let first = table.register("1002", addr).unwrap();
        let second = table.register("1002", addr).unwrap();
        assert_eq!(first.addr(), second.addr());
        assert_eq!(first.registered, second.registered);
        assert_eq!(first.username, second.username);
    }
}
