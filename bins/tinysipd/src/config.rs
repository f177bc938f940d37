// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Daemon configuration and softphone provisioning.
//!
//! The default provisioning list mirrors a small lab of softphones; their
//! transport addresses are placeholders that REGISTER overwrites. A JSON file
//! passed via `--users` replaces the built-in list.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use smol_str::SmolStr;

use crate::location::LocationEntry;

/// Largest datagram the listener will accept.
pub const MAX_DATAGRAM: usize = 1400;

/// Capacity of the inbound message queue. Enqueue fails fast beyond this.
pub const QUEUE_CAPACITY: usize = 10;

/// Default number of worker tasks draining the queue.
pub const DEFAULT_WORKERS: usize = 5;

/// Number of concurrent call slots in the call map.
pub const MAX_CALLS: usize = 32;

/// `User-Agent` value stamped on locally originated messages.
pub const USER_AGENT: &str = "TinySIP";

/// User part of the server's own `Contact` URI.
pub const CONTACT_USER: &str = "TinySIP";

/// Registration lifetime advertised on the echoed `Contact`. Advertised only;
/// leases are not enforced.
pub const REGISTER_EXPIRES: u32 = 7200;

pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Immutable per-process settings consumed by the engine and builders.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address placed in self-generated `Via` and `Contact` headers.
    pub advertised: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            advertised: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_SIP_PORT),
        }
    }
}

/// The built-in softphone list. Only listed usernames may register; REGISTER
/// overwrites the placeholder addresses with the observed source address.
pub fn seed_users(realm: &str) -> Vec<LocationEntry> {
    const DEFAULTS: &[(&str, &str, u16)] = &[
        ("1001", "192.168.192.1", 5060),
        ("1002", "192.168.192.1", 5070),
        ("1003", "192.168.1.103", 5060),
        ("1004", "192.168.1.104", 5060),
        ("1005", "192.168.184.1", 5060),
        ("1006", "192.168.184.1", 5070),
        ("1007", "192.168.1.4", 5060),
        ("1008", "192.168.1.4", 5070),
    ];

    DEFAULTS
        .iter()
        .map(|&(username, ip, port)| LocationEntry {
            username: SmolStr::new(username),
            password: SmolStr::new("defaultpassword"),
            ip: ip.parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port,
            realm: SmolStr::new(realm),
            registered: false,
        })
        .collect()
}

/// One entry of a `--users` provisioning file.
///
/// Expected format: `[{"username": "1001", "password": "secret",
/// "ip": "10.0.0.5", "port": 5060}, ...]`
#[derive(Debug, Deserialize)]
pub struct ProvisionedUser {
    pub username: String,
    pub password: String,
    pub ip: IpAddr,
    pub port: u16,
}

/// Loads a provisioning file, assigning every user the server realm.
pub fn load_users_file(path: &Path, realm: &str) -> anyhow::Result<Vec<LocationEntry>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading users file {}", path.display()))?;
    let users: Vec<ProvisionedUser> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing users file {}", path.display()))?;

    Ok(users
        .into_iter()
        .map(|user| LocationEntry {
            username: SmolStr::new(user.username),
            password: SmolStr::new(user.password),
            ip: user.ip,
            port: user.port,
            realm: SmolStr::new(realm),
            registered: false,
        })
        .collect())
}
