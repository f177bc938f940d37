// tinysip - minimal SIP B2BUA signaling server
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use tinysipd::config::{self, ServerConfig, DEFAULT_WORKERS, QUEUE_CAPACITY};
use tinysipd::state_machine::Engine;
use tinysipd::transport::{run_udp, UdpSender};
use tinysipd::{dispatcher, queue};

/// Minimal SIP B2BUA signaling daemon for registered softphones
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Bind address (UDP)
    #[arg(long, default_value = "0.0.0.0:5060")]
    udp_bind: SocketAddr,
    /// Address placed in self-generated Via and Contact headers
    /// (defaults to the bind address)
    #[arg(long)]
    advertised: Option<SocketAddr>,
    /// Path to a JSON provisioning file replacing the built-in softphone list
    #[arg(long)]
    users: Option<PathBuf>,
    /// Number of worker tasks draining the inbound queue
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let advertised = args.advertised.unwrap_or(args.udp_bind);
    let realm = advertised.ip().to_string();
    let users = match &args.users {
        Some(path) => match config::load_users_file(path, &realm) {
            Ok(users) => {
                info!(file = %path.display(), count = users.len(), "loaded provisioning file");
                users
            }
            Err(err) => {
                warn!(%err, "failed to load provisioning file, using built-in softphone list");
                config::seed_users(&realm)
            }
        },
        None => config::seed_users(&realm),
    };

    let engine = Arc::new(Engine::new(
        ServerConfig { advertised },
        users,
        Arc::new(UdpSender),
    ));

    let socket = Arc::new(UdpSocket::bind(args.udp_bind).await?);
    let (tx, messages) = queue::bounded(QUEUE_CAPACITY);

    for _ in 0..args.workers.max(1) {
        tokio::spawn(dispatcher::run_worker(Arc::clone(&engine), messages.clone()));
    }

    info!(
        "tinysipd listening on udp {}, advertising {}, {} provisioned users",
        args.udp_bind,
        advertised,
        engine.locations().len()
    );
    run_udp(socket, tx).await
}
