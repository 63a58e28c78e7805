// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Line-oriented TCP ingest — the graphite-style plaintext feed.
//!
//! Each line is `<key> <count> <timestamp>`: whitespace-separated, count a
//! signed integer, timestamp unsigned seconds since the epoch. Malformed or
//! empty-key lines are discarded without closing the connection; lines over
//! [`MAX_LINE_BYTES`] are discarded too.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::server::Server;

/// Longest accepted ingest line.
pub const MAX_LINE_BYTES: usize = 8192;

/// Accept loop. Runs until the process exits; per-connection errors only
/// terminate that connection.
pub async fn serve(listener: TcpListener, server: Arc<Server>) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Ingest listener started");
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let server = server.clone();
                tokio::spawn(async move {
                    handle_connection(stream, server, peer.to_string()).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Ingest accept failed");
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, server: Arc<Server>, peer: String) {
    debug!(peer = %peer, "Ingest connection opened");

    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.len() > MAX_LINE_BYTES {
                    warn!(peer = %peer, bytes = line.len(), "Ingest line too long, discarded");
                    continue;
                }
                let Some((key, count, time)) = parse_line(&line) else {
                    continue;
                };
                if let Err(e) = server.put(key, time, count) {
                    warn!(peer = %peer, error = %e, "Put enqueue failed, closing connection");
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Ingest read error");
                break;
            }
        }
    }

    debug!(peer = %peer, "Ingest connection closed");
}

/// Parse one ingest line; `None` discards it. Extra trailing tokens are
/// ignored.
fn parse_line(line: &str) -> Option<(&str, i64, u64)> {
    let mut parts = line.split_whitespace();
    let key = parts.next()?;
    let count: i64 = parts.next()?.parse().ok()?;
    let time: u64 = parts.next()?.parse().ok()?;
    Some((key, count, time))
}
