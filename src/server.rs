// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Sharded worker pool — every key belongs to exactly one worker thread.
//!
//! ```text
//! ingest tasks ─┐
//! http handlers ┼──→ hash(sanitized key) mod N ──→ worker queue ──→ TimelineDb
//! cli tools    ─┘         (bounded, MPMC)            (one thread)
//! ```
//!
//! All operations on one key are linearized at its worker's queue, so the
//! storage layer needs no locking at all. Puts are fire-and-forget; queries
//! carry a oneshot sender that the worker fulfills exactly once — with the
//! kind-specific zero value if the request failed.
//!
//! Routing uses XxHash64 with a fixed seed: the key→worker assignment must be
//! identical across processes with the same worker count, or a restart would
//! split a key's history between two workers' caches.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use twox_hash::XxHash64;

use crate::error::{HenhouseError, Result};
use crate::require;
use crate::storage::db::{sanitize_key, TimelineDb};
use crate::storage::timeline::{DiffResult, GetResult, SummaryResult};

// ─────────────────────────────── constants ───────────────────────────────────

/// How often an idle worker re-checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

const ROUTING_SEED: u64 = 0;

// ─────────────────────────────── requests ────────────────────────────────────

/// One queued operation. Keys are already sanitized by the producer side.
pub enum Request {
    Put {
        key: String,
        time: u64,
        count: i64,
    },
    Get {
        key: String,
        time: u64,
        resp: oneshot::Sender<GetResult>,
    },
    Diff {
        key: String,
        a: u64,
        b: u64,
        index_offset: u64,
        resp: oneshot::Sender<DiffResult>,
    },
    Summary {
        key: String,
        resp: oneshot::Sender<SummaryResult>,
    },
}

// ─────────────────────────────── server ──────────────────────────────────────

/// Owns the worker threads and routes requests to them.
pub struct Server {
    queues: Vec<Sender<Request>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    done: Arc<AtomicBool>,
}

impl Server {
    /// Spawn `workers` threads, each with a bounded queue of `queue_size`
    /// requests and its own timeline cache of `cache_size` entries.
    pub fn new(
        root: &Path,
        workers: usize,
        queue_size: usize,
        cache_size: usize,
        resolution: u64,
    ) -> Result<Self> {
        require!(workers > 0, "need at least one worker");
        require!(queue_size > 0, "queue size must be positive");

        std::fs::create_dir_all(root)?;

        let done = Arc::new(AtomicBool::new(false));
        let mut queues = Vec::with_capacity(workers);
        let mut threads = Vec::with_capacity(workers);

        for n in 0..workers {
            let (tx, rx) = bounded(queue_size);
            let db = TimelineDb::new(root, cache_size, resolution);
            let flag = done.clone();
            let handle = std::thread::Builder::new()
                .name(format!("henhouse-worker-{n}"))
                .spawn(move || worker_loop(db, rx, flag))?;

            queues.push(tx);
            threads.push(handle);
        }

        info!(workers, queue_size, cache_size, resolution, "DB workers started");

        Ok(Server {
            queues,
            threads: Mutex::new(threads),
            done,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    /// Which worker owns `key`. Stable across processes for a fixed worker
    /// count and key.
    pub fn worker_index(&self, key: &str) -> usize {
        let clean = sanitize_key(key);
        self.route(&clean)
    }

    fn route(&self, clean_key: &str) -> usize {
        let h = XxHash64::oneshot(ROUTING_SEED, clean_key.as_bytes());
        (h % self.queues.len() as u64) as usize
    }

    /// Enqueue a count. Blocks when the owning worker's queue is full; this
    /// backpressure is the only flow control the ingest path has.
    pub fn put(&self, key: &str, time: u64, count: i64) -> Result<()> {
        let clean = sanitize_key(key);
        require!(!clean.is_empty(), "empty key");

        let n = self.route(&clean);
        self.queues[n]
            .send(Request::Put {
                key: clean,
                time,
                count,
            })
            .map_err(|_| HenhouseError::QueueClosed)
    }

    /// Point lookup. The returned receiver fires exactly once; it errors only
    /// if the server shut down before the request was processed.
    pub fn get(&self, key: &str, time: u64) -> oneshot::Receiver<GetResult> {
        let (tx, rx) = oneshot::channel();
        let clean = sanitize_key(key);
        require!(!clean.is_empty(), "empty key");

        let n = self.route(&clean);
        let _ = self.queues[n].send(Request::Get {
            key: clean,
            time,
            resp: tx,
        });
        rx
    }

    /// Range aggregate over `(a, b]`.
    pub fn diff(&self, key: &str, a: u64, b: u64, index_offset: u64) -> oneshot::Receiver<DiffResult> {
        let (tx, rx) = oneshot::channel();
        let clean = sanitize_key(key);
        require!(!clean.is_empty(), "empty key");

        let n = self.route(&clean);
        let _ = self.queues[n].send(Request::Diff {
            key: clean,
            a,
            b,
            index_offset,
            resp: tx,
        });
        rx
    }

    /// Whole-series aggregate.
    pub fn summary(&self, key: &str) -> oneshot::Receiver<SummaryResult> {
        let (tx, rx) = oneshot::channel();
        let clean = sanitize_key(key);
        require!(!clean.is_empty(), "empty key");

        let n = self.route(&clean);
        let _ = self.queues[n].send(Request::Summary { key: clean, resp: tx });
        rx
    }

    /// Signal shutdown and join every worker. Queued requests still in flight
    /// when the flag flips may be dropped; their result slots close and
    /// waiting clients see a cancelled future. Idempotent.
    pub fn stop(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        info!("all DB workers stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─────────────────────────────── worker ──────────────────────────────────────

/// Worker loop: pop, dispatch, repeat. The queue pop times out periodically
/// so an idle worker still notices the shutdown flag.
fn worker_loop(mut db: TimelineDb, queue: Receiver<Request>, done: Arc<AtomicBool>) {
    while !done.load(Ordering::SeqCst) {
        match queue.recv_timeout(SHUTDOWN_POLL) {
            Ok(request) => process(&mut db, request),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Execute one request. Errors never escape: they are logged with key
/// context and any pending result slot is completed with the zero value of
/// its kind, so clients are never left waiting.
fn process(db: &mut TimelineDb, request: Request) {
    match request {
        Request::Put { key, time, count } => match db.put(&key, time, count) {
            Ok(true) => {}
            Ok(false) => {
                debug!(key = %key, time, count, "put refused (out of order or too far back)");
            }
            Err(e) => {
                error!(key = %key, time, count, error = %e, "Error putting data");
            }
        },
        Request::Get { key, time, resp } => {
            let result = db.get(&key, time).unwrap_or_else(|e| {
                error!(key = %key, time, error = %e, "Error getting data");
                GetResult::default()
            });
            let _ = resp.send(result);
        }
        Request::Diff {
            key,
            a,
            b,
            index_offset,
            resp,
        } => {
            let result = db.diff(&key, a, b, index_offset).unwrap_or_else(|e| {
                error!(key = %key, a, b, error = %e, "Error diffing data");
                DiffResult::default()
            });
            let _ = resp.send(result);
        }
        Request::Summary { key, resp } => {
            let result = db.summary(&key).unwrap_or_else(|e| {
                error!(key = %key, error = %e, "Error summarizing data");
                SummaryResult::default()
            });
            let _ = resp.send(result);
        }
    }
}
