// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Henhouse — time-series counter store
//!
//! Usage:
//!   henhouse serve --data /var/lib/henhouse --resolution 60
//!   henhouse serve --config henhouse.toml --put-port 2003
//!   henhouse summary --data /var/lib/henhouse --key web.hits
//!   henhouse bench --data /tmp/henhouse-bench --points 1000000

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use henhouse::api;
use henhouse::config::Config;
use henhouse::ingest;
use henhouse::server::Server;
use henhouse::storage::db::TimelineDb;
use henhouse::storage::timeline::Timeline;

#[derive(Parser)]
#[command(name = "henhouse", about = "Time-series counter store", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingest and query server.
    Serve(ServeArgs),
    /// Print the stored summary for a key straight from the data directory.
    Summary {
        /// Root data directory.
        #[arg(short, long)]
        data: PathBuf,
        /// Key to summarize.
        #[arg(long)]
        key: String,
        /// Resolution used if the timeline does not exist yet.
        #[arg(long, default_value_t = 60)]
        resolution: u64,
    },
    /// Fill one timeline with synthetic points and report throughput.
    Bench {
        /// Directory holding the benchmark timeline.
        #[arg(short, long)]
        data: PathBuf,
        /// Points to insert.
        #[arg(long, default_value_t = 1_000_000)]
        points: u64,
        /// Seconds between consecutive points.
        #[arg(long, default_value_t = 2)]
        time_increment: u64,
        /// Resolution for a freshly created timeline.
        #[arg(long, default_value_t = 5)]
        resolution: u64,
    },
}

/// Flags override the config file, which overrides built-in defaults.
#[derive(Args)]
struct ServeArgs {
    /// Optional TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// IP to bind.
    #[arg(long)]
    ip: Option<String>,
    /// Http port.
    #[arg(long)]
    http_port: Option<u16>,
    /// Http 2.0 port.
    #[arg(long)]
    http2_port: Option<u16>,
    /// Data input port.
    #[arg(long)]
    put_port: Option<u16>,
    /// Data directory.
    #[arg(short, long)]
    data: Option<PathBuf>,
    /// Query threads.
    #[arg(long)]
    query_workers: Option<usize>,
    /// DB workers.
    #[arg(long)]
    db_workers: Option<usize>,
    /// Input queue size.
    #[arg(long)]
    queue_size: Option<usize>,
    /// Open timelines cached per worker. Make this too big and you can run
    /// out of file descriptors.
    #[arg(long)]
    cache_size: Option<usize>,
    /// Minimum resolution in seconds of a timeline.
    #[arg(long)]
    resolution: Option<u64>,
    /// Maximum points returned in a values response.
    #[arg(long)]
    max_response_values: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Summary { data, key, resolution } => run_summary(data, &key, resolution),
        Command::Bench {
            data,
            points,
            time_increment,
            resolution,
        } => run_bench(data, points, time_increment, resolution),
    }
}

fn run_serve(args: ServeArgs) {
    let mut cfg = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to load config");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(v) = args.ip {
        cfg.ip = v;
    }
    if let Some(v) = args.http_port {
        cfg.http_port = v;
    }
    if let Some(v) = args.http2_port {
        cfg.http2_port = v;
    }
    if let Some(v) = args.put_port {
        cfg.put_port = v;
    }
    if let Some(v) = args.data {
        cfg.data = v;
    }
    if let Some(v) = args.query_workers {
        cfg.query_workers = v;
    }
    if let Some(v) = args.db_workers {
        cfg.db_workers = v;
    }
    if let Some(v) = args.queue_size {
        cfg.queue_size = v;
    }
    if let Some(v) = args.cache_size {
        cfg.cache_size = v;
    }
    if let Some(v) = args.resolution {
        cfg.resolution = v;
    }
    if let Some(v) = args.max_response_values {
        cfg.max_response_values = v;
    }

    if let Err(e) = cfg.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.query_workers)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            std::process::exit(1);
        }
    };

    runtime.block_on(serve(cfg));
}

async fn serve(cfg: Config) {
    info!(
        db_workers = cfg.db_workers,
        queue_size = cfg.queue_size,
        cache_size = cfg.cache_size,
        resolution = cfg.resolution,
        data = ?cfg.data,
        "Starting henhouse"
    );

    let server = match Server::new(
        &cfg.data,
        cfg.db_workers,
        cfg.queue_size,
        cfg.cache_size,
        cfg.resolution,
    ) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "Failed to start DB workers");
            std::process::exit(1);
        }
    };

    let bind = |port: u16| (cfg.ip.clone(), port);
    let put_listener = match tokio::net::TcpListener::bind(bind(cfg.put_port)).await {
        Ok(l) => l,
        Err(e) => {
            error!(port = cfg.put_port, error = %e, "Failed to bind ingest port");
            std::process::exit(1);
        }
    };
    let http_listener = match tokio::net::TcpListener::bind(bind(cfg.http_port)).await {
        Ok(l) => l,
        Err(e) => {
            error!(port = cfg.http_port, error = %e, "Failed to bind http port");
            std::process::exit(1);
        }
    };
    let http2_listener = match tokio::net::TcpListener::bind(bind(cfg.http2_port)).await {
        Ok(l) => l,
        Err(e) => {
            error!(port = cfg.http2_port, error = %e, "Failed to bind http2 port");
            std::process::exit(1);
        }
    };

    let state = Arc::new(api::AppState {
        server: server.clone(),
        max_response_values: cfg.max_response_values,
    });

    tokio::spawn(ingest::serve(put_listener, server.clone()));
    tokio::spawn(api::serve(http_listener, state.clone()));
    tokio::spawn(api::serve(http2_listener, state));

    info!(
        ip = %cfg.ip,
        put_port = cfg.put_port,
        http_port = cfg.http_port,
        http2_port = cfg.http2_port,
        query_workers = cfg.query_workers,
        "Henhouse ready"
    );

    // Wait for CTRL+C.
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received CTRL+C, shutting down…");
        }
        Err(e) => {
            error!(error = %e, "Signal error");
        }
    }

    server.stop();
}

fn run_summary(data: PathBuf, key: &str, resolution: u64) {
    let mut db = TimelineDb::new(&data, 1, resolution);

    let summary = match db.summary(key) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let index_entries = db.key_index_size(key).unwrap_or(0);
    let buckets = db.key_data_size(key).unwrap_or(0);

    println!("=== Summary for '{key}' ===");
    println!("From       : {}", format_time(summary.from));
    println!("To         : {}", format_time(summary.to));
    println!("Resolution : {} s", summary.resolution);
    println!(
        "Buckets    : {} logical, {} stored, {} index entries",
        summary.size, buckets, index_entries
    );
    println!("Sum        : {}", summary.sum);
    println!("Mean       : {:.3}", summary.mean);
    println!("Variance   : {:.3}", summary.variance);
}

fn format_time(t: u64) -> String {
    chrono::DateTime::from_timestamp(t as i64, 0)
        .map(|dt| format!("{} ({t})", dt.format("%Y-%m-%d %H:%M:%S")))
        .unwrap_or_else(|| t.to_string())
}

/// Sequential insert benchmark against a single timeline, bypassing the
/// worker pool so the number measures the storage engine alone. Re-running
/// against a populated directory skips the inserts and only times the query.
fn run_bench(data: PathBuf, points: u64, time_increment: u64, resolution: u64) {
    let mut tl = match Timeline::open(&data, resolution) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let mut tm = 0u64;
    if tl.data.is_empty() {
        let start = Instant::now();
        for i in 0..points {
            tm += time_increment;
            let v = if i % 3 == 0 { 2 } else { 1 };
            if let Err(e) = tl.put(tm, v) {
                eprintln!("Error after {i} points: {e}");
                std::process::exit(1);
            }
        }
        let elapsed = start.elapsed().as_secs_f64();
        println!("{elapsed:.3} seconds");
        println!("{:.0} puts per second", points as f64 / elapsed);
    } else {
        println!("Timeline already populated, skipping inserts");
        tm = points * time_increment;
    }

    let start = Instant::now();
    let d = tl.diff(tm / 4, tm / 2, 0);
    let query = start.elapsed();

    println!("query time: {} ns", query.as_nanos());
    println!("diff sum: {}", d.sum);
    println!("diff mean: {:.3}", d.mean);
    println!("diff variance: {:.3}", d.variance);
    println!("diff size: {}", d.size);
    println!("ranges: {}", tl.index.len());
    println!("buckets: {}", tl.data.len());
}
