use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{HenhouseError, Result};

/// Server configuration. Values come from an optional TOML file with
/// command-line flags layered on top, so validation runs after merging
/// rather than at load time.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address to bind all listeners on.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// HTTP query port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Second query port (h2c-capable).
    #[serde(default = "default_http2_port")]
    pub http2_port: u16,
    /// Plaintext ingest port (graphite-style lines).
    #[serde(default = "default_put_port")]
    pub put_port: u16,
    /// Root data directory; created on startup.
    #[serde(default = "default_data_dir")]
    pub data: PathBuf,
    /// Threads serving HTTP queries.
    #[serde(default = "default_workers")]
    pub query_workers: usize,
    /// Storage worker threads; each owns a shard of the key space.
    #[serde(default = "default_workers")]
    pub db_workers: usize,
    /// Capacity of each worker's request queue.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Open timelines cached per worker. Each costs two file descriptors,
    /// so raising this may require raising the fd limit too.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Seconds per bucket for newly created timelines.
    #[serde(default = "default_resolution")]
    pub resolution: u64,
    /// Maximum points returned by one /values response.
    #[serde(default = "default_max_response_values")]
    pub max_response_values: u64,
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    9090
}
fn default_http2_port() -> u16 {
    9091
}
fn default_put_port() -> u16 {
    2003
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/tmp/henhouse")
}
fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
fn default_queue_size() -> usize {
    10_000
}
fn default_cache_size() -> usize {
    40
}
fn default_resolution() -> u64 {
    60
}
fn default_max_response_values() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ip: default_ip(),
            http_port: default_http_port(),
            http2_port: default_http2_port(),
            put_port: default_put_port(),
            data: default_data_dir(),
            query_workers: default_workers(),
            db_workers: default_workers(),
            queue_size: default_queue_size(),
            cache_size: default_cache_size(),
            resolution: default_resolution(),
            max_response_values: default_max_response_values(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`. Does not validate;
    /// call [`validate`](Self::validate) once overrides are applied.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HenhouseError::Config(format!("Cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| HenhouseError::Config(format!("Invalid TOML: {e}")))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query_workers == 0 {
            return Err(HenhouseError::Config("query_workers must be > 0".into()));
        }
        if self.db_workers == 0 {
            return Err(HenhouseError::Config("db_workers must be > 0".into()));
        }
        if self.queue_size == 0 {
            return Err(HenhouseError::Config("queue_size must be > 0".into()));
        }
        if self.cache_size == 0 {
            return Err(HenhouseError::Config("cache_size must be > 0".into()));
        }
        if self.resolution == 0 {
            return Err(HenhouseError::Config("resolution must be > 0".into()));
        }
        if self.max_response_values == 0 {
            return Err(HenhouseError::Config("max_response_values must be > 0".into()));
        }
        Ok(())
    }
}
