// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HenhouseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot open storage file {path:?}: {source}")]
    StorageOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Request queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, HenhouseError>;
