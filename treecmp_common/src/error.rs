use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeCmpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot scan {}: {source}", path.display())]
    ScanRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid match rule '{pattern}': {reason}")]
    InvalidRule { pattern: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, TreeCmpError>;
