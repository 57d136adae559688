//! Crate-wide error type
//!
//! Packet processing never surfaces these to the caller; malformed frames
//! are dropped where they are parsed. Errors escape only from setup paths
//! (config loading, socket binding) and from the codec parsers.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("configuration rejected with {} error(s)", .0.len())]
    Validation(Vec<String>),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
