use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How many addresses a single chat may watch.
pub const MAX_ADDRESSES_PER_CHAT: usize = 5;

/// How many seen transactions are remembered per watched address.
///
/// Anything older than this is forgotten, and would be notified about again
/// if an explorer ever served it back to us.
pub const SEEN_HISTORY_LIMIT: usize = 50;

/// Errors of the on-disk state files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Either not JSON, or JSON of the wrong shape.
    #[error("bad contents of {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of [`Database::add_address`].
///
/// [`Database::add_address`]: super::Database::add_address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddResult {
    Added,
    AlreadyPresent,
    /// The chat already watches [`MAX_ADDRESSES_PER_CHAT`] addresses.
    LimitExceeded,
    /// Not a Dash address.
    Invalid,
}

/// Result of [`Database::remove_address`].
///
/// [`Database::remove_address`]: super::Database::remove_address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoveResult {
    Removed,
    NotFound,
}

/// A transaction we already told a chat about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub txid: String,
    /// Display number, counting up per watched address.
    pub seq: u64,
}
