//! `progress_log`: the append-by-rewrite record of every `set_progress` call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    pub time: i64,
    pub message: String,
}

impl ProgressLogEntry {
    pub fn new(time: i64, message: impl Into<String>) -> Self {
        Self {
            time,
            message: message.into(),
        }
    }
}

/// Serializes a progress log the way the worker SDK rewrites `progress_log` on every
/// call to `set_progress`.
pub fn to_json_bytes(entries: &[ProgressLogEntry]) -> Vec<u8> {
    serde_json::to_vec(entries).expect("progress log serialization is infallible")
}

/// Parses a `progress_log` blob. Per §4.3, malformed JSON is tolerated and yields an
/// empty log rather than an error: a reader should never fail just because a prior
/// writer crashed mid-rewrite.
pub fn from_json_bytes(bytes: &[u8]) -> Vec<ProgressLogEntry> {
    serde_json::from_slice(bytes).unwrap_or_default()
}
