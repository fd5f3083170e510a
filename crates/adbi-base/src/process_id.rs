//! Computing `process_id = "{ts}-{func_id}-{random}"` and the job prefix URI built from it.

use chrono::Utc;
use rand::RngCore;

/// Renders the current time to second precision in a fixed zone (UTC), so ordering is
/// stable across dispatcher hosts regardless of their local timezone configuration.
fn timestamp_component(now: chrono::DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// 128 bits of randomness rendered as lowercase hex, per §3's "collision-free" requirement.
fn random_component() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `process_id = "{ts}-{func_id}-{random}"`, used as both the job prefix's unique
/// suffix and the queue's `MessageGroupId`/`MessageDeduplicationId`.
pub fn new_process_id(func_id: &str) -> String {
    process_id_at(Utc::now(), func_id)
}

fn process_id_at(now: chrono::DateTime<Utc>, func_id: &str) -> String {
    format!(
        "{}-{}-{}",
        timestamp_component(now),
        func_id,
        random_component()
    )
}

/// Joins a base URI and a process id into the job prefix URI, stripping any trailing
/// slash from `base` first so the result never contains a doubled separator.
pub fn join_prefix(base: &str, process_id: &str) -> String {
    format!("{}/{process_id}", base.trim_end_matches('/'))
}
