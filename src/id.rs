//! ID generation utilities for Shellpilot
//!
//! Provides identifiers for agent runs and short, stable names for on-disk
//! artifacts derived from connection identities.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
pub fn generate_run_id() -> String {
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", now_ms(), random)
}

/// Short hex digest of an arbitrary key.
///
/// Used for ssh control socket names, which are limited in length by the
/// unix socket path limit.
pub fn short_digest(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}
