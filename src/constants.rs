//! Constants used throughout the crate.
//!
//! This module centralizes storage key prefixes, retry defaults and
//! cryptographic parameters so they stay consistent between the storage
//! layer, the sync engine and the tests.

// Storage keys
/// Prefix for the per-user task blob (`tasks_<userId>_v1`).
pub const TASKS_KEY_PREFIX: &str = "tasks_";
/// Prefix for the per-user retry queue blob (`syncQueue_<userId>_v1`).
pub const SYNC_QUEUE_KEY_PREFIX: &str = "syncQueue_";
/// Suffix shared by all namespaced storage keys.
pub const STORAGE_KEY_VERSION: &str = "_v1";
/// Single-user task key written by versions that predate per-user isolation.
pub const LEGACY_TASKS_KEY: &str = "tt_tasks_v1";

// Retry queue
/// Default number of attempts before a queue item is dropped for good.
pub const DEFAULT_SYNC_MAX_RETRIES: u32 = 5;
/// Upper bound on the computed backoff delay, in seconds.
pub const BACKOFF_CAP_SECS: f64 = 3600.0;

// Crypto
/// Minimum accepted PBKDF2 iteration count. Lower values are rejected.
pub const PBKDF2_MIN_ITERATIONS: u32 = 100_000;
/// Default PBKDF2 iteration count.
pub const PBKDF2_DEFAULT_ITERATIONS: u32 = 100_000;
/// Salt length in bytes for key derivation.
pub const SALT_LENGTH: usize = 32;
/// AES-GCM nonce length in bytes.
pub const IV_LENGTH: usize = 12;
/// AES-GCM authentication tag length in bytes.
pub const TAG_LENGTH: usize = 16;
