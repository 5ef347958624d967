//! Taskstash - offline-first task manager core
//!
//! This library keeps a user's tasks durable on-device, transparently queues
//! changes made while offline, and reconciles them with a remote backend
//! when connectivity returns. It provides per-user isolation, encrypted
//! persistence, a durable retry queue with exponential backoff, and a
//! last-write-wins merge between local and remote state.
//!
//! # Modules
//!
//! The library is organized into several key modules:
//!
//! * [`config`] - Configuration management
//! * [`crypto`] - AES-256-GCM encryption and key derivation
//! * [`storage`] - Encrypting persistence adapter over a key-value provider
//! * [`repository`] - Canonical per-user task collection
//! * [`sync`] - Synchronization service and retry queue draining
//! * [`remote`] - Remote backend abstraction

/// Configuration module for managing application settings
pub mod config;

/// Constants and default values
pub mod constants;

/// AES-256-GCM encryption and PBKDF2 key derivation
pub mod crypto;

/// Error types shared across the crate
pub mod error;

/// In-memory holder for the session encryption key
pub mod keystore;

/// Logging utilities
pub mod logger;

/// Retry queue model and backoff computation
pub mod queue;

/// Remote backend trait and wire types
pub mod remote;

/// Repository layer owning the local task collection
pub mod repository;

/// Authenticated session object
pub mod session;

/// Local persistence layer and provider abstraction
pub mod storage;

/// Synchronization engine keeping local and remote data in sync
pub mod sync;

/// Task data model
pub mod task;

// Re-export the main entry points for convenient access
pub use error::{Error, Result};
pub use session::Session;
pub use sync::SyncService;
pub use task::{SyncState, Task, TaskInput, TaskPatch};
