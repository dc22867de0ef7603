//! Snapshot Persistence
//!
//! Durable storage of run state so a suspended run can be resumed later,
//! possibly by another process.
//!
//! # Components
//!
//! - [`codec`]: Versioned snapshot envelope and its JSON encoding
//! - [`store`]: The [`SnapshotStore`] contract and an in-memory store
//! - [`file`]: A directory-backed store, one file per run

pub mod codec;
pub mod file;
pub mod store;

pub use codec::{Snapshot, SNAPSHOT_VERSION};
pub use file::FileSnapshotStore;
pub use store::{InMemorySnapshotStore, SnapshotStore, StorageError};
