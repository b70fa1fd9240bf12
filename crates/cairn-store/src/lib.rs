//! # cairn-store
//!
//! Durable, expiring per-session state for Cairn.
//!
//! This crate provides:
//! - Key-value backend abstraction with TTL, hashes, sorted sets and pipelines
//! - In-memory backend with lazy expiry
//! - Context store: session contexts, stage snapshots, execution records
//! - Observer list for context change notifications

mod backend;
mod context;
pub mod keys;
mod memory;
mod observer;

pub use backend::{Command, KvBackend, Reply};
pub use context::{ContextPatch, ContextStore, MetricsEntry, UpdateOptions};
pub use memory::MemoryBackend;
pub use observer::{ChannelObserver, ContextEvent, ContextEventKind, ContextObserver};
