//! Append-only audit persistence for hlgate.
//!
//! Audit events are written once and never mutated. Two sinks are provided:
//! a daily-rotated JSON Lines file sink for production and an in-memory sink
//! for tests and embedding.

pub mod error;
pub mod sink;

pub use error::{PersistenceError, PersistenceResult};
pub use sink::{AuditSink, JsonLinesAuditSink, MemoryAuditSink};
