//! The core of a pluggable network-service engine: UDP ingestion with
//! classification and bounded per-group queues feeding dynamically sized
//! worker pools, a TCP server, an assistor thread pool, a calendar-aligned
//! scheduler, and a lifecycle controller tying them together behind a
//! single [`business::Business`] plugin trait.
//!
//! `wirepool` owns I/O, concurrency, backpressure, timeouts, and graceful
//! shutdown; it never loads configuration from disk/environment and never
//! installs a `tracing` subscriber itself — both remain the embedding
//! binary's job.

pub mod assistor;
pub mod business;
pub mod error;
pub mod lifecycle;
pub mod options;
pub mod scheduler;
pub mod signals;
pub mod sync;
pub mod tcp;
pub mod udp;
pub mod util;

pub use business::Business;
pub use error::{EngineError, Result};
pub use lifecycle::Lifecycle;
pub use options::Options;
