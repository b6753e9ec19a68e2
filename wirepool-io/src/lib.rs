//! Non-blocking socket primitives shared by the `wirepool` engine.
//!
//! This crate only owns the platform-facing edge: binding, non-blocking
//! connect, and readiness polling. It knows nothing about queues, worker
//! pools, or business logic — those live in `wirepool`.

pub mod error;
pub mod socket;
