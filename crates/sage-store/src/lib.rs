//! # sage-store
//!
//! Document store for the Sage pipeline, backed by SQLite in WAL mode.
//! Exposes the collections the core reads and writes: sessions, messages
//! (with embeddings and emotion snapshots), ability estimates plus their
//! idempotency ledger, provider health snapshots, benchmark snapshots and
//! the cost ledger.
//!
//! Messages and sessions are exclusively owned here; the pipeline holds ids
//! only for the lifetime of one request.

mod store;

pub use store::{CostPeriod, DocumentStore};
