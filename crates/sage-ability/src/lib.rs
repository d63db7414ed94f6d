//! # sage-ability
//!
//! Ability estimation under a two-parameter logistic IRT model, persisted
//! per (user, subject), and the adaptive difficulty selection built on it.

pub mod difficulty;
pub mod irt;
pub mod store;

pub use difficulty::pick_difficulty;
pub use store::AbilityStore;
