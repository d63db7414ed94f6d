//! # sage-core
//!
//! Core types and primitives for the Sage adaptive learning server.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: messages and sessions, emotion results, ability estimates,
//! token budgets, provider descriptors and the wire-level stream events.

pub mod ability;
pub mod emotion;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

pub use ability::{AbilityEstimate, DifficultyLevel, Outcome};
pub use emotion::{
    CognitiveLoad, EmotionResult, FlowState, Intervention, LearningReadiness, Pad,
};
pub use error::{ErrorCode, Result, SageError};
pub use event::{
    ChatContext, ClientMessage, StopReason, StoppedMeta, StreamCompleteMeta, StreamEvent,
    StreamPayload, StreamStartMeta, WireError,
};
pub use message::{Message, Role, Session};
pub use provider::{
    BenchmarkScores, Category, CircuitState, ProviderDescriptor, ProviderHealth, TokenBudget,
};
