use async_trait::async_trait;
use tokio::sync::mpsc;

use sage_core::{ProviderDescriptor, Result, TokenBudget};

/// A complete (non-streaming) generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
}

/// One element of a streaming generation.
///
/// The sequence is finite and not restartable: zero or more `Text` chunks
/// (partial-text fragments, not necessarily token-aligned), then exactly
/// one `Done` or `Error`.
#[derive(Debug, Clone)]
pub enum Chunk {
    Text(String),
    Done {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// Transport failure mid-stream. The engine folds this into a
    /// `PartialStream` error carrying whatever text was accumulated.
    Error(String),
}

/// Uniform interface over heterogeneous LLM backends.
///
/// `generate_stream` returning `Err` means the provider failed before the
/// first chunk (`ProviderUnavailable`, retryable down the fallback chain);
/// a `Chunk::Error` after text has flowed is a partial-stream failure and
/// is never retried.
#[async_trait]
pub trait ProviderClient: std::fmt::Debug + Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    async fn generate(&self, prompt: &str, budget: &TokenBudget) -> Result<Generation>;

    async fn generate_stream(
        &self,
        prompt: &str,
        budget: &TokenBudget,
    ) -> Result<mpsc::Receiver<Chunk>>;
}

/// Rough token estimate for backends that do not report usage:
/// ~4 chars per token.
pub fn estimate_tokens(text: &str) -> u32 {
    ((text.len() / 4).max(1)) as u32
}
