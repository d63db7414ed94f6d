//! Streaming adapter for backends without native streaming: generate the
//! full text, then yield fixed-size slices with a small pacing delay so
//! downstream UX is uniform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sage_core::{ProviderDescriptor, Result, TokenBudget};

use crate::client::{Chunk, Generation, ProviderClient};

#[derive(Debug)]
pub struct PacedAdapter {
    inner: Arc<dyn ProviderClient>,
    chunk_chars: usize,
    pacing: Duration,
}

impl PacedAdapter {
    pub fn new(inner: Arc<dyn ProviderClient>, chunk_chars: usize, pacing: Duration) -> Self {
        Self {
            inner,
            chunk_chars: chunk_chars.max(1),
            pacing,
        }
    }
}

#[async_trait]
impl ProviderClient for PacedAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        self.inner.descriptor()
    }

    async fn generate(&self, prompt: &str, budget: &TokenBudget) -> Result<Generation> {
        self.inner.generate(prompt, budget).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        budget: &TokenBudget,
    ) -> Result<mpsc::Receiver<Chunk>> {
        // Full generation first; failure here is still "before the first
        // chunk" and therefore retryable upstream.
        let generation = self.inner.generate(prompt, budget).await?;

        let (tx, rx) = mpsc::channel(64);
        let chunk_chars = self.chunk_chars;
        let pacing = self.pacing;
        tokio::spawn(async move {
            let chars: Vec<char> = generation.text.chars().collect();
            for slice in chars.chunks(chunk_chars) {
                let piece: String = slice.iter().collect();
                if tx.send(Chunk::Text(piece)).await.is_err() {
                    return; // receiver dropped (cancelled)
                }
                tokio::time::sleep(pacing).await;
            }
            let _ = tx
                .send(Chunk::Done {
                    input_tokens: generation.input_tokens,
                    output_tokens: generation.output_tokens,
                })
                .await;
        });
        Ok(rx)
    }
}
