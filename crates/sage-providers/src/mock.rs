//! Scriptable mock provider for deterministic tests.
//!
//! Each call pops the next queued script. Scripts can succeed, fail
//! before the first chunk (provider-unavailable), or fail mid-stream
//! after a set number of chunks (partial-stream).

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sage_core::{Category, ProviderDescriptor, Result, SageError, TokenBudget};

use crate::client::{Chunk, Generation, ProviderClient, estimate_tokens};

/// A pre-configured response from the mock provider.
#[derive(Clone)]
pub struct MockScript {
    pub text: String,
    /// Fail before any chunk is produced.
    pub fail_before_start: Option<String>,
    /// Emit this many chunks, then fail mid-stream.
    pub fail_after_chunks: Option<(usize, String)>,
    /// Words per streamed chunk.
    pub chunk_words: usize,
    /// Delay between chunks, to give cancellation tests room to act.
    pub chunk_delay: Duration,
}

impl MockScript {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail_before_start: None,
            fail_after_chunks: None,
            chunk_words: 1,
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            fail_before_start: Some(reason.to_string()),
            ..Self::text("")
        }
    }

    pub fn broken_after(text: &str, chunks: usize, reason: &str) -> Self {
        Self {
            fail_after_chunks: Some((chunks, reason.to_string())),
            ..Self::text(text)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }
}

#[derive(Debug)]
pub struct MockProvider {
    descriptor: ProviderDescriptor,
    scripts: Arc<Mutex<Vec<MockScript>>>,
    /// All prompts received, for assertions.
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    pub fn named(name: &str) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                name: name.to_string(),
                model: format!("{name}-model"),
                supported_categories: BTreeSet::from(Category::ALL),
                max_context_tokens: 32_768,
                cost_per_input_token: 1e-6,
                cost_per_output_token: 2e-6,
                supports_streaming: true,
            },
            scripts: Arc::new(Mutex::new(vec![])),
            prompts: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn with_descriptor(mut self, descriptor: ProviderDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn queue(self, script: MockScript) -> Self {
        self.scripts.lock().unwrap().push(script);
        self
    }

    pub fn recorded_prompts(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }

    fn next_script(&self) -> MockScript {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            MockScript::text("(mock: no more queued responses)")
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(&self, prompt: &str, _budget: &TokenBudget) -> Result<Generation> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let script = self.next_script();

        if let Some(reason) = script.fail_before_start {
            return Err(SageError::ProviderUnavailable {
                provider: self.descriptor.name.clone(),
                reason,
            });
        }

        Ok(Generation {
            input_tokens: estimate_tokens(prompt),
            output_tokens: estimate_tokens(&script.text),
            latency_ms: 5,
            text: script.text,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _budget: &TokenBudget,
    ) -> Result<mpsc::Receiver<Chunk>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let script = self.next_script();

        if let Some(reason) = script.fail_before_start {
            return Err(SageError::ProviderUnavailable {
                provider: self.descriptor.name.clone(),
                reason,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let input_tokens = estimate_tokens(prompt);
        tokio::spawn(async move {
            let words: Vec<&str> = script.text.split_whitespace().collect();
            let mut sent = 0usize;
            for group in words.chunks(script.chunk_words.max(1)) {
                if let Some((limit, reason)) = &script.fail_after_chunks
                    && sent >= *limit
                {
                    let _ = tx.send(Chunk::Error(reason.clone())).await;
                    return;
                }
                if tx
                    .send(Chunk::Text(format!("{} ", group.join(" "))))
                    .await
                    .is_err()
                {
                    return;
                }
                sent += 1;
                if !script.chunk_delay.is_zero() {
                    tokio::time::sleep(script.chunk_delay).await;
                }
            }
            if let Some((limit, reason)) = &script.fail_after_chunks
                && sent >= *limit
            {
                let _ = tx.send(Chunk::Error(reason.clone())).await;
                return;
            }
            let _ = tx
                .send(Chunk::Done {
                    input_tokens,
                    output_tokens: estimate_tokens(&script.text),
                })
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> TokenBudget {
        TokenBudget {
            reasoning_tokens: 256,
            response_tokens: 512,
            provider_max_tokens: 4096,
            utilization: 0.2,
        }
    }

    #[tokio::test]
    async fn streams_queued_text() {
        let mock = MockProvider::named("m").queue(MockScript::text("one two three"));
        let mut rx = mock.generate_stream("p", &budget()).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::Text(t) => text.push_str(&t),
                Chunk::Done { output_tokens, .. } => {
                    assert!(output_tokens > 0);
                    break;
                }
                Chunk::Error(e) => panic!("unexpected: {e}"),
            }
        }
        assert_eq!(text.trim(), "one two three");
    }

    #[tokio::test]
    async fn unavailable_fails_before_first_chunk() {
        let mock = MockProvider::named("m").queue(MockScript::unavailable("down"));
        let err = mock.generate_stream("p", &budget()).await.unwrap_err();
        assert!(matches!(err, SageError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn mid_stream_failure_comes_after_chunks() {
        let mock =
            MockProvider::named("m").queue(MockScript::broken_after("a b c d e", 2, "reset"));
        let mut rx = mock.generate_stream("p", &budget()).await.unwrap();
        let mut texts = 0;
        loop {
            match rx.recv().await.unwrap() {
                Chunk::Text(_) => texts += 1,
                Chunk::Error(reason) => {
                    assert_eq!(reason, "reset");
                    break;
                }
                Chunk::Done { .. } => panic!("should have errored"),
            }
        }
        assert_eq!(texts, 2);
    }
}
