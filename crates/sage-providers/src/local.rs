//! Local model adapter — wraps an Ollama-compatible inference server
//! (llama.cpp, MLX, Ollama). Local generation is free, so descriptors
//! typically carry zero per-token cost.

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::debug;

use sage_core::{ProviderDescriptor, Result, SageError, TokenBudget};

use crate::client::{Chunk, Generation, ProviderClient, estimate_tokens};

#[derive(Debug)]
pub struct LocalProvider {
    descriptor: ProviderDescriptor,
    client: Client,
    /// Address of the local inference server (e.g. "http://127.0.0.1:11434")
    base_url: String,
}

impl LocalProvider {
    pub fn new(descriptor: ProviderDescriptor, base_url: String) -> Self {
        Self {
            descriptor,
            client: Client::new(),
            base_url,
        }
    }

    /// Default Ollama instance.
    pub fn ollama(descriptor: ProviderDescriptor) -> Self {
        Self::new(descriptor, "http://127.0.0.1:11434".into())
    }

    fn build_body(&self, prompt: &str, budget: &TokenBudget, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.descriptor.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
            "options": {
                "num_predict": budget.response_tokens,
            }
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> SageError {
        SageError::ProviderUnavailable {
            provider: self.descriptor.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ProviderClient for LocalProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(&self, prompt: &str, budget: &TokenBudget) -> Result<Generation> {
        let started = std::time::Instant::now();
        debug!(model = %self.descriptor.model, "sending local model request");

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.build_body(prompt, budget, false))
            .send()
            .await
            .map_err(|e| self.unavailable(format!("local: {e}")))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("local model error: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let text = data["message"]["content"].as_str().unwrap_or("").to_string();
        Ok(Generation {
            input_tokens: data["prompt_eval_count"]
                .as_u64()
                .map(|v| v as u32)
                .unwrap_or_else(|| estimate_tokens(prompt)),
            output_tokens: data["eval_count"]
                .as_u64()
                .map(|v| v as u32)
                .unwrap_or_else(|| estimate_tokens(&text)),
            latency_ms: started.elapsed().as_millis() as u64,
            text,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        budget: &TokenBudget,
    ) -> Result<mpsc::Receiver<Chunk>> {
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.build_body(prompt, budget, true))
            .send()
            .await
            .map_err(|e| self.unavailable(format!("local: {e}")))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("local model error: {text}")));
        }

        let (tx, rx) = mpsc::channel(256);
        let prompt_estimate = estimate_tokens(prompt);
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            let mut emitted = String::new();
            let mut input_tokens = prompt_estimate;
            let mut output_tokens = 0u32;

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Chunk::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Ollama sends newline-delimited JSON
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer = buffer[newline_pos + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&line) else {
                        continue;
                    };

                    if let Some(content) = event["message"]["content"].as_str()
                        && !content.is_empty()
                    {
                        emitted.push_str(content);
                        if tx.send(Chunk::Text(content.to_string())).await.is_err() {
                            return; // receiver dropped (cancelled)
                        }
                    }
                    // Final message has "done": true
                    if event["done"].as_bool() == Some(true) {
                        if let Some(pt) = event["prompt_eval_count"].as_u64() {
                            input_tokens = pt as u32;
                        }
                        if let Some(et) = event["eval_count"].as_u64() {
                            output_tokens = et as u32;
                        }
                        let _ = tx
                            .send(Chunk::Done {
                                input_tokens,
                                output_tokens,
                            })
                            .await;
                        return;
                    }
                }
            }
            if output_tokens == 0 {
                output_tokens = estimate_tokens(&emitted);
            }
            let _ = tx
                .send(Chunk::Done {
                    input_tokens,
                    output_tokens,
                })
                .await;
        });

        Ok(rx)
    }
}
