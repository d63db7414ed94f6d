//! Anthropic Messages API adapter.

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::debug;

use sage_core::{ProviderDescriptor, Result, SageError, TokenBudget};

use crate::client::{Chunk, Generation, ProviderClient};

pub struct AnthropicProvider {
    descriptor: ProviderDescriptor,
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(descriptor: ProviderDescriptor, api_key: String) -> Self {
        Self {
            descriptor,
            client: Client::new(),
            api_key,
            base_url: "https://api.anthropic.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn build_body(&self, prompt: &str, budget: &TokenBudget, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.descriptor.model,
            "max_tokens": budget.response_tokens,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
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
impl ProviderClient for AnthropicProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(&self, prompt: &str, budget: &TokenBudget) -> Result<Generation> {
        let started = std::time::Instant::now();
        debug!(model = %self.descriptor.model, "sending Anthropic request");

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&self.build_body(prompt, budget, false))
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("HTTP {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let text = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        (b["type"] == "text").then(|| b["text"].as_str().unwrap_or("").to_string())
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(Generation {
            input_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
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
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&self.build_body(prompt, budget, true))
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("HTTP {status}: {text}")));
        }

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            let mut input_tokens = 0u32;
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

                // Process complete SSE lines
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer = buffer[newline_pos + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };

                    match event["type"].as_str() {
                        Some("message_start") => {
                            if let Some(it) =
                                event["message"]["usage"]["input_tokens"].as_u64()
                            {
                                input_tokens = it as u32;
                            }
                        }
                        Some("content_block_delta") => {
                            if event["delta"]["type"].as_str() == Some("text_delta")
                                && let Some(text) = event["delta"]["text"].as_str()
                            {
                                if tx.send(Chunk::Text(text.to_string())).await.is_err() {
                                    return; // receiver dropped (cancelled)
                                }
                            }
                        }
                        Some("message_delta") => {
                            if let Some(ot) = event["usage"]["output_tokens"].as_u64() {
                                output_tokens = ot as u32;
                            }
                        }
                        Some("message_stop") => {
                            let _ = tx
                                .send(Chunk::Done {
                                    input_tokens,
                                    output_tokens,
                                })
                                .await;
                            return;
                        }
                        Some("error") => {
                            let msg = event["error"]["message"]
                                .as_str()
                                .unwrap_or("provider stream error")
                                .to_string();
                            let _ = tx.send(Chunk::Error(msg)).await;
                            return;
                        }
                        _ => {}
                    }
                }
            }
            // Stream ended without message_stop — treat as done with what
            // we observed.
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
