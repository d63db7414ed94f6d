//! OpenAI-compatible chat completions adapter (OpenAI, Azure, Together,
//! vLLM, etc.)

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::debug;

use sage_core::{ProviderDescriptor, Result, SageError, TokenBudget};

use crate::client::{Chunk, Generation, ProviderClient, estimate_tokens};

pub struct OpenAiProvider {
    descriptor: ProviderDescriptor,
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(descriptor: ProviderDescriptor, api_key: String) -> Self {
        Self {
            descriptor,
            client: Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
        }
    }

    /// Use a custom base URL (for Azure, Together, vLLM, etc.)
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn build_body(&self, prompt: &str, budget: &TokenBudget, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.descriptor.model,
            "max_tokens": budget.response_tokens,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    fn unavailable(&self, reason: impl Into<String>) -> SageError {
        SageError::ProviderUnavailable {
            provider: self.descriptor.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate(&self, prompt: &str, budget: &TokenBudget) -> Result<Generation> {
        let started = std::time::Instant::now();
        debug!(model = %self.descriptor.model, "sending OpenAI-compatible request");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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

        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let input_tokens = data["usage"]["prompt_tokens"]
            .as_u64()
            .map(|v| v as u32)
            .unwrap_or_else(|| estimate_tokens(prompt));
        let output_tokens = data["usage"]["completion_tokens"]
            .as_u64()
            .map(|v| v as u32)
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(Generation {
            text,
            input_tokens,
            output_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        budget: &TokenBudget,
    ) -> Result<mpsc::Receiver<Chunk>> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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
        let prompt_len_estimate = estimate_tokens(prompt);
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            let mut emitted = String::new();
            let mut input_tokens = prompt_len_estimate;
            let mut output_tokens = 0u32;
            let mut usage_seen = false;

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Chunk::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer = buffer[newline_pos + 1..].to_string();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        if !usage_seen {
                            output_tokens = estimate_tokens(&emitted);
                        }
                        let _ = tx
                            .send(Chunk::Done {
                                input_tokens,
                                output_tokens,
                            })
                            .await;
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };

                    if let Some(usage) = event["usage"].as_object() {
                        if let Some(pt) = usage.get("prompt_tokens").and_then(|v| v.as_u64()) {
                            input_tokens = pt as u32;
                        }
                        if let Some(ct) = usage.get("completion_tokens").and_then(|v| v.as_u64())
                        {
                            output_tokens = ct as u32;
                            usage_seen = true;
                        }
                    }
                    if let Some(delta) = event["choices"][0]["delta"]["content"].as_str()
                        && !delta.is_empty()
                    {
                        emitted.push_str(delta);
                        if tx.send(Chunk::Text(delta.to_string())).await.is_err() {
                            return; // receiver dropped (cancelled)
                        }
                    }
                }
            }
            if !usage_seen {
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
