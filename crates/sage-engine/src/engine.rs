//! The pipeline engine: orchestrates one request end to end.
//!
//! Non-streaming (`process`) and streaming (`process_stream`) entry points
//! share the same preparation phase — emotion inference, context assembly
//! and ability read run concurrently, then difficulty, token budget and
//! provider selection follow. The streaming path commits to a provider
//! only once its first chunk has arrived, so a `stream_start` is emitted
//! exactly once and always names the provider that actually answers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sage_ability::{AbilityStore, pick_difficulty};
use sage_affect::AffectService;
use sage_affect::heads::LinearRegressor;
use sage_context::{AssembledContext, ContextAssembler};
use sage_core::{
    AbilityEstimate, Category, CognitiveLoad, DifficultyLevel, EmotionResult, LearningReadiness,
    Message, Outcome, ProviderDescriptor, Result, SageError, Session, StopReason, StoppedMeta,
    StreamCompleteMeta, StreamEvent, StreamPayload, StreamStartMeta, TokenBudget, WireError,
};
use sage_providers::{Chunk, HealthTracker, ProviderClient, ProviderSelector};
use sage_store::DocumentStore;

use crate::budget::{BudgetParams, allocate, fit_to};
use crate::cost::CostEnforcer;
use crate::prompt::{PromptInputs, build_prompt};
use crate::stream::StreamRegistry;

/// A non-streaming chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub message: String,
    pub subject: Option<String>,
    /// Pre-computed embedding of the message, when the transport's
    /// embedding service has one. Relevance retrieval is skipped without it.
    pub embedding: Option<Vec<f32>>,
}

/// The assembled non-streaming response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub assistant_message_id: Uuid,
    pub content: String,
    pub emotion: EmotionResult,
    pub provider: String,
    pub latency_ms: u64,
    pub tokens: u32,
    pub cost: f64,
    pub ability_updated: AbilityEstimate,
}

/// A streaming chat request (the wire `chat_stream` message).
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub message_id: Uuid,
    pub session_id: Option<Uuid>,
    pub user_id: String,
    pub message: String,
    pub subject: Option<String>,
    /// Pre-computed embedding of the message, when available.
    pub embedding: Option<Vec<f32>>,
}

pub struct Engine {
    store: Arc<DocumentStore>,
    affect: Arc<AffectService>,
    abilities: AbilityStore,
    assembler: ContextAssembler,
    selector: Arc<ProviderSelector>,
    health: Arc<HealthTracker>,
    cost: CostEnforcer,
    registry: StreamRegistry,
    budget_params: BudgetParams,
    complexity: Option<LinearRegressor>,
    safety_margin: u32,
    provider_timeout: Duration,
    shutdown: CancellationToken,
    accepting: AtomicBool,
}

/// Everything prepared before the provider call.
struct Prepared {
    session: Session,
    user_message_id: Uuid,
    subject: String,
    emotion: EmotionResult,
    context: AssembledContext,
    ability: AbilityEstimate,
    difficulty: DifficultyLevel,
    category: Category,
    budget: TokenBudget,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DocumentStore>,
        affect: Arc<AffectService>,
        abilities: AbilityStore,
        assembler: ContextAssembler,
        selector: Arc<ProviderSelector>,
        health: Arc<HealthTracker>,
        cost: CostEnforcer,
        budget_params: BudgetParams,
        complexity: Option<LinearRegressor>,
        safety_margin: u32,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            affect,
            abilities,
            assembler,
            selector,
            health,
            cost,
            registry: StreamRegistry::new(),
            budget_params,
            complexity,
            safety_margin,
            provider_timeout,
            shutdown: CancellationToken::new(),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Request cancellation of a running stream (owner-checked).
    pub fn cancel(&self, message_id: Uuid, user_id: &str) -> bool {
        self.registry.cancel(message_id, user_id)
    }

    /// Stop accepting new requests, wait up to `grace` for in-flight
    /// streams, then cancel the rest (they terminate with
    /// `generation_stopped(reason=shutdown)`).
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        info!(active = self.registry.active_count(), "engine draining");
        let deadline = Instant::now() + grace;
        while self.registry.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.shutdown.cancel();
        self.registry.cancel_all();
    }

    // ── Shared preparation ─────────────────────────────────────

    /// The widest provider window; budgets are allocated against it and
    /// refitted per candidate.
    fn max_window(&self) -> u32 {
        self.selector
            .providers()
            .iter()
            .map(|p| p.descriptor().max_context_tokens)
            .max()
            .unwrap_or(8192)
    }

    /// Worst-case per-token rate across the fleet, for the pre-flight
    /// cost projection.
    fn worst_rate(&self) -> f64 {
        self.selector
            .providers()
            .iter()
            .map(|p| {
                let d = p.descriptor();
                d.cost_per_input_token.max(d.cost_per_output_token)
            })
            .fold(0.0, f64::max)
    }

    async fn prepare(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        message: &str,
        subject: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> Result<Prepared> {
        if message.trim().is_empty() {
            return Err(SageError::InvalidMessage("empty message".into()));
        }

        let session = match session_id {
            Some(id) => {
                let session = self
                    .store
                    .get_session(id)?
                    .ok_or_else(|| SageError::SessionNotFound(id.to_string()))?;
                if session.user_id != user_id {
                    return Err(SageError::Unauthorized("session owner mismatch".into()));
                }
                session
            }
            None => {
                let session = Session::new(user_id);
                self.store.create_session(&session)?;
                session
            }
        };

        let mut user_message = Message::user(session.id, user_id, message);
        user_message.embedding = embedding;
        let user_message_id = user_message.id;
        self.store.insert_message(&user_message)?;
        self.store
            .touch_session(session.id, user_message.estimate_tokens() as u64, 0.0)?;

        let subject = subject.unwrap_or("general").to_string();

        // The ability read comes first: the flow head consumes θ.
        let ability = self
            .abilities
            .get(user_id, &subject)
            .unwrap_or_else(|e| {
                warn!(error = %e, "ability read failed, using prior");
                AbilityEstimate::prior(user_id, &subject)
            });

        // Emotion inference and context assembly run concurrently; both
        // degrade rather than fail the request.
        let (emotion, context) = tokio::join!(
            self.affect
                .analyze(message, Some(user_id), ability.theta as f32),
            async {
                self.assembler
                    .assemble(session.id, user_id, user_message.embedding.as_deref(), user_message.timestamp)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "context assembly failed, continuing without context");
                        AssembledContext::default()
                    })
            }
        );

        let difficulty = pick_difficulty(&ability, &emotion);
        let category = classify_category(message);
        let budget = allocate(
            message,
            &emotion,
            &ability,
            self.max_window(),
            &self.budget_params,
            self.complexity.as_ref(),
        );

        self.cost
            .preflight(user_id, budget.total() as f64 * self.worst_rate())?;

        debug!(
            session = %session.id,
            %category,
            ?difficulty,
            reasoning = budget.reasoning_tokens,
            response = budget.response_tokens,
            "request prepared"
        );

        Ok(Prepared {
            session,
            user_message_id,
            subject,
            emotion,
            context,
            ability,
            difficulty,
            category,
            budget,
        })
    }

    fn prompt_for(&self, p: &Prepared, message: &str, budget: &TokenBudget) -> String {
        build_prompt(
            &PromptInputs {
                user_message: message,
                emotion: &p.emotion,
                ability: &p.ability,
                difficulty: p.difficulty,
                context: &p.context,
            },
            budget,
            self.safety_margin,
        )
    }

    /// Persist the assistant message and run the post-flight updates.
    /// Returns the refreshed ability estimate.
    fn finish_exchange(
        &self,
        p: &Prepared,
        assistant: &Message,
    ) -> Result<AbilityEstimate> {
        self.store.insert_message(assistant)?;
        self.store.touch_session(
            p.session.id,
            assistant.token_count.unwrap_or(0) as u64,
            assistant.cost.unwrap_or(0.0),
        )?;
        let updated = self.abilities.update(
            &assistant.user_id,
            &p.subject,
            p.user_message_id,
            p.difficulty,
            derive_outcome(&p.emotion),
        )?;
        self.cost
            .record(&assistant.user_id, assistant.cost.unwrap_or(0.0))?;
        Ok(updated)
    }

    // ── Non-streaming entry point ──────────────────────────────

    pub async fn process(&self, req: ChatRequest) -> Result<ChatResponse> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SageError::Internal(anyhow::anyhow!(
                "engine is shutting down"
            )));
        }

        let prepared = self
            .prepare(
                &req.user_id,
                req.session_id,
                &req.message,
                req.subject.as_deref(),
                req.embedding.clone(),
            )
            .await?;
        let ranked = self.selector.select(prepared.category, &prepared.budget)?;

        let mut last_err: Option<SageError> = None;
        for provider in ranked {
            let desc = provider.descriptor().clone();
            let fitted = fit_to(&prepared.budget, desc.max_context_tokens, &self.budget_params);
            let prompt = self.prompt_for(&prepared, &req.message, &fitted);
            let started = Instant::now();

            let outcome =
                tokio::time::timeout(self.provider_timeout, provider.generate(&prompt, &fitted))
                    .await;
            match outcome {
                Ok(Ok(generation)) => {
                    let latency = started.elapsed();
                    self.health.observe(&desc.name, true, latency);

                    let cost = desc.cost_of(generation.input_tokens, generation.output_tokens);
                    let tokens = generation.input_tokens + generation.output_tokens;
                    let mut assistant =
                        Message::assistant(prepared.session.id, &req.user_id, generation.text);
                    assistant.emotion_snapshot = Some(prepared.emotion.clone());
                    assistant.provider = Some(desc.name.clone());
                    assistant.latency_ms = Some(latency.as_millis() as u64);
                    assistant.token_count = Some(tokens);
                    assistant.cost = Some(cost);

                    let ability_updated = self.finish_exchange(&prepared, &assistant)?;

                    return Ok(ChatResponse {
                        session_id: prepared.session.id,
                        assistant_message_id: assistant.id,
                        content: assistant.content,
                        emotion: prepared.emotion,
                        provider: desc.name,
                        latency_ms: latency.as_millis() as u64,
                        tokens,
                        cost,
                        ability_updated,
                    });
                }
                Ok(Err(e @ SageError::ProviderUnavailable { .. })) => {
                    self.health.observe(&desc.name, false, started.elapsed());
                    warn!(provider = %desc.name, error = %e, "provider unavailable, trying next");
                    last_err = Some(e);
                }
                Ok(Err(e)) => {
                    self.health.observe(&desc.name, false, started.elapsed());
                    return Err(e);
                }
                Err(_) => {
                    self.health.observe(&desc.name, false, started.elapsed());
                    warn!(provider = %desc.name, "provider timed out, trying next");
                    last_err = Some(SageError::GenerationTimeout(
                        self.provider_timeout.as_secs(),
                    ));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| SageError::NoProviderAvailable(prepared.category.as_str().into())))
    }

    // ── Streaming entry point ──────────────────────────────────

    /// Run a streaming request; events arrive on the returned channel in
    /// the protocol order and end with exactly one terminal event.
    pub fn process_stream(self: &Arc<Self>, req: StreamRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(256);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_stream(req, tx).await;
        });
        rx
    }

    async fn run_stream(&self, req: StreamRequest, tx: mpsc::Sender<StreamEvent>) {
        let provisional_session = req.session_id.unwrap_or_default();
        let mut emitter = Emitter::new(tx, req.message_id, provisional_session);

        if !self.accepting.load(Ordering::SeqCst) {
            emitter
                .terminal_error(
                    &SageError::Internal(anyhow::anyhow!("engine is shutting down")),
                    String::new(),
                )
                .await;
            return;
        }

        let Some((_guard, cancel)) =
            self.registry
                .register(req.message_id, provisional_session, &req.user_id)
        else {
            emitter
                .terminal_error(
                    &SageError::InvalidMessage("message_id is already streaming".into()),
                    String::new(),
                )
                .await;
            return;
        };

        let prepared = match self
            .prepare(
                &req.user_id,
                req.session_id,
                &req.message,
                req.subject.as_deref(),
                req.embedding.clone(),
            )
            .await
        {
            Ok(p) => p,
            Err(e) => {
                // Pre-flight failures (budget exhausted among them) surface
                // as the only event: no stream_start is emitted.
                emitter.terminal_error(&e, String::new()).await;
                return;
            }
        };
        emitter.session_id = prepared.session.id;

        let ranked = match self.selector.select(prepared.category, &prepared.budget) {
            Ok(r) => r,
            Err(e) => {
                emitter.terminal_error(&e, String::new()).await;
                return;
            }
        };

        let ai_message_id = Uuid::new_v4();

        if cancel.is_cancelled() {
            emitter
                .stopped(ai_message_id, StopReason::UserCancelled, String::new(), 0, 0.0, 0)
                .await;
            return;
        }

        // Commit to the first provider that yields a first chunk; failures
        // before that point walk the fallback chain.
        let mut committed: Option<(Arc<dyn ProviderClient>, mpsc::Receiver<Chunk>, Chunk, TokenBudget, Instant)> =
            None;
        for provider in ranked {
            let desc = provider.descriptor().clone();
            let fitted = fit_to(&prepared.budget, desc.max_context_tokens, &self.budget_params);
            let prompt = self.prompt_for(&prepared, &req.message, &fitted);
            let started = Instant::now();

            let stream = tokio::time::timeout(
                self.provider_timeout,
                provider.generate_stream(&prompt, &fitted),
            )
            .await;
            let mut chunk_rx = match stream {
                Ok(Ok(rx)) => rx,
                Ok(Err(e @ SageError::ProviderUnavailable { .. })) => {
                    self.health.observe(&desc.name, false, started.elapsed());
                    warn!(provider = %desc.name, error = %e, "stream unavailable, trying next");
                    continue;
                }
                Ok(Err(e)) => {
                    self.health.observe(&desc.name, false, started.elapsed());
                    emitter.terminal_error(&e, String::new()).await;
                    return;
                }
                Err(_) => {
                    self.health.observe(&desc.name, false, started.elapsed());
                    warn!(provider = %desc.name, "stream connect timed out, trying next");
                    continue;
                }
            };

            match tokio::time::timeout(self.provider_timeout, chunk_rx.recv()).await {
                Ok(Some(Chunk::Error(reason))) => {
                    // Failed before the first text chunk: still retryable.
                    self.health.observe(&desc.name, false, started.elapsed());
                    warn!(provider = %desc.name, reason, "stream broke before first chunk");
                    continue;
                }
                Ok(Some(first)) => {
                    committed = Some((provider, chunk_rx, first, fitted, started));
                    break;
                }
                Ok(None) | Err(_) => {
                    self.health.observe(&desc.name, false, started.elapsed());
                    continue;
                }
            }
        }

        let Some((provider, mut chunk_rx, first_chunk, _fitted, started)) = committed else {
            emitter
                .terminal_error(
                    &SageError::NoProviderAvailable(prepared.category.as_str().into()),
                    String::new(),
                )
                .await;
            return;
        };
        let desc = provider.descriptor().clone();

        emitter
            .emit(StreamPayload::StreamStart {
                ai_message_id,
                metadata: StreamStartMeta {
                    provider: desc.name.clone(),
                    category: prepared.category,
                },
            })
            .await;
        emitter
            .emit(StreamPayload::EmotionUpdate {
                emotion: prepared.emotion.clone(),
            })
            .await;
        emitter
            .emit(StreamPayload::ContextInfo {
                recent_messages_used: prepared.context.recent.len(),
                relevant_messages_used: prepared.context.relevant.len(),
            })
            .await;

        // ── Consume the stream ─────────────────────────────────
        let mut partial = String::new();
        let mut chunk_index: u64 = 0;
        let mut code = CodeTracker::default();
        let mut usage: Option<(u32, u32)> = None;
        let deadline = tokio::time::Instant::now() + self.provider_timeout;

        enum Ending {
            Done,
            Broken(String),
            Cancelled,
            Shutdown,
            TimedOut,
        }

        let mut pending = Some(first_chunk);
        let ending = loop {
            let chunk = if let Some(first) = pending.take() {
                Some(first)
            } else {
                tokio::select! {
                    biased;
                    // Shutdown outranks user cancellation: cancel_all during
                    // drain fires both tokens.
                    _ = self.shutdown.cancelled() => break Ending::Shutdown,
                    _ = cancel.cancelled() => break Ending::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => break Ending::TimedOut,
                    chunk = chunk_rx.recv() => chunk,
                }
            };
            match chunk {
                Some(Chunk::Text(text)) => {
                    let is_code = code.observe(&text);
                    partial.push_str(&text);
                    emitter
                        .emit(StreamPayload::ContentChunk {
                            content: text,
                            chunk_index,
                            is_code,
                        })
                        .await;
                    chunk_index += 1;
                }
                Some(Chunk::Done {
                    input_tokens,
                    output_tokens,
                }) => {
                    usage = Some((input_tokens, output_tokens));
                    break Ending::Done;
                }
                Some(Chunk::Error(reason)) => break Ending::Broken(reason),
                None => break Ending::Broken("provider stream closed unexpectedly".into()),
            }
        };

        let was_cancelled = matches!(ending, Ending::Cancelled);
        let elapsed = started.elapsed();
        let (input_tokens, output_tokens) = usage.unwrap_or_else(|| {
            (
                sage_providers::client::estimate_tokens(&req.message),
                sage_providers::client::estimate_tokens(&partial),
            )
        });
        let cost = desc.cost_of(input_tokens, output_tokens);
        let tokens = input_tokens + output_tokens;

        match ending {
            Ending::Done => {
                self.health.observe(&desc.name, true, elapsed);

                let mut assistant = Message {
                    id: ai_message_id,
                    ..Message::assistant(prepared.session.id, &req.user_id, partial.clone())
                };
                assistant.emotion_snapshot = Some(prepared.emotion.clone());
                assistant.provider = Some(desc.name.clone());
                assistant.latency_ms = Some(elapsed.as_millis() as u64);
                assistant.token_count = Some(tokens);
                assistant.cost = Some(cost);

                match self.finish_exchange(&prepared, &assistant) {
                    Ok(ability_updated) => {
                        emitter
                            .emit(StreamPayload::StreamComplete {
                                ai_message_id,
                                full_content: partial,
                                metadata: StreamCompleteMeta {
                                    provider_used: desc.name,
                                    response_time_ms: elapsed.as_millis() as u64,
                                    tokens_used: tokens,
                                    cost,
                                    ability_updated,
                                },
                            })
                            .await;
                    }
                    Err(e) => {
                        emitter.terminal_error(&e, partial).await;
                    }
                }
            }
            Ending::Broken(reason) => {
                self.health.observe(&desc.name, false, elapsed);
                self.persist_partial(&prepared, ai_message_id, &req.user_id, &partial, &desc, tokens, cost);
                let err = SageError::PartialStream {
                    partial: partial.clone(),
                    reason,
                };
                emitter.terminal_error(&err, partial).await;
            }
            Ending::TimedOut => {
                self.health.observe(&desc.name, false, elapsed);
                self.persist_partial(&prepared, ai_message_id, &req.user_id, &partial, &desc, tokens, cost);
                emitter
                    .terminal_error(
                        &SageError::GenerationTimeout(self.provider_timeout.as_secs()),
                        partial,
                    )
                    .await;
            }
            Ending::Cancelled | Ending::Shutdown => {
                // The provider itself did not fail.
                self.health.observe(&desc.name, true, elapsed);
                self.persist_partial(&prepared, ai_message_id, &req.user_id, &partial, &desc, tokens, cost);
                let reason = if was_cancelled {
                    StopReason::UserCancelled
                } else {
                    StopReason::Shutdown
                };
                emitter
                    .stopped(
                        ai_message_id,
                        reason,
                        partial,
                        tokens,
                        cost,
                        elapsed.as_millis() as u64,
                    )
                    .await;
            }
        }
    }

    /// Persist a partial assistant message (cancelled / broken / timed-out
    /// streams). Best-effort: failures are logged, never surfaced.
    #[allow(clippy::too_many_arguments)]
    fn persist_partial(
        &self,
        prepared: &Prepared,
        ai_message_id: Uuid,
        user_id: &str,
        partial: &str,
        desc: &ProviderDescriptor,
        tokens: u32,
        cost: f64,
    ) {
        if partial.is_empty() {
            return;
        }
        let mut assistant = Message {
            id: ai_message_id,
            ..Message::assistant(prepared.session.id, user_id, partial)
        };
        assistant.emotion_snapshot = Some(prepared.emotion.clone());
        assistant.provider = Some(desc.name.clone());
        assistant.token_count = Some(tokens);
        assistant.cost = Some(cost);
        if let Err(e) = self.store.insert_message(&assistant) {
            warn!(error = %e, "failed to persist partial assistant message");
            return;
        }
        if let Err(e) = self
            .store
            .touch_session(prepared.session.id, tokens as u64, cost)
        {
            warn!(error = %e, "failed to update session counters for partial message");
        }
        if let Err(e) = self.cost.record(user_id, cost) {
            warn!(error = %e, "failed to record partial-stream cost");
        }
    }
}

// ── Event emission with terminal discipline ────────────────────

struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    message_id: Uuid,
    session_id: Uuid,
    terminal_sent: bool,
}

impl Emitter {
    fn new(tx: mpsc::Sender<StreamEvent>, message_id: Uuid, session_id: Uuid) -> Self {
        Self {
            tx,
            message_id,
            session_id,
            terminal_sent: false,
        }
    }

    async fn emit(&mut self, payload: StreamPayload) {
        if self.terminal_sent {
            return;
        }
        let event = StreamEvent::new(self.message_id, self.session_id, payload);
        if event.is_terminal() {
            self.terminal_sent = true;
        }
        let _ = self.tx.send(event).await;
    }

    async fn terminal_error(&mut self, err: &SageError, partial_content: String) {
        self.emit(StreamPayload::StreamError {
            error: WireError {
                code: err.code(),
                message: err.to_string(),
                recoverable: err.recoverable(),
            },
            partial_content,
        })
        .await;
    }

    async fn stopped(
        &mut self,
        ai_message_id: Uuid,
        reason: StopReason,
        partial_content: String,
        tokens_used: u32,
        cost: f64,
        stopped_at_ms: u64,
    ) {
        self.emit(StreamPayload::GenerationStopped {
            ai_message_id,
            reason,
            partial_content,
            metadata: StoppedMeta {
                tokens_used,
                cost,
                stopped_at_ms,
            },
        })
        .await;
    }
}

// ── Small deterministic helpers ────────────────────────────────

/// Track fenced code blocks across chunk boundaries; a chunk counts as
/// code when any part of it lies inside a fence.
#[derive(Default)]
struct CodeTracker {
    in_code: bool,
}

impl CodeTracker {
    fn observe(&mut self, chunk: &str) -> bool {
        let was = self.in_code;
        if chunk.matches("```").count() % 2 == 1 {
            self.in_code = !self.in_code;
        }
        was || self.in_code
    }
}

/// Route a message to a task category from its surface features.
pub fn classify_category(message: &str) -> Category {
    let lower = message.to_lowercase();
    let any = |set: &[&str]| set.iter().any(|m| lower.contains(m));

    if any(&["```", "compile", "function", "bug", "code", "rust", "python", "refactor"]) {
        Category::Coding
    } else if any(&["equation", "integral", "derivative", "algebra", "calculate", "theorem", "math"]) {
        Category::Math
    } else if any(&["story", "poem", "essay", "write a", "creative", "imagine"]) {
        Category::Creative
    } else if any(&["why", "prove", "reason", "logic", "deduce", "argue"]) {
        Category::Reasoning
    } else {
        Category::General
    }
}

/// Proxy outcome for the IRT update: the exchange counts as a success
/// when the learner's state indicates comprehension rather than struggle.
fn derive_outcome(emotion: &EmotionResult) -> Outcome {
    if emotion.learning_readiness >= LearningReadiness::Moderate
        && emotion.cognitive_load <= CognitiveLoad::Moderate
    {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_classification_is_deterministic() {
        assert_eq!(classify_category("Fix this rust code ```fn main```"), Category::Coding);
        assert_eq!(classify_category("Solve the equation x + 2 = 5"), Category::Math);
        assert_eq!(classify_category("Write a story about a dragon"), Category::Creative);
        assert_eq!(classify_category("Why does gravity exist? Prove it"), Category::Reasoning);
        assert_eq!(classify_category("Tell me about photosynthesis"), Category::General);
    }

    #[test]
    fn code_tracker_spans_chunks() {
        let mut tracker = CodeTracker::default();
        assert!(!tracker.observe("here is some code:\n"));
        assert!(tracker.observe("```rust\nfn main() {"));
        assert!(tracker.observe("    println!(\"hi\");"));
        assert!(tracker.observe("}\n```"));
        assert!(!tracker.observe("that was it!"));
    }

    #[test]
    fn outcome_follows_learner_state() {
        assert_eq!(derive_outcome(&EmotionResult::neutral()), Outcome::Success);
        let mut struggling = EmotionResult::neutral();
        struggling.cognitive_load = CognitiveLoad::Overload;
        assert_eq!(derive_outcome(&struggling), Outcome::Failure);
    }
}
