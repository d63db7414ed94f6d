//! End-to-end pipeline scenarios over the mock provider and an in-memory
//! store: happy path, cancellation, provider fallback, budget exhaustion,
//! degraded emotion and cache coalescing.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use sage_ability::AbilityStore;
use sage_affect::{AffectParams, AffectService, ModelRegistry, StubClassifier};
use sage_context::{ContextAssembler, ContextParams};
use sage_core::{ErrorCode, Role, StreamEvent, StreamPayload};
use sage_engine::{BudgetParams, ChatRequest, CostEnforcer, Engine, StreamRequest};
use sage_providers::{
    BenchmarkRegistry, HealthTracker, MockProvider, MockScript, ProviderClient, ProviderSelector,
    SelectorWeights,
};
use sage_store::DocumentStore;

struct Harness {
    engine: Arc<Engine>,
    store: Arc<DocumentStore>,
    classifier: Arc<StubClassifier>,
}

fn harness(providers: Vec<Arc<dyn ProviderClient>>) -> Harness {
    harness_with(providers, StubClassifier::dominant("curiosity", 0.7), 5.0, Duration::from_secs(5))
}

fn harness_with(
    providers: Vec<Arc<dyn ProviderClient>>,
    classifier: StubClassifier,
    daily_budget: f64,
    provider_timeout: Duration,
) -> Harness {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let classifier = Arc::new(classifier);

    let affect = Arc::new(
        AffectService::new(
            classifier.clone(),
            &ModelRegistry::default(),
            AffectParams {
                l1_capacity: 64,
                l2_capacity: 256,
                ttl: Duration::from_secs(300),
                infer_timeout: Duration::from_millis(500),
                worker_threads: 2,
            },
        )
        .unwrap(),
    );

    let health = Arc::new(HealthTracker::new(
        3,
        Duration::from_secs(60),
        64,
        Duration::from_secs(300),
    ));
    let selector = Arc::new(
        ProviderSelector::new(
            providers,
            Arc::clone(&health),
            Arc::new(BenchmarkRegistry::new()),
            SelectorWeights::default(),
            0.0,
            0.01,
            3,
        )
        .with_seed(11),
    );

    let assembler = ContextAssembler::new(
        Arc::clone(&store),
        ContextParams {
            recent_limit: 10,
            recent_token_budget: 4096,
            relevant_limit: 5,
            relevance_threshold: 0.3,
            user_scope: false,
        },
    );

    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        affect,
        AbilityStore::new(Arc::clone(&store)),
        assembler,
        selector,
        health,
        CostEnforcer::new(Arc::clone(&store), daily_budget, 100.0),
        BudgetParams {
            min_reasoning: 128,
            max_reasoning: 2048,
            min_response: 128,
            max_response: 2048,
        },
        None,
        64,
        provider_timeout,
    ));

    Harness {
        engine,
        store,
        classifier,
    }
}

fn stream_request(message: &str) -> StreamRequest {
    StreamRequest {
        message_id: Uuid::new_v4(),
        session_id: None,
        user_id: "u1".into(),
        message: message.into(),
        subject: None,
        embedding: None,
    }
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        let terminal = ev.is_terminal();
        events.push(ev);
        if terminal {
            break;
        }
    }
    // The channel must close after the terminal event.
    assert!(rx.recv().await.is_none(), "events after terminal");
    events
}

fn payload_name(ev: &StreamEvent) -> &'static str {
    match ev.payload {
        StreamPayload::StreamStart { .. } => "stream_start",
        StreamPayload::ContextInfo { .. } => "context_info",
        StreamPayload::EmotionUpdate { .. } => "emotion_update",
        StreamPayload::ContentChunk { .. } => "content_chunk",
        StreamPayload::StreamComplete { .. } => "stream_complete",
        StreamPayload::StreamError { .. } => "stream_error",
        StreamPayload::GenerationStopped { .. } => "generation_stopped",
    }
}

// ── S1: happy path ─────────────────────────────────────────────

#[tokio::test]
async fn happy_path_emits_ordered_events() {
    let provider: Arc<dyn ProviderClient> = Arc::new(
        MockProvider::named("mock-a")
            .queue(MockScript::text("Photosynthesis converts light into chemical energy.")),
    );
    let h = harness(vec![provider]);

    let events = collect(h.engine.process_stream(stream_request("Explain photosynthesis"))).await;

    assert_eq!(payload_name(&events[0]), "stream_start");
    assert_eq!(payload_name(&events[1]), "emotion_update");
    assert_eq!(payload_name(&events[2]), "context_info");

    let StreamPayload::StreamStart { metadata, .. } = &events[0].payload else {
        panic!("first event must be stream_start");
    };
    assert_eq!(metadata.provider, "mock-a");

    let StreamPayload::ContextInfo {
        recent_messages_used,
        relevant_messages_used,
    } = events[2].payload
    else {
        panic!("expected context_info");
    };
    assert_eq!(recent_messages_used, 0);
    assert_eq!(relevant_messages_used, 0);

    // Chunk indices are strictly increasing from 0.
    let chunk_indices: Vec<u64> = events
        .iter()
        .filter_map(|ev| match ev.payload {
            StreamPayload::ContentChunk { chunk_index, .. } => Some(chunk_index),
            _ => None,
        })
        .collect();
    assert!(!chunk_indices.is_empty());
    for (expected, actual) in chunk_indices.iter().enumerate() {
        assert_eq!(*actual, expected as u64);
    }

    let last = events.last().unwrap();
    let StreamPayload::StreamComplete {
        full_content,
        metadata,
        ..
    } = &last.payload
    else {
        panic!("expected stream_complete, got {}", payload_name(last));
    };
    assert!(full_content.contains("Photosynthesis"));
    assert!(metadata.tokens_used > 0);
    assert!(metadata.cost > 0.0);
    assert_eq!(metadata.ability_updated.subject, "general");
    assert_eq!(metadata.ability_updated.sample_count, 1);

    // Exactly one terminal event.
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1);
}

// ── S2: cancellation ───────────────────────────────────────────

#[tokio::test]
async fn cancellation_stops_promptly_with_partial() {
    let provider: Arc<dyn ProviderClient> = Arc::new(MockProvider::named("slow").queue(
        MockScript::text(&"word ".repeat(100)).with_delay(Duration::from_millis(20)),
    ));
    let h = harness(vec![provider]);

    let req = stream_request("Explain everything slowly");
    let message_id = req.message_id;
    let mut rx = h.engine.process_stream(req);

    let mut events = Vec::new();
    let mut cancelled = false;
    let mut chunks_after_cancel = 0;
    while let Some(ev) = rx.recv().await {
        let terminal = ev.is_terminal();
        if cancelled && matches!(ev.payload, StreamPayload::ContentChunk { .. }) {
            chunks_after_cancel += 1;
        }
        if !cancelled && matches!(ev.payload, StreamPayload::ContentChunk { .. }) {
            assert!(h.engine.cancel(message_id, "u1"));
            cancelled = true;
        }
        events.push(ev);
        if terminal {
            break;
        }
    }

    assert!(chunks_after_cancel <= 1, "got {chunks_after_cancel} chunks after cancel");
    let last = events.last().unwrap();
    let StreamPayload::GenerationStopped {
        reason,
        partial_content,
        ..
    } = &last.payload
    else {
        panic!("expected generation_stopped, got {}", payload_name(last));
    };
    assert_eq!(*reason, sage_core::StopReason::UserCancelled);
    assert!(!partial_content.is_empty());
    assert!(!events.iter().any(|e| matches!(e.payload, StreamPayload::StreamComplete { .. })));
    assert_eq!(h.engine.registry().active_count(), 0);
}

// ── S3: provider outage with fallback ──────────────────────────

#[tokio::test]
async fn fallback_provider_serves_after_primary_outage() {
    // Equal scores: the name tie-break makes "alpha" primary.
    let primary = MockProvider::named("alpha").queue(MockScript::unavailable("connection refused"));
    let fallback = MockProvider::named("beta").queue(MockScript::text("answer from the fallback"));
    let fallback_prompts = fallback.recorded_prompts();
    let h = harness(vec![Arc::new(primary), Arc::new(fallback)]);

    let events = collect(h.engine.process_stream(stream_request("Explain photosynthesis"))).await;

    let starts: Vec<&str> = events
        .iter()
        .filter_map(|ev| match &ev.payload {
            StreamPayload::StreamStart { metadata, .. } => Some(metadata.provider.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec!["beta"]);
    assert!(matches!(
        events.last().unwrap().payload,
        StreamPayload::StreamComplete { .. }
    ));
    assert_eq!(fallback_prompts.lock().unwrap().len(), 1);
}

// ── S4: budget exhausted ───────────────────────────────────────

#[tokio::test]
async fn exhausted_budget_is_a_single_terminal_error() {
    let provider: Arc<dyn ProviderClient> =
        Arc::new(MockProvider::named("mock-a").queue(MockScript::text("never sent")));
    let h = harness_with(
        vec![provider],
        StubClassifier::dominant("curiosity", 0.7),
        0.000001, // effectively no allowance
        Duration::from_secs(5),
    );

    let events = collect(h.engine.process_stream(stream_request("Explain photosynthesis"))).await;

    assert_eq!(events.len(), 1, "no stream_start before the rejection");
    let StreamPayload::StreamError {
        error,
        partial_content,
    } = &events[0].payload
    else {
        panic!("expected stream_error");
    };
    assert_eq!(error.code, ErrorCode::BudgetExhausted);
    assert!(!error.recoverable);
    assert!(partial_content.is_empty());
}

// ── S5: emotion subsystem failure ──────────────────────────────

#[tokio::test]
async fn degraded_emotion_never_fails_the_request() {
    let provider: Arc<dyn ProviderClient> =
        Arc::new(MockProvider::named("mock-a").queue(MockScript::text("a full answer")));
    let h = harness_with(
        vec![provider],
        StubClassifier::failing(),
        5.0,
        Duration::from_secs(5),
    );

    let events = collect(h.engine.process_stream(stream_request("help me understand this"))).await;

    let emotion = events
        .iter()
        .find_map(|ev| match &ev.payload {
            StreamPayload::EmotionUpdate { emotion } => Some(emotion.clone()),
            _ => None,
        })
        .expect("emotion_update emitted");
    assert!(emotion.degraded);
    assert_eq!(emotion.learning_readiness, sage_core::LearningReadiness::Moderate);
    assert_eq!(emotion.cognitive_load, sage_core::CognitiveLoad::Moderate);
    assert!(matches!(
        events.last().unwrap().payload,
        StreamPayload::StreamComplete { .. }
    ));

    // The degraded snapshot is persisted on the assistant message.
    let session_id = events[0].session_id;
    let rows = h
        .store
        .recent_messages(
            session_id,
            chrono::Utc::now() + chrono::Duration::seconds(5),
            10,
        )
        .unwrap();
    let assistant = rows.iter().find(|m| m.role == Role::Assistant).unwrap();
    assert!(assistant.emotion_snapshot.as_ref().unwrap().degraded);
}

// ── S6: concurrent identical queries coalesce ──────────────────

#[tokio::test]
async fn identical_concurrent_queries_run_inference_once() {
    let provider: Arc<dyn ProviderClient> = Arc::new(
        MockProvider::named("mock-a")
            .queue(MockScript::text("first answer"))
            .queue(MockScript::text("second answer")),
    );
    let h = harness(vec![provider]);

    let a = h.engine.process_stream(stream_request("What  IS  recursion?"));
    let b = h.engine.process_stream(stream_request("what is recursion?"));
    let (ea, eb) = tokio::join!(collect(a), collect(b));

    assert!(matches!(ea.last().unwrap().payload, StreamPayload::StreamComplete { .. }));
    assert!(matches!(eb.last().unwrap().payload, StreamPayload::StreamComplete { .. }));
    assert_eq!(h.classifier.call_count(), 1);
}

// ── Partial stream failure is not retried ──────────────────────

#[tokio::test]
async fn mid_stream_failure_surfaces_partial_without_retry() {
    let broken = MockProvider::named("alpha")
        .queue(MockScript::broken_after("one two three four five", 2, "connection reset"));
    let spare = MockProvider::named("beta").queue(MockScript::text("should never run"));
    let spare_prompts = spare.recorded_prompts();
    let h = harness(vec![Arc::new(broken), Arc::new(spare)]);

    let events = collect(h.engine.process_stream(stream_request("Explain photosynthesis"))).await;

    let last = events.last().unwrap();
    let StreamPayload::StreamError {
        error,
        partial_content,
    } = &last.payload
    else {
        panic!("expected stream_error, got {}", payload_name(last));
    };
    assert!(error.recoverable);
    assert!(partial_content.contains("one"));
    assert!(spare_prompts.lock().unwrap().is_empty(), "partial streams must not fail over");
}

// ── Fallback chain is bounded ──────────────────────────────────

#[tokio::test]
async fn fallback_attempts_are_bounded_by_chain_length() {
    let providers: Vec<Arc<MockProvider>> = (0..6)
        .map(|i| {
            Arc::new(
                MockProvider::named(&format!("p{i}"))
                    .queue(MockScript::unavailable("down"))
                    .queue(MockScript::unavailable("down")),
            )
        })
        .collect();
    let as_clients: Vec<Arc<dyn ProviderClient>> = providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn ProviderClient>)
        .collect();
    let h = harness(as_clients);

    let events = collect(h.engine.process_stream(stream_request("Explain photosynthesis"))).await;

    let StreamPayload::StreamError { error, .. } = &events.last().unwrap().payload else {
        panic!("expected stream_error");
    };
    assert_eq!(error.code, ErrorCode::AiProviderUnavailable);

    let attempts: usize = providers
        .iter()
        .map(|p| p.recorded_prompts().lock().unwrap().len())
        .sum();
    assert!(attempts <= 4, "primary + 3 fallbacks at most, got {attempts}");
}

// ── Timeout mid-stream ─────────────────────────────────────────

#[tokio::test]
async fn slow_stream_times_out_with_partial() {
    let provider: Arc<dyn ProviderClient> = Arc::new(MockProvider::named("glacial").queue(
        MockScript::text(&"word ".repeat(200)).with_delay(Duration::from_millis(40)),
    ));
    let h = harness_with(
        vec![provider],
        StubClassifier::dominant("curiosity", 0.7),
        5.0,
        Duration::from_millis(250),
    );

    let events = collect(h.engine.process_stream(stream_request("Explain slowly"))).await;

    let StreamPayload::StreamError {
        error,
        partial_content,
    } = &events.last().unwrap().payload
    else {
        panic!("expected stream_error");
    };
    assert_eq!(error.code, ErrorCode::GenerationTimeout);
    assert!(error.recoverable);
    assert!(!partial_content.is_empty());
}

// ── Non-streaming path ─────────────────────────────────────────

#[tokio::test]
async fn non_streaming_process_round_trip() {
    let provider: Arc<dyn ProviderClient> = Arc::new(
        MockProvider::named("mock-a")
            .queue(MockScript::text("Mitochondria produce ATP."))
            .queue(MockScript::text("They also regulate apoptosis.")),
    );
    let h = harness(vec![provider]);

    let first = h
        .engine
        .process(ChatRequest {
            user_id: "u1".into(),
            session_id: None,
            message: "What do mitochondria do?".into(),
            subject: Some("biology".into()),
            embedding: None,
        })
        .await
        .unwrap();
    assert!(first.content.contains("ATP"));
    assert!(first.cost > 0.0);
    assert_eq!(first.ability_updated.subject, "biology");

    // Reusing the session accumulates history and counters.
    let second = h
        .engine
        .process(ChatRequest {
            user_id: "u1".into(),
            session_id: Some(first.session_id),
            message: "Tell me more".into(),
            subject: Some("biology".into()),
            embedding: None,
        })
        .await
        .unwrap();
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.ability_updated.sample_count, 2);

    let session = h.store.get_session(first.session_id).unwrap().unwrap();
    assert_eq!(session.message_count, 4);
    assert!(session.cumulative_cost > 0.0);
}

#[tokio::test]
async fn foreign_session_is_rejected() {
    let provider: Arc<dyn ProviderClient> =
        Arc::new(MockProvider::named("mock-a").queue(MockScript::text("x")));
    let h = harness(vec![provider]);

    let owned = h
        .engine
        .process(ChatRequest {
            user_id: "alice".into(),
            session_id: None,
            message: "hello".into(),
            subject: None,
            embedding: None,
        })
        .await
        .unwrap();

    let err = h
        .engine
        .process(ChatRequest {
            user_id: "mallory".into(),
            session_id: Some(owned.session_id),
            message: "let me in".into(),
            subject: None,
            embedding: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

// ── Shutdown drains and stops streams ──────────────────────────

#[tokio::test]
async fn shutdown_stops_in_flight_streams() {
    let provider: Arc<dyn ProviderClient> = Arc::new(MockProvider::named("slow").queue(
        MockScript::text(&"word ".repeat(200)).with_delay(Duration::from_millis(20)),
    ));
    let h = harness(vec![provider]);

    let mut rx = h.engine.process_stream(stream_request("Explain at length"));
    // Wait for the stream to get going.
    let first = rx.recv().await.unwrap();
    assert_eq!(payload_name(&first), "stream_start");

    h.engine.shutdown(Duration::from_millis(50)).await;

    let mut saw_stopped = false;
    while let Some(ev) = rx.recv().await {
        if let StreamPayload::GenerationStopped { reason, .. } = &ev.payload {
            assert_eq!(*reason, sage_core::StopReason::Shutdown);
            saw_stopped = true;
        }
    }
    assert!(saw_stopped);

    // New work is refused once draining.
    let events = collect(h.engine.process_stream(stream_request("anything"))).await;
    assert!(matches!(events[0].payload, StreamPayload::StreamError { .. }));
}
