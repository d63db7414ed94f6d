//! # sage-context
//!
//! Assembles the conversation context for one request: the most recent
//! messages in the session plus the most semantically relevant earlier
//! messages, deduplicated and deterministically ordered.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use sage_core::{Message, Result};
use sage_store::DocumentStore;

/// Assembly limits, lifted from configuration.
#[derive(Debug, Clone)]
pub struct ContextParams {
    pub recent_limit: usize,
    pub recent_token_budget: usize,
    pub relevant_limit: usize,
    pub relevance_threshold: f32,
    /// Widen relevance retrieval from the session to the whole user.
    pub user_scope: bool,
}

/// The assembled context set.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// Chronological ascending, strictly before the current message.
    pub recent: Vec<Message>,
    /// Descending by similarity, then ascending by age on ties.
    pub relevant: Vec<Message>,
}

#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<DocumentStore>,
    params: ContextParams,
}

impl ContextAssembler {
    pub fn new(store: Arc<DocumentStore>, params: ContextParams) -> Self {
        Self { store, params }
    }

    /// Assemble context for a message arriving at `now` in `session_id`.
    ///
    /// Deterministic: the same store snapshot and inputs produce the same
    /// set. Messages without stored embeddings are skipped for relevance
    /// rather than embedded on the fly.
    pub fn assemble(
        &self,
        session_id: Uuid,
        user_id: &str,
        query_embedding: Option<&[f32]>,
        now: DateTime<Utc>,
    ) -> Result<AssembledContext> {
        let mut recent =
            self.store
                .recent_messages(session_id, now, self.params.recent_limit)?;

        // Trim the oldest recent messages down to the token budget.
        let mut total_tokens: usize = recent.iter().map(Message::estimate_tokens).sum();
        while total_tokens > self.params.recent_token_budget && recent.len() > 1 {
            let dropped = recent.remove(0);
            total_tokens -= dropped.estimate_tokens();
        }

        let relevant = match query_embedding {
            Some(embedding) => self.relevant_for(session_id, user_id, embedding, now, &recent)?,
            None => Vec::new(),
        };

        debug!(
            recent = recent.len(),
            relevant = relevant.len(),
            "assembled context"
        );
        Ok(AssembledContext { recent, relevant })
    }

    fn relevant_for(
        &self,
        session_id: Uuid,
        user_id: &str,
        query_embedding: &[f32],
        now: DateTime<Utc>,
        recent: &[Message],
    ) -> Result<Vec<Message>> {
        let seen: HashSet<Uuid> = recent.iter().map(|m| m.id).collect();
        let candidates =
            self.store
                .embedded_messages(session_id, user_id, self.params.user_scope, now)?;

        let mut scored: Vec<(Message, f32)> = candidates
            .into_iter()
            .filter(|m| !seen.contains(&m.id))
            .filter_map(|m| {
                let score = m
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(query_embedding, e))?;
                (score >= self.params.relevance_threshold).then_some((m, score))
            })
            .collect();

        // Similarity descending; older first on ties.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.timestamp.cmp(&b.0.timestamp))
        });
        scored.truncate(self.params.relevant_limit);
        Ok(scored.into_iter().map(|(m, _)| m).collect())
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_core::Session;

    fn setup() -> (Arc<DocumentStore>, Session) {
        let store = Arc::new(DocumentStore::open_in_memory().unwrap());
        let session = Session::new("u1");
        store.create_session(&session).unwrap();
        (store, session)
    }

    fn params() -> ContextParams {
        ContextParams {
            recent_limit: 3,
            recent_token_budget: 10_000,
            relevant_limit: 2,
            relevance_threshold: 0.3,
            user_scope: false,
        }
    }

    fn put(
        store: &DocumentStore,
        session: &Session,
        content: &str,
        offset_ms: i64,
        embedding: Option<Vec<f32>>,
    ) -> Message {
        let mut m = Message::user(session.id, &session.user_id, content);
        m.timestamp = Utc::now() + chrono::Duration::milliseconds(offset_ms);
        m.embedding = embedding;
        store.insert_message(&m).unwrap();
        m
    }

    #[test]
    fn empty_session_yields_empty_context() {
        let (store, session) = setup();
        let assembler = ContextAssembler::new(store, params());
        let ctx = assembler
            .assemble(session.id, "u1", None, Utc::now())
            .unwrap();
        assert!(ctx.recent.is_empty());
        assert!(ctx.relevant.is_empty());
    }

    #[test]
    fn recent_is_bounded_and_chronological() {
        let (store, session) = setup();
        for i in 0..6 {
            put(&store, &session, &format!("m{i}"), i, None);
        }
        let assembler = ContextAssembler::new(store, params());
        let ctx = assembler
            .assemble(session.id, "u1", None, Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        let contents: Vec<&str> = ctx.recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn relevant_ranks_by_similarity_and_dedups_recent() {
        let (store, session) = setup();
        // Old enough to fall outside the 3-message recent window.
        put(&store, &session, "about birds", 0, Some(vec![1.0, 0.0]));
        put(&store, &session, "about fish", 1, Some(vec![0.6, 0.8]));
        put(&store, &session, "r1", 10, None);
        let in_recent = put(&store, &session, "r2", 11, Some(vec![1.0, 0.0]));
        put(&store, &session, "r3", 12, None);

        let assembler = ContextAssembler::new(store, params());
        let ctx = assembler
            .assemble(
                session.id,
                "u1",
                Some(&[1.0, 0.0]),
                Utc::now() + chrono::Duration::seconds(1),
            )
            .unwrap();

        assert!(ctx.recent.iter().any(|m| m.id == in_recent.id));
        let contents: Vec<&str> = ctx.relevant.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["about birds", "about fish"]);
        assert!(ctx.relevant.iter().all(|m| m.id != in_recent.id));
    }

    #[test]
    fn messages_without_embeddings_are_skipped_for_relevance() {
        let (store, session) = setup();
        put(&store, &session, "no embedding here", 0, None);
        for i in 0..3 {
            put(&store, &session, &format!("r{i}"), 10 + i, None);
        }
        let assembler = ContextAssembler::new(store, params());
        let ctx = assembler
            .assemble(
                session.id,
                "u1",
                Some(&[1.0, 0.0]),
                Utc::now() + chrono::Duration::seconds(1),
            )
            .unwrap();
        assert!(ctx.relevant.is_empty());
    }

    #[test]
    fn token_budget_drops_oldest_first() {
        let (store, session) = setup();
        put(&store, &session, &"x".repeat(400), 0, None);
        put(&store, &session, "short one", 1, None);
        put(&store, &session, "short two", 2, None);

        let mut p = params();
        p.recent_token_budget = 30;
        let assembler = ContextAssembler::new(store, p);
        let ctx = assembler
            .assemble(session.id, "u1", None, Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(ctx.recent.len(), 2);
        assert_eq!(ctx.recent[0].content, "short one");
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
