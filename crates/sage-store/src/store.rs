use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use sage_core::{
    AbilityEstimate, BenchmarkScores, EmotionResult, Message, ProviderHealth, Result, Role,
    SageError, Session,
};

/// Rolling cost window kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostPeriod {
    Daily,
    Monthly,
}

impl CostPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }

    /// Key identifying the current window, e.g. `2026-08-01` or `2026-08`.
    pub fn window_key(self, now: DateTime<Utc>) -> String {
        match self {
            Self::Daily => now.format("%Y-%m-%d").to_string(),
            Self::Monthly => now.format("%Y-%m").to_string(),
        }
    }
}

/// SQLite-backed document store exposing the pipeline's collections.
pub struct DocumentStore {
    db: Arc<Mutex<Connection>>,
}

impl DocumentStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening document store");

        let conn = Connection::open(path).map_err(db_err)?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                cumulative_cost REAL NOT NULL DEFAULT 0.0,
                cumulative_tokens INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                emotion_snapshot TEXT,
                embedding BLOB,
                provider TEXT,
                latency_ms INTEGER,
                tokens INTEGER,
                cost REAL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session_ts
                ON messages(session_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_user_ts
                ON messages(user_id, timestamp);

            CREATE TABLE IF NOT EXISTS ability_estimates (
                user_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                theta REAL NOT NULL,
                confidence REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (user_id, subject)
            );

            CREATE TABLE IF NOT EXISTS ability_updates (
                message_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                PRIMARY KEY (message_id, subject)
            );

            CREATE TABLE IF NOT EXISTS provider_health (
                provider TEXT PRIMARY KEY,
                health_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS benchmarks (
                provider TEXT PRIMARY KEY,
                scores_json TEXT NOT NULL,
                refreshed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cost_ledger (
                user_id TEXT NOT NULL,
                period TEXT NOT NULL,
                window_start TEXT NOT NULL,
                spent REAL NOT NULL DEFAULT 0.0,
                PRIMARY KEY (user_id, period)
            );
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    // ── Sessions ───────────────────────────────────────────────

    pub fn create_session(&self, session: &Session) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO sessions (id, user_id, created_at, last_activity, message_count, cumulative_cost, cumulative_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id.to_string(),
                session.user_id,
                session.created_at.to_rfc3339(),
                session.last_activity.to_rfc3339(),
                session.message_count as i64,
                session.cumulative_cost,
                session.cumulative_tokens as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let db = self.db.lock();
        db.query_row(
            "SELECT id, user_id, created_at, last_activity, message_count, cumulative_cost, cumulative_tokens
             FROM sessions WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok(Session {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    user_id: row.get(1)?,
                    created_at: parse_ts(row.get::<_, String>(2)?),
                    last_activity: parse_ts(row.get::<_, String>(3)?),
                    message_count: row.get::<_, i64>(4)? as u64,
                    cumulative_cost: row.get(5)?,
                    cumulative_tokens: row.get::<_, i64>(6)? as u64,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    /// Bump session counters after persisting a message.
    pub fn touch_session(&self, id: Uuid, tokens: u64, cost: f64) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE sessions SET
                last_activity = ?2,
                message_count = message_count + 1,
                cumulative_cost = cumulative_cost + ?3,
                cumulative_tokens = cumulative_tokens + ?4
             WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339(), cost, tokens as i64],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ── Messages ───────────────────────────────────────────────

    pub fn insert_message(&self, msg: &Message) -> Result<()> {
        let emotion_json = msg
            .emotion_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let embedding_blob: Option<Vec<u8>> = msg
            .embedding
            .as_ref()
            .map(|emb| emb.iter().flat_map(|f| f.to_le_bytes()).collect());

        let db = self.db.lock();
        db.execute(
            "INSERT INTO messages (id, session_id, user_id, role, content, timestamp,
                                   emotion_snapshot, embedding, provider, latency_ms, tokens, cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                msg.id.to_string(),
                msg.session_id.to_string(),
                msg.user_id,
                role_str(msg.role),
                msg.content,
                msg.timestamp.to_rfc3339(),
                emotion_json,
                embedding_blob,
                msg.provider,
                msg.latency_ms.map(|v| v as i64),
                msg.token_count.map(|v| v as i64),
                msg.cost,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Last `limit` messages in a session strictly before `before`,
    /// chronological ascending.
    pub fn recent_messages(
        &self,
        session_id: Uuid,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, session_id, user_id, role, content, timestamp,
                        emotion_snapshot, embedding, provider, latency_ms, tokens, cost
                 FROM messages
                 WHERE session_id = ?1 AND timestamp < ?2
                 ORDER BY timestamp DESC
                 LIMIT ?3",
            )
            .map_err(db_err)?;
        let mut rows: Vec<Message> = stmt
            .query_map(
                params![session_id.to_string(), before.to_rfc3339(), limit as i64],
                row_to_message,
            )
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;
        rows.reverse();
        Ok(rows)
    }

    /// Messages carrying embeddings, scoped to a session or a whole user.
    /// Messages without an embedding are not candidates for relevance.
    pub fn embedded_messages(
        &self,
        session_id: Uuid,
        user_id: &str,
        user_scope: bool,
        before: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock();
        let sql_session = "SELECT id, session_id, user_id, role, content, timestamp,
                    emotion_snapshot, embedding, provider, latency_ms, tokens, cost
             FROM messages
             WHERE session_id = ?1 AND timestamp < ?2 AND embedding IS NOT NULL
             ORDER BY timestamp ASC";
        let sql_user = "SELECT id, session_id, user_id, role, content, timestamp,
                    emotion_snapshot, embedding, provider, latency_ms, tokens, cost
             FROM messages
             WHERE user_id = ?1 AND timestamp < ?2 AND embedding IS NOT NULL
             ORDER BY timestamp ASC";

        let mut stmt = db
            .prepare(if user_scope { sql_user } else { sql_session })
            .map_err(db_err)?;
        let key = if user_scope {
            user_id.to_string()
        } else {
            session_id.to_string()
        };
        let rows = stmt
            .query_map(params![key, before.to_rfc3339()], row_to_message)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    // ── Ability estimates ──────────────────────────────────────

    pub fn get_ability(&self, user_id: &str, subject: &str) -> Result<Option<AbilityEstimate>> {
        let db = self.db.lock();
        db.query_row(
            "SELECT theta, confidence, sample_count, last_updated
             FROM ability_estimates WHERE user_id = ?1 AND subject = ?2",
            params![user_id, subject],
            |row| {
                Ok(AbilityEstimate {
                    user_id: user_id.to_string(),
                    subject: subject.to_string(),
                    theta: row.get(0)?,
                    confidence: row.get(1)?,
                    sample_count: row.get::<_, i64>(2)? as u64,
                    last_updated: parse_ts(row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    /// Last-writer-wins upsert of an ability estimate.
    pub fn put_ability(&self, est: &AbilityEstimate) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO ability_estimates (user_id, subject, theta, confidence, sample_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, subject) DO UPDATE SET
                theta = excluded.theta,
                confidence = excluded.confidence,
                sample_count = excluded.sample_count,
                last_updated = excluded.last_updated",
            params![
                est.user_id,
                est.subject,
                est.theta,
                est.confidence,
                est.sample_count as i64,
                est.last_updated.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Record that an ability update for (message, subject) was applied.
    /// Returns false when the pair was already recorded — the caller must
    /// then treat the update as a no-op.
    pub fn claim_ability_update(&self, message_id: Uuid, subject: &str) -> Result<bool> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "INSERT OR IGNORE INTO ability_updates (message_id, subject, applied_at)
                 VALUES (?1, ?2, ?3)",
                params![message_id.to_string(), subject, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(rows > 0)
    }

    // ── Provider health ────────────────────────────────────────

    pub fn put_provider_health(&self, provider: &str, health: &ProviderHealth) -> Result<()> {
        let json = serde_json::to_string(health)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO provider_health (provider, health_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(provider) DO UPDATE SET
                health_json = excluded.health_json,
                updated_at = excluded.updated_at",
            params![provider, json, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn load_provider_health(&self) -> Result<Vec<(String, ProviderHealth)>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT provider, health_json FROM provider_health")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|(name, json)| {
                serde_json::from_str(&json).ok().map(|h| (name, h))
            })
            .collect())
    }

    // ── Benchmarks ─────────────────────────────────────────────

    pub fn put_benchmark(&self, provider: &str, scores: &BenchmarkScores) -> Result<()> {
        let json = serde_json::to_string(scores)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO benchmarks (provider, scores_json, refreshed_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(provider) DO UPDATE SET
                scores_json = excluded.scores_json,
                refreshed_at = excluded.refreshed_at",
            params![provider, json, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn load_benchmarks(&self) -> Result<Vec<(String, BenchmarkScores)>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT provider, scores_json FROM benchmarks")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|(name, json)| {
                serde_json::from_str(&json).ok().map(|s| (name, s))
            })
            .collect())
    }

    // ── Cost ledger ────────────────────────────────────────────

    /// Atomically add spend to a user's rolling window, resetting the row
    /// when the window key has rolled over.
    pub fn add_spend(&self, user_id: &str, period: CostPeriod, amount: f64) -> Result<f64> {
        let window = period.window_key(Utc::now());
        let db = self.db.lock();
        db.execute(
            "INSERT INTO cost_ledger (user_id, period, window_start, spent)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, period) DO UPDATE SET
                spent = CASE WHEN cost_ledger.window_start = excluded.window_start
                             THEN cost_ledger.spent + excluded.spent
                             ELSE excluded.spent END,
                window_start = excluded.window_start",
            params![user_id, period.as_str(), window, amount],
        )
        .map_err(db_err)?;
        db.query_row(
            "SELECT spent FROM cost_ledger WHERE user_id = ?1 AND period = ?2",
            params![user_id, period.as_str()],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    /// Spend in the user's current window; 0 when the stored window is
    /// stale or absent.
    pub fn get_spend(&self, user_id: &str, period: CostPeriod) -> Result<f64> {
        let window = period.window_key(Utc::now());
        let db = self.db.lock();
        let row: Option<(String, f64)> = db
            .query_row(
                "SELECT window_start, spent FROM cost_ledger
                 WHERE user_id = ?1 AND period = ?2",
                params![user_id, period.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        Ok(match row {
            Some((w, spent)) if w == window => spent,
            _ => 0.0,
        })
    }
}

// ── Row mapping helpers ────────────────────────────────────────

fn db_err(e: rusqlite::Error) -> SageError {
    SageError::Database(e.to_string())
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_default()
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role = match row.get::<_, String>(3)?.as_str() {
        "assistant" => Role::Assistant,
        _ => Role::User,
    };
    let emotion_snapshot: Option<EmotionResult> = row
        .get::<_, Option<String>>(6)?
        .and_then(|json| serde_json::from_str(&json).ok());
    let embedding: Option<Vec<f32>> = row.get::<_, Option<Vec<u8>>>(7)?.map(|blob| {
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    });
    Ok(Message {
        id: parse_uuid(row.get::<_, String>(0)?),
        session_id: parse_uuid(row.get::<_, String>(1)?),
        user_id: row.get(2)?,
        role,
        content: row.get(4)?,
        timestamp: parse_ts(row.get::<_, String>(5)?),
        emotion_snapshot,
        embedding,
        provider: row.get(8)?,
        latency_ms: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        token_count: row.get::<_, Option<i64>>(10)?.map(|v| v as u32),
        cost: row.get(11)?,
    })
}
