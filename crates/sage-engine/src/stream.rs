//! Stream registry and cancellation (the in-process half of the
//! streaming protocol).
//!
//! One registration per in-flight `message_id`; entries are removed on
//! every terminal path via a scope-bound guard. Only the originating user
//! may cancel their stream; cancelling an unknown id is a no-op.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

struct Registration {
    user_id: String,
    #[allow(dead_code)]
    session_id: Uuid,
    token: CancellationToken,
    #[allow(dead_code)]
    started_at: Instant,
}

#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<Uuid, Registration>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream. Returns the guard releasing the entry on drop
    /// and the cancellation token the pipeline polls at suspension points.
    /// Fails when the `message_id` is already streaming.
    pub fn register(
        &self,
        message_id: Uuid,
        session_id: Uuid,
        user_id: &str,
    ) -> Option<(StreamGuard, CancellationToken)> {
        let token = CancellationToken::new();
        let entry = Registration {
            user_id: user_id.to_string(),
            session_id,
            token: token.clone(),
            started_at: Instant::now(),
        };
        match self.streams.entry(message_id) {
            dashmap::Entry::Occupied(_) => None,
            dashmap::Entry::Vacant(slot) => {
                slot.insert(entry);
                Some((
                    StreamGuard {
                        registry: self.clone(),
                        message_id,
                    },
                    token,
                ))
            }
        }
    }

    /// Request cancellation of a stream. Only the owning user may cancel;
    /// unknown ids are no-ops. Returns whether a cancellation was signalled.
    pub fn cancel(&self, message_id: Uuid, user_id: &str) -> bool {
        if let Some(entry) = self.streams.get(&message_id) {
            if entry.user_id != user_id {
                debug!(%message_id, "cancel refused: not the stream owner");
                return false;
            }
            entry.token.cancel();
            return true;
        }
        false
    }

    /// Cancel every in-flight stream (shutdown path).
    pub fn cancel_all(&self) {
        for entry in self.streams.iter() {
            entry.token.cancel();
        }
    }

    pub fn active_count(&self) -> usize {
        self.streams.len()
    }

    fn deregister(&self, message_id: Uuid) {
        self.streams.remove(&message_id);
    }
}

/// Removes the registration when dropped, guaranteeing release on every
/// exit path — completion, error, cancellation or panic.
pub struct StreamGuard {
    registry: StreamRegistry,
    message_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_deregister() {
        let registry = StreamRegistry::new();
        let id = Uuid::new_v4();
        let (guard, token) = registry.register(id, Uuid::new_v4(), "u1").unwrap();
        assert_eq!(registry.active_count(), 1);
        assert!(!token.is_cancelled());

        assert!(registry.cancel(id, "u1"));
        assert!(token.is_cancelled());

        drop(guard);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let registry = StreamRegistry::new();
        let id = Uuid::new_v4();
        let _first = registry.register(id, Uuid::new_v4(), "u1").unwrap();
        assert!(registry.register(id, Uuid::new_v4(), "u1").is_none());
    }

    #[test]
    fn only_owner_may_cancel() {
        let registry = StreamRegistry::new();
        let id = Uuid::new_v4();
        let (_guard, token) = registry.register(id, Uuid::new_v4(), "alice").unwrap();
        assert!(!registry.cancel(id, "mallory"));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn unknown_id_cancel_is_noop() {
        let registry = StreamRegistry::new();
        assert!(!registry.cancel(Uuid::new_v4(), "u1"));
    }

    #[test]
    fn guard_releases_on_panic_path() {
        let registry = StreamRegistry::new();
        let id = Uuid::new_v4();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let (_guard, _token) = registry.register(id, Uuid::new_v4(), "u1").unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(registry.active_count(), 0);
    }
}
