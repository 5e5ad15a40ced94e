//! Session registry: every known connection plus the bookkeeping for
//! sessions waiting to be resumed.
//!
//! # Ownership
//!
//! The registry holds the only long-lived strong reference to each
//! connection.  Entries awaiting a resume keep a `Weak` back-reference plus a
//! copy of the replay backlog taken at disconnect time.
//!
//! # Locking
//!
//! The registry lives behind one mutex in the engine.  It never locks a
//! connection itself: callers that hold a connection lock may take the
//! registry lock, never the other way round.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::domain::close::CloseCode;
use crate::domain::config::EngineConfig;
use crate::domain::connection::{Connection, SharedConnection};
use crate::protocol::Frame;

/// Why a resume was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResumeError {
    #[error("no session {0} is awaiting a resume")]
    UnknownSession(String),
    #[error("session {0} is past its reconnect window")]
    Expired(String),
    #[error("session {id} exceeded {limit} reconnect attempts")]
    RateLimited { id: String, limit: u32 },
    #[error("session {0} no longer exists")]
    Detached(String),
}

impl ResumeError {
    /// Close code sent on the socket that asked for the resume.
    pub fn close_code(&self) -> CloseCode {
        match self {
            ResumeError::RateLimited { .. } => CloseCode::PolicyViolation,
            _ => CloseCode::ProtocolViolation,
        }
    }
}

/// Reconnect attempt counter of one session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttempts {
    pub count: u32,
    pub last_reconnect_at: Instant,
}

struct PendingResume<D: Send + Sync + 'static> {
    connection: Weak<Mutex<Connection<D>>>,
    backlog: Vec<Frame>,
    disconnected_at: Instant,
}

pub struct SessionRegistry<D: Send + Sync + 'static> {
    connections: HashMap<String, SharedConnection<D>>,
    pending: HashMap<String, PendingResume<D>>,
    attempts: HashMap<String, ReconnectAttempts>,
    reconnect_window: Duration,
    max_reconnect_attempts: u32,
}

impl<D: Send + Sync + 'static> SessionRegistry<D> {
    pub fn new(reconnect_window: Duration, max_reconnect_attempts: u32) -> Self {
        Self {
            connections: HashMap::new(),
            pending: HashMap::new(),
            attempts: HashMap::new(),
            reconnect_window,
            max_reconnect_attempts,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.reconnect_window(), config.max_reconnect_attempts)
    }

    pub fn register(&mut self, id: String, connection: SharedConnection<D>) {
        self.connections.insert(id, connection);
    }

    pub fn get(&self, id: &str) -> Option<SharedConnection<D>> {
        self.connections.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Forgets a session entirely, including any pending resume.
    pub fn remove(&mut self, id: &str) -> Option<SharedConnection<D>> {
        self.pending.remove(id);
        self.connections.remove(id)
    }

    /// Records that `id` lost its transport at `now` with `backlog`
    /// outstanding.
    pub fn mark_disconnected(
        &mut self,
        id: &str,
        connection: &SharedConnection<D>,
        backlog: Vec<Frame>,
        now: Instant,
    ) {
        debug!("session {id} awaiting resume with {} frame(s)", backlog.len());
        self.pending.insert(
            id.to_string(),
            PendingResume {
                connection: Arc::downgrade(connection),
                backlog,
                disconnected_at: now,
            },
        );
    }

    /// Claims the pending entry of `id` for a resume.
    ///
    /// On success the entry is removed and the connection is returned with
    /// the backlog to replay.
    ///
    /// # Errors
    ///
    /// - [`ResumeError::UnknownSession`] if nothing is pending under `id`.
    /// - [`ResumeError::Expired`] if the reconnect window has elapsed.  The
    ///   entry is kept so that expiry reports the close.
    /// - [`ResumeError::RateLimited`] if `id` resumed too often within one
    ///   window.
    /// - [`ResumeError::Detached`] if the connection has already been dropped.
    pub fn resume(
        &mut self,
        id: &str,
        now: Instant,
    ) -> Result<(SharedConnection<D>, Vec<Frame>), ResumeError> {
        let disconnected_at = self
            .pending
            .get(id)
            .map(|entry| entry.disconnected_at)
            .ok_or_else(|| ResumeError::UnknownSession(id.to_string()))?;
        if self.is_expired(disconnected_at, now) {
            return Err(ResumeError::Expired(id.to_string()));
        }

        let window = self.reconnect_window;
        let attempts = self
            .attempts
            .entry(id.to_string())
            .and_modify(|a| {
                if now.saturating_duration_since(a.last_reconnect_at) > window {
                    a.count = 1;
                } else {
                    a.count += 1;
                }
                a.last_reconnect_at = now;
            })
            .or_insert(ReconnectAttempts {
                count: 1,
                last_reconnect_at: now,
            });
        if attempts.count > self.max_reconnect_attempts {
            return Err(ResumeError::RateLimited {
                id: id.to_string(),
                limit: self.max_reconnect_attempts,
            });
        }

        let entry = self
            .pending
            .remove(id)
            .ok_or_else(|| ResumeError::UnknownSession(id.to_string()))?;
        let connection = entry
            .connection
            .upgrade()
            .ok_or_else(|| ResumeError::Detached(id.to_string()))?;
        Ok((connection, entry.backlog))
    }

    /// Evicts `id` if it has waited for a resume for the whole window.
    pub fn expire(&mut self, id: &str, now: Instant) -> Option<SharedConnection<D>> {
        let disconnected_at = self.pending.get(id)?.disconnected_at;
        if !self.is_expired(disconnected_at, now) {
            return None;
        }
        self.evict(id)
    }

    /// Evicts every session that has waited past the reconnect window and
    /// prunes attempt counters of sessions that no longer exist.
    pub fn sweep(&mut self, now: Instant) -> Vec<(String, SharedConnection<D>)> {
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, entry)| self.is_expired(entry.disconnected_at, now))
            .map(|(id, _)| id.clone())
            .collect();
        let evicted: Vec<(String, SharedConnection<D>)> = stale
            .into_iter()
            .filter_map(|id| self.evict(&id).map(|connection| (id, connection)))
            .collect();

        let window = self.reconnect_window;
        let connections = &self.connections;
        self.attempts.retain(|id, attempts| {
            connections.contains_key(id)
                || now.saturating_duration_since(attempts.last_reconnect_at) <= window
        });
        evicted
    }

    fn evict(&mut self, id: &str) -> Option<SharedConnection<D>> {
        let entry = self.pending.remove(id)?;
        self.connections
            .remove(id)
            .or_else(|| entry.connection.upgrade())
    }

    fn is_expired(&self, disconnected_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(disconnected_at) >= self.reconnect_window
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn reconnect_attempts(&self, id: &str) -> Option<u32> {
        self.attempts.get(id).map(|a| a.count)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::handler::MockConnectionHandler;
    use crate::domain::transport::mock::MockTransport;

    const WINDOW: Duration = Duration::from_secs(40);

    fn shared(id: &str, now: Instant) -> SharedConnection<()> {
        Arc::new(Mutex::new(Connection::new(
            id.to_string(),
            MockTransport::new().boxed(),
            Arc::new(MockConnectionHandler::<()>::new()),
            Arc::new(EngineConfig::default()),
            (),
            now,
        )))
    }

    fn backlog() -> Vec<Frame> {
        (0..3)
            .map(|id| Frame::Data {
                id,
                payload: vec![id as u8],
            })
            .collect()
    }

    fn disconnected(t0: Instant) -> SessionRegistry<()> {
        let mut registry = SessionRegistry::new(WINDOW, 3);
        let conn = shared("abc123", t0);
        registry.register("abc123".to_string(), Arc::clone(&conn));
        registry.mark_disconnected("abc123", &conn, backlog(), t0);
        registry
    }

    #[test]
    fn test_resume_inside_window_returns_backlog_and_clears_entry() {
        // Arrange
        let t0 = Instant::now();
        let mut registry = disconnected(t0);

        // Act
        let (_, replay) = registry
            .resume("abc123", t0 + Duration::from_secs(5))
            .unwrap();

        // Assert
        assert_eq!(replay, backlog());
        assert!(!registry.is_pending("abc123"));
        assert_eq!(registry.reconnect_attempts("abc123"), Some(1));
        assert!(registry.contains("abc123"));
    }

    #[test]
    fn test_resume_unknown_id_is_rejected() {
        let t0 = Instant::now();
        let mut registry = disconnected(t0);
        let result = registry.resume("nobody", t0);
        assert!(matches!(result, Err(ResumeError::UnknownSession(_))));
        assert_eq!(registry.reconnect_attempts("nobody"), None);
    }

    #[test]
    fn test_resume_after_window_is_rejected_and_entry_kept() {
        let t0 = Instant::now();
        let mut registry = disconnected(t0);

        let result = registry.resume("abc123", t0 + WINDOW);

        assert!(matches!(result, Err(ResumeError::Expired(_))));
        assert!(registry.is_pending("abc123"));
    }

    #[test]
    fn test_attempts_accumulate_within_window_and_reset_after() {
        // Arrange
        let t0 = Instant::now();
        let mut registry = disconnected(t0);
        let conn = registry.get("abc123").unwrap();

        // Act: resume, drop again, resume shortly after.
        registry.resume("abc123", t0 + Duration::from_secs(1)).unwrap();
        registry.mark_disconnected("abc123", &conn, backlog(), t0 + Duration::from_secs(2));
        registry.resume("abc123", t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(registry.reconnect_attempts("abc123"), Some(2));

        // A resume more than a window after the last one starts over.
        let later = t0 + Duration::from_secs(50);
        registry.mark_disconnected("abc123", &conn, backlog(), later);
        registry.resume("abc123", later + Duration::from_secs(1)).unwrap();

        // Assert
        assert_eq!(registry.reconnect_attempts("abc123"), Some(1));
    }

    #[test]
    fn test_too_many_attempts_are_refused_with_policy_violation() {
        let t0 = Instant::now();
        let mut registry = disconnected(t0);
        let conn = registry.get("abc123").unwrap();
        for n in 1..=3u64 {
            registry.resume("abc123", t0 + Duration::from_secs(n)).unwrap();
            registry.mark_disconnected("abc123", &conn, backlog(), t0 + Duration::from_secs(n));
        }

        let Err(err) = registry.resume("abc123", t0 + Duration::from_secs(5)) else {
            panic!("fourth resume inside the window must be refused");
        };

        assert_eq!(
            err,
            ResumeError::RateLimited {
                id: "abc123".to_string(),
                limit: 3
            }
        );
        assert_eq!(err.close_code(), CloseCode::PolicyViolation);
        assert!(registry.is_pending("abc123"));
    }

    #[test]
    fn test_expire_only_after_window() {
        let t0 = Instant::now();
        let mut registry = disconnected(t0);

        assert!(registry.expire("abc123", t0 + Duration::from_secs(39)).is_none());
        assert!(registry.expire("abc123", t0 + WINDOW).is_some());
        assert!(registry.expire("abc123", t0 + WINDOW).is_none());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_sweep_evicts_stale_entries_once() {
        // Arrange
        let t0 = Instant::now();
        let mut registry = disconnected(t0);
        let fresh = shared("fresh", t0);
        registry.register("fresh".to_string(), Arc::clone(&fresh));
        registry.mark_disconnected("fresh", &fresh, backlog(), t0 + Duration::from_secs(30));

        // Act
        let evicted = registry.sweep(t0 + Duration::from_secs(60));

        // Assert
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, "abc123");
        assert!(registry.is_pending("fresh"));
        assert!(registry.sweep(t0 + Duration::from_secs(61)).is_empty());
    }

    #[test]
    fn test_sweep_prunes_attempts_of_gone_sessions() {
        let t0 = Instant::now();
        let mut registry = disconnected(t0);
        registry.resume("abc123", t0 + Duration::from_secs(1)).unwrap();
        registry.remove("abc123");

        registry.sweep(t0 + Duration::from_secs(100));

        assert_eq!(registry.reconnect_attempts("abc123"), None);
    }

    #[test]
    fn test_attempts_survive_backlog_eviction_within_window() {
        let t0 = Instant::now();
        let mut registry = disconnected(t0);
        let conn = registry.get("abc123").unwrap();
        let resumed_at = t0 + Duration::from_secs(1);
        registry.resume("abc123", resumed_at).unwrap();
        registry.mark_disconnected("abc123", &conn, backlog(), resumed_at);

        registry.sweep(resumed_at + WINDOW);

        assert!(!registry.is_pending("abc123"));
        assert_eq!(registry.reconnect_attempts("abc123"), Some(1));
    }

    #[test]
    fn test_resume_of_dropped_connection_is_detached() {
        let t0 = Instant::now();
        let mut registry = SessionRegistry::new(WINDOW, 3);
        let conn = shared("gone", t0);
        registry.mark_disconnected("gone", &conn, backlog(), t0);
        drop(conn);

        let result = registry.resume("gone", t0);

        assert!(matches!(result, Err(ResumeError::Detached(_))));
    }
}
