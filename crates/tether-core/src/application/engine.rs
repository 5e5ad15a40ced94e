//! The protocol engine: the one entry point transport adapters talk to.
//!
//! An adapter owns one [`SessionHandle`] per socket.  It reports everything
//! that happens on that socket (messages, drain, close, timer ticks) and gets
//! back a [`Disposition`] telling it whether the socket still backs a live
//! session.
//!
//! # Locking
//!
//! Each connection has its own mutex; the registry has one more.  The engine
//! only ever takes them in the order connection → registry, and never holds
//! two connection locks at once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{info, warn};

use crate::domain::close::{CloseCode, CloseInitiator, CloseReason};
use crate::domain::config::{ConfigError, EngineConfig};
use crate::domain::connection::{Connection, LossOutcome, SharedConnection, TickOutcome};
use crate::domain::handler::ConnectionHandler;
use crate::domain::identity::{IdGenerator, UuidIdGenerator};
use crate::domain::registry::{ResumeError, SessionRegistry};
use crate::domain::router::{self, RouteOutcome};
use crate::domain::transport::{Inbound, Transport};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a socket adapter should do after an engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The socket still backs a live session; keep going.
    Attached,
    /// The session ended.  The engine has already asked the transport to close.
    Finished,
    /// The socket is gone but the session waits for a resume until
    /// `deadline`.  Call [`Engine::expire`] then.
    Suspended { id: String, deadline: Instant },
    /// The socket no longer backs its session.  Stop reporting events for it.
    Detached,
}

/// A socket's view of the session it carries.
///
/// A resume rebinds the handle to the resumed session.  `generation` tells
/// events of a replaced socket apart from those of the current one.
pub struct SessionHandle<D: Send + Sync + 'static> {
    connection: SharedConnection<D>,
    generation: u64,
}

impl<D: Send + Sync + 'static> SessionHandle<D> {
    pub fn connection(&self) -> &SharedConnection<D> {
        &self.connection
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> String {
        lock(&self.connection).id().to_string()
    }

    fn is_current(&self, conn: &Connection<D>) -> bool {
        conn.generation() == self.generation && conn.is_attached()
    }
}

pub struct Engine<D: Send + Sync + 'static> {
    config: Arc<EngineConfig>,
    registry: Mutex<SessionRegistry<D>>,
    ids: Box<dyn IdGenerator>,
    handler: Arc<dyn ConnectionHandler<D>>,
}

impl<D: Default + Send + Sync + 'static> Engine<D> {
    /// Creates an engine issuing random UUID session ids.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn new(
        config: EngineConfig,
        handler: Arc<dyn ConnectionHandler<D>>,
    ) -> Result<Self, ConfigError> {
        Self::with_id_generator(config, handler, Box::new(UuidIdGenerator))
    }

    pub fn with_id_generator(
        config: EngineConfig,
        handler: Arc<dyn ConnectionHandler<D>>,
        ids: Box<dyn IdGenerator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: Mutex::new(SessionRegistry::from_config(&config)),
            config: Arc::new(config),
            ids,
            handler,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, SessionRegistry<D>> {
        lock(&self.registry)
    }

    // ── Socket events ─────────────────────────────────────────────────────────

    /// Starts a session on a freshly accepted transport and offers it an id.
    pub fn accept(&self, transport: Box<dyn Transport>, now: Instant) -> SessionHandle<D> {
        let id = self.ids.generate();
        let mut conn = Connection::new(
            id.clone(),
            transport,
            Arc::clone(&self.handler),
            Arc::clone(&self.config),
            D::default(),
            now,
        );
        conn.send_hello();
        let connection = Arc::new(Mutex::new(conn));
        self.registry().register(id, Arc::clone(&connection));
        SessionHandle {
            connection,
            generation: 0,
        }
    }

    /// Routes one message received on the handle's socket.
    pub fn handle_inbound(
        &self,
        handle: &mut SessionHandle<D>,
        inbound: Inbound,
        now: Instant,
    ) -> Disposition {
        let shared = Arc::clone(&handle.connection);
        let mut conn = lock(&shared);
        if !handle.is_current(&conn) {
            return Disposition::Detached;
        }
        match router::route(&mut conn, inbound, now) {
            Ok(RouteOutcome::Continue) => self.settle(&shared, &mut conn, now),
            Ok(RouteOutcome::Closed) => {
                self.registry().remove(conn.id());
                Disposition::Finished
            }
            Ok(RouteOutcome::ResumeRequested(previous)) => {
                drop(conn);
                self.resume(handle, &previous, now)
            }
            Err(err) => {
                warn!("session {} protocol violation: {err}", conn.id());
                conn.fail(CloseCode::ProtocolViolation, "protocol violation");
                self.registry().remove(conn.id());
                Disposition::Finished
            }
        }
    }

    /// The socket's send buffer drained; flush whatever backpressure held.
    pub fn handle_drain(&self, handle: &SessionHandle<D>, now: Instant) -> Disposition {
        let shared = Arc::clone(&handle.connection);
        let mut conn = lock(&shared);
        if !handle.is_current(&conn) {
            return Disposition::Detached;
        }
        conn.observe(now);
        conn.flush_queue();
        self.settle(&shared, &mut conn, now)
    }

    /// The socket closed with `code`.
    pub fn handle_transport_closed(
        &self,
        handle: &SessionHandle<D>,
        code: CloseCode,
        now: Instant,
    ) -> Disposition {
        let shared = Arc::clone(&handle.connection);
        let mut conn = lock(&shared);
        if conn.generation() != handle.generation {
            return Disposition::Detached;
        }
        self.lose(&shared, &mut conn, code, now)
    }

    /// Runs the handle's timers.  Call every `ping_interval`.
    pub fn tick(&self, handle: &SessionHandle<D>, now: Instant) -> Disposition {
        let shared = Arc::clone(&handle.connection);
        let mut conn = lock(&shared);
        if !handle.is_current(&conn) {
            return Disposition::Detached;
        }
        match conn.tick(now) {
            TickOutcome::Continue => self.settle(&shared, &mut conn, now),
            TickOutcome::TimedOut => self.lose(&shared, &mut conn, CloseCode::PingTimeout, now),
        }
    }

    // ── Session management ────────────────────────────────────────────────────

    /// Closes session `id` if it is still waiting for a resume past its
    /// window.  Returns whether this call closed it.
    pub fn expire(&self, id: &str, now: Instant) -> bool {
        let evicted = self.registry().expire(id, now);
        let Some(shared) = evicted else {
            return false;
        };
        info!("session {id} expired without resuming");
        lock(&shared).finalize_close(CloseReason::new(
            CloseCode::SessionExpired,
            CloseInitiator::Timeout,
        ));
        true
    }

    /// Closes every session whose reconnect window has passed.  Returns how
    /// many were closed.
    pub fn sweep(&self, now: Instant) -> usize {
        let evicted = self.registry().sweep(now);
        for (id, shared) in &evicted {
            info!("sweeping stale session {id}");
            lock(shared).finalize_close(CloseReason::new(
                CloseCode::SessionExpired,
                CloseInitiator::Timeout,
            ));
        }
        evicted.len()
    }

    /// Closes session `id` with `code`.  Returns `false` if it is unknown.
    pub fn close(&self, id: &str, code: CloseCode, now: Instant) -> bool {
        let Some(shared) = self.registry().get(id) else {
            return false;
        };
        let mut conn = lock(&shared);
        conn.observe(now);
        conn.close(code);
        if conn.is_closed() {
            self.registry().remove(id);
        }
        true
    }

    pub fn connection(&self, id: &str) -> Option<SharedConnection<D>> {
        self.registry().get(id)
    }

    pub fn session_count(&self) -> usize {
        self.registry().connection_count()
    }

    pub fn pending_count(&self) -> usize {
        self.registry().pending_count()
    }

    pub fn reconnect_attempts(&self, id: &str) -> Option<u32> {
        self.registry().reconnect_attempts(id)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn settle(
        &self,
        shared: &SharedConnection<D>,
        conn: &mut Connection<D>,
        now: Instant,
    ) -> Disposition {
        if conn.take_transport_failure() {
            return self.lose(shared, conn, CloseCode::Abnormal, now);
        }
        if conn.is_closed() {
            self.registry().remove(conn.id());
            return Disposition::Finished;
        }
        Disposition::Attached
    }

    fn lose(
        &self,
        shared: &SharedConnection<D>,
        conn: &mut Connection<D>,
        code: CloseCode,
        now: Instant,
    ) -> Disposition {
        match conn.transport_lost(code, now) {
            LossOutcome::Ignored => Disposition::Detached,
            LossOutcome::Closed => {
                self.registry().remove(conn.id());
                Disposition::Finished
            }
            LossOutcome::Suspended(backlog) => {
                let id = conn.id().to_string();
                self.registry().mark_disconnected(&id, shared, backlog, now);
                Disposition::Suspended {
                    id,
                    deadline: now + self.config.reconnect_window(),
                }
            }
        }
    }

    /// Moves the handle's transport from its handshaking connection to the
    /// session named `previous`.
    fn resume(&self, handle: &mut SessionHandle<D>, previous: &str, now: Instant) -> Disposition {
        let (mut transport, offered_id) = {
            let mut offered = lock(&handle.connection);
            if !handle.is_current(&offered) {
                return Disposition::Detached;
            }
            let Some(transport) = offered.take_transport() else {
                return Disposition::Detached;
            };
            offered.discard();
            (transport, offered.id().to_string())
        };
        self.registry().remove(&offered_id);

        if !self.ids.is_well_formed(previous) {
            warn!("rejected resume with malformed id {previous:?}");
            transport.close(CloseCode::ProtocolViolation.as_u16(), "invalid id");
            return Disposition::Finished;
        }

        let claimed = self.registry().resume(previous, now);
        match claimed {
            Err(err) => {
                warn!("rejected resume: {err}");
                let code = err.close_code();
                transport.close(code.as_u16(), code.description());
                if matches!(err, ResumeError::Expired(_)) {
                    self.expire(previous, now);
                }
                Disposition::Finished
            }
            Ok((shared, backlog)) => {
                let mut conn = lock(&shared);
                let Some(generation) = conn.resume(transport, backlog, now) else {
                    return Disposition::Finished;
                };
                handle.connection = Arc::clone(&shared);
                handle.generation = generation;
                self.settle(&shared, &mut conn, now)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
