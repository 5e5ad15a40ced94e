//! WebSocket server: accept loop and per-socket task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket.
//! 3. Running one task per socket that feeds the socket's events (messages,
//!    drain, close, timer ticks) into the shared [`Engine`].
//! 4. Running one writer task per socket (see [`super::ws_transport`]).
//! 5. Scheduling an expiry timer for every session that is left waiting for
//!    a resume, plus a periodic sweep as a safety net.
//! 6. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Sessions vs. sockets (for beginners)
//!
//! A socket task does not own a session.  When a client resumes, the new
//! socket's task takes over the session that the old socket carried, and the
//! old task (if still alive) is told via [`Disposition::Detached`] to stop.
//! All session state lives in the engine; a socket task only holds a
//! [`tether_core::SessionHandle`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use tether_core::{CloseCode, Disposition, Engine, Inbound};

use crate::application::EchoHandler;
use crate::domain::ServerConfig;
use crate::infrastructure::ws_transport::{write_loop, WsTransport};

/// How long a finished socket waits for its writer to flush the close frame.
const WRITER_LINGER: Duration = Duration::from_secs(5);

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the echo server until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the engine configuration is invalid or the listener
/// cannot be bound.
pub async fn run_server(config: ServerConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let engine = Engine::new(config.engine.clone(), Arc::new(EchoHandler))
        .context("invalid engine configuration")?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;

    info!("tether server listening on {}", config.bind_addr);
    serve(listener, Arc::new(engine), running).await
}

/// Accepts WebSocket clients on `listener` and runs their sessions on
/// `engine` until `running` is cleared.
///
/// # Errors
///
/// Currently never fails; accept errors are logged and skipped.
pub async fn serve<D>(
    listener: TcpListener,
    engine: Arc<Engine<D>>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()>
where
    D: Default + Send + Sync + 'static,
{
    let sweeper = tokio::spawn(sweep_loop(Arc::clone(&engine)));

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the loop can notice the shutdown flag.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    handle_socket(stream, peer_addr, engine).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    sweeper.abort();
    Ok(())
}

// ── Per-socket handler ────────────────────────────────────────────────────────

async fn handle_socket<D>(stream: TcpStream, peer_addr: SocketAddr, engine: Arc<Engine<D>>)
where
    D: Default + Send + Sync + 'static,
{
    match run_socket(stream, peer_addr, engine).await {
        Ok(disposition) => debug!("socket {peer_addr} finished: {disposition:?}"),
        Err(e) => warn!("socket {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs one WebSocket until it no longer backs a live session.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.
async fn run_socket<D>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    engine: Arc<Engine<D>>,
) -> anyhow::Result<Disposition>
where
    D: Default + Send + Sync + 'static,
{
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let (sink, mut incoming) = ws_stream.split();

    let (commands, command_rx) = mpsc::unbounded_channel();
    let buffered = Arc::new(AtomicUsize::new(0));
    let drained = Arc::new(Notify::new());
    let writer = tokio::spawn(write_loop(
        sink,
        command_rx,
        Arc::clone(&buffered),
        Arc::clone(&drained),
        engine.config().backpressure_threshold,
        peer_addr.to_string(),
    ));

    let transport = WsTransport::new(commands, buffered);
    let mut handle = engine.accept(Box::new(transport), Instant::now());
    info!("socket {peer_addr} offered session {}", handle.session_id());

    let mut ticker = interval(engine.config().ping_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let disposition = loop {
        let disposition = tokio::select! {
            message = incoming.next() => match message {
                Some(Ok(message)) => match classify(message) {
                    SocketEvent::Inbound(inbound) => {
                        engine.handle_inbound(&mut handle, inbound, Instant::now())
                    }
                    SocketEvent::Closed(code) => {
                        engine.handle_transport_closed(&handle, code, Instant::now())
                    }
                    SocketEvent::Ignored => continue,
                },
                Some(Err(e)) => {
                    debug!("socket {peer_addr} read error: {e}");
                    engine.handle_transport_closed(&handle, CloseCode::Abnormal, Instant::now())
                }
                None => engine.handle_transport_closed(&handle, CloseCode::Abnormal, Instant::now()),
            },
            () = drained.notified() => engine.handle_drain(&handle, Instant::now()),
            _ = ticker.tick() => engine.tick(&handle, Instant::now()),
        };
        if disposition != Disposition::Attached {
            break disposition;
        }
    };

    if let Disposition::Suspended { id, deadline } = &disposition {
        schedule_expiry(Arc::clone(&engine), id.clone(), *deadline);
    }
    drop(handle);
    if timeout(WRITER_LINGER, writer).await.is_err() {
        debug!("socket {peer_addr} writer did not finish in time");
    }
    Ok(disposition)
}

// ── Event classification ──────────────────────────────────────────────────────

/// What a received WebSocket message means to the engine.
#[derive(Debug, PartialEq, Eq)]
enum SocketEvent {
    Inbound(Inbound),
    Closed(CloseCode),
    /// Protocol-level ping/pong; tungstenite answers pings itself.
    Ignored,
}

fn classify(message: WsMessage) -> SocketEvent {
    match message {
        WsMessage::Text(text) => SocketEvent::Inbound(Inbound::Text(text)),
        WsMessage::Binary(bytes) => SocketEvent::Inbound(Inbound::Binary(bytes)),
        // A close frame without a status is reported as 1005.
        WsMessage::Close(frame) => SocketEvent::Closed(CloseCode::from(
            frame.map_or(1005, |frame| u16::from(frame.code)),
        )),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => SocketEvent::Ignored,
    }
}

// ── Timers ────────────────────────────────────────────────────────────────────

/// Expires session `id` at `deadline` unless it resumed in the meantime.
fn schedule_expiry<D>(engine: Arc<Engine<D>>, id: String, deadline: Instant)
where
    D: Default + Send + Sync + 'static,
{
    debug!("session {id} expires unless resumed");
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline.into()).await;
        if engine.expire(&id, Instant::now()) {
            info!("session {id} expired");
        }
    });
}

/// Periodically evicts sessions whose expiry timer did not fire.
async fn sweep_loop<D>(engine: Arc<Engine<D>>)
where
    D: Default + Send + Sync + 'static,
{
    let mut ticker = interval(engine.config().sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let swept = engine.sweep(Instant::now());
        if swept > 0 {
            info!("swept {swept} stale session(s)");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
