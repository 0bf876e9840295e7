//! WebSocket Session Driver
//!
//! Runs one playback session per connection. The driver owns the socket,
//! the session, the tick timer and the optional broadcast subscription, and
//! multiplexes them in a single `select!` loop:
//!
//! ```text
//! client frame ──► decode ──► broadcast? ──► Broadcaster
//!                                 │
//!                                 └────────► PlaybackSession::handle ──┐
//! tick timer ──────────────────────────────► PlaybackSession::on_tick ─┼─► outbox ──► socket
//! broadcast subscription ─────────────────────────────────────────────┘
//! ```
//!
//! Every event runs to completion before the next is taken, so session
//! state is never observed mid-mutation. Store calls run under
//! `block_in_place` on a multi-threaded runtime; a slow store stalls only
//! its own connection.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::Instrument;

use crate::application::ports::TimeSeriesSource;
use crate::application::services::{PlaybackSession, SessionStats, TickOutcome};
use crate::domain::protocol::{Command, ServerMessage, decode};
use crate::infrastructure::broadcast::BroadcastSubscription;
use crate::infrastructure::catalog::DataSet;
use crate::infrastructure::metrics;
use crate::infrastructure::server::AppState;
use crate::infrastructure::server::timer::TickTimer;

type SocketSink = SplitSink<WebSocket, Message>;

/// Drive one connection until the client leaves or the server shuts down.
pub(crate) async fn drive(socket: WebSocket, data_set: Arc<DataSet>, state: Arc<AppState>) {
    let source = match blocking(|| data_set.open_source()) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(data_set = %data_set.id(), error = %e, "Cannot open store for session");
            reject(socket, "store unavailable").await;
            return;
        }
    };

    let session = PlaybackSession::new(
        data_set.session_settings().clone(),
        source,
        state.continuity.for_data_set(data_set.id()),
    );
    let span = tracing::info_span!("session", session_id = %session.id(), data_set = %data_set.id());
    run(socket, session, &data_set, &state).instrument(span).await;
}

async fn run<S: TimeSeriesSource>(
    socket: WebSocket,
    mut session: PlaybackSession<S>,
    data_set: &DataSet,
    state: &AppState,
) {
    let id = data_set.id();
    let lease = state.sessions.register(session.id(), id);
    metrics::record_session_opened(id);
    metrics::set_active_sessions(id, state.sessions.count(id));
    tracing::info!("Playback session opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subscription = data_set.broadcaster().map(|b| b.subscribe(session.id()));
    let mut timer = TickTimer::new(session.tick_interval());
    let mut outbox: Vec<ServerMessage> = Vec::new();
    let mut reported = SessionStats::default();

    blocking(|| session.open(&mut outbox));

    loop {
        report(id, &session, &mut reported);
        timer.sync(session.is_streaming());
        if let Err(e) = flush(&mut ws_tx, &mut outbox).await {
            tracing::debug!(session_id = %session.id(), error = %e, "Client gone while sending");
            break;
        }

        tokio::select! {
            biased;

            () = state.shutdown.cancelled() => {
                tracing::debug!(session_id = %session.id(), "Server shutting down");
                break;
            }

            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    on_text(text.as_str(), &mut session, data_set, &mut outbox);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session.id(), error = %e, "Socket read failed");
                    break;
                }
            },

            () = timer.tick() => {
                let started = Instant::now();
                if let TickOutcome::Delivered { records } = blocking(|| session.on_tick(&mut outbox)) {
                    tracing::trace!(session_id = %session.id(), tick = session.current_tick(), records, "Tick delivered");
                }
                metrics::record_tick_duration(id, started.elapsed());
            }

            payload = next_broadcast(subscription.as_mut()) => match payload {
                Some(payload) => outbox.push(ServerMessage::Broadcast(payload)),
                None => subscription = None,
            },
        }
    }

    blocking(|| session.close());
    report(id, &session, &mut reported);
    if let Some(subscription) = subscription {
        subscription.unsubscribe();
    }
    drop(lease);
    metrics::set_active_sessions(id, state.sessions.count(id));

    if let Err(e) = ws_tx.close().await {
        tracing::trace!(error = %e, "Socket already closed");
    }
}

/// Decode one text frame and apply it.
fn on_text<S: TimeSeriesSource>(
    text: &str,
    session: &mut PlaybackSession<S>,
    data_set: &DataSet,
    outbox: &mut Vec<ServerMessage>,
) {
    let envelope = match decode(text) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => {
            tracing::debug!(session_id = %session.id(), "Ignoring frame without type");
            return;
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id(), error = %e, "Ignoring undecodable frame");
            return;
        }
    };

    if let Command::Broadcast(payload) = &envelope.command
        && let Some(broadcaster) = data_set.broadcaster()
    {
        let delivered = broadcaster.broadcast(payload.clone());
        tracing::debug!(session_id = %session.id(), delivered, "Relayed broadcast");
        metrics::record_broadcast(data_set.id());
        return;
    }

    let command = envelope.command.name();
    if blocking(|| session.handle(envelope, outbox)).is_some() {
        metrics::record_command(data_set.id(), command);
    }
}

/// Send every queued message as a JSON text frame.
async fn flush(ws_tx: &mut SocketSink, outbox: &mut Vec<ServerMessage>) -> Result<(), axum::Error> {
    for message in outbox.drain(..) {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = message.label(), error = %e, "Failed to encode message");
                continue;
            }
        };
        ws_tx.send(Message::Text(text.into())).await?;
        metrics::record_frame_sent(message.label());
    }
    Ok(())
}

/// Publish counter deltas since the last report.
fn report<S: TimeSeriesSource>(data_set: &str, session: &PlaybackSession<S>, reported: &mut SessionStats) {
    let stats = session.stats();
    metrics::record_records_emitted(data_set, stats.records_emitted - reported.records_emitted);
    metrics::record_source_errors(data_set, stats.source_errors - reported.source_errors);
    *reported = stats;
}

async fn next_broadcast(subscription: Option<&mut BroadcastSubscription>) -> Option<Value> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::ERROR,
        reason: Utf8Bytes::from_static(reason),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

/// Run store work without stalling other connections on a multi-threaded
/// runtime.
fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
