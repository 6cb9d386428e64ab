//! Per-connection driver.
//!
//! Splits an upgraded WebSocket into a writer task draining the socket's
//! write queue and a read loop translating inbound frames into engine
//! callbacks. The read loop also owns the timers: idle timeout, the close
//! handshake bound, and abort requests.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};

use super::socket::Outbound;
use super::{CLOSE_HANDSHAKE_TIMEOUT, EngineEvent, EngineSocket, UpgradedSocket, close_code};
use crate::domain::Payload;

/// Runs one upgraded connection to completion.
///
/// Delivers the open callback first and the close callback last; the
/// close callback carries the code passed to a local `end`, else the
/// peer's close frame, else 1006.
pub async fn run(
    ws: WebSocket,
    socket: Arc<UpgradedSocket>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    idle_timeout: Option<Duration>,
) {
    let (sink, stream) = ws.split();
    let writer = tokio::spawn(write_loop(sink, Arc::clone(&socket), outbound));

    socket.emit(EngineEvent::Open);
    let (code, reason) = read_loop(stream, &socket, idle_timeout).await;

    writer.abort();
    socket.finish();
    tracing::debug!(key = %socket.key(), code, "ws connection closed");
    socket.emit(|socket| EngineEvent::Close {
        socket,
        code,
        reason,
    });
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    socket: Arc<UpgradedSocket>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(message, len) => {
                if sink.send(message).await.is_err() {
                    break;
                }
                socket.flushed(len);
            }
            Outbound::Close(frame) => {
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    socket: &UpgradedSocket,
    idle_timeout: Option<Duration>,
) -> (u16, String) {
    let mut handshake_deadline: Option<Instant> = None;
    let mut peer_close: Option<(u16, String)> = None;

    let outcome = |peer_close: Option<(u16, String)>| {
        socket
            .local_close()
            .or(peer_close)
            .unwrap_or((close_code::ABNORMAL, String::new()))
    };

    loop {
        let idle = async move {
            match idle_timeout {
                Some(timeout) => sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        let handshake = async move {
            match handshake_deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let payload = Payload::Text(text.as_str().to_string());
                    socket.emit(|s| EngineEvent::Message(s, payload));
                }
                Some(Ok(Message::Binary(data))) => {
                    socket.emit(|s| EngineEvent::Message(s, Payload::Binary(data)));
                }
                Some(Ok(Message::Ping(data))) => socket.emit(|s| EngineEvent::Ping(s, data)),
                Some(Ok(Message::Pong(data))) => socket.emit(|s| EngineEvent::Pong(s, data)),
                Some(Ok(Message::Close(frame))) => {
                    peer_close = Some(match frame {
                        Some(frame) => (frame.code, frame.reason.as_str().to_string()),
                        None => (close_code::NO_STATUS, String::new()),
                    });
                    handshake_deadline.get_or_insert_with(|| Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
                }
                Some(Err(err)) => {
                    tracing::debug!(key = %socket.key(), %err, "ws read error");
                    return outcome(peer_close);
                }
                None => return outcome(peer_close),
            },
            () = socket.ending.notified() => {
                handshake_deadline.get_or_insert_with(|| Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
            }
            () = socket.aborted.notified() => {
                return (close_code::ABNORMAL, String::new());
            }
            () = handshake => {
                tracing::debug!(key = %socket.key(), "close handshake timed out");
                return outcome(peer_close);
            }
            () = idle => {
                tracing::debug!(key = %socket.key(), "idle timeout");
                return (close_code::ABNORMAL, String::new());
            }
        }
    }
}
