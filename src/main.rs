//! mimic-ws demo server entry point.
//!
//! Echoes every frame back to its sender and answers the JSON commands in
//! [`mimic_ws::protocol`]. Configured from `MIMIC_WS_*` environment
//! variables; set `MIMIC_WS_LOG_JSON=true` for JSON logs.

use tracing_subscriber::EnvFilter;

use mimic_ws::config::{self, ServerConfig};
use mimic_ws::domain::Payload;
use mimic_ws::protocol;
use mimic_ws::server::{ServerEvent, SocketEvent, SocketEvents, WebSocket, WebSocketServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env()?;
    let (server, mut events) = WebSocketServer::start(config)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ServerEvent::Connection(ws, socket_events)) => {
                    tokio::spawn(serve(ws, socket_events));
                }
                Some(ServerEvent::Listening) => {
                    let address = server.address();
                    tracing::info!(host = %address.address, port = address.port, "ready");
                }
                Some(ServerEvent::Error(message)) => anyhow::bail!(message),
                Some(ServerEvent::Close) | None => break,
                Some(ServerEvent::Drain(_) | ServerEvent::Ping(_) | ServerEvent::Pong(_)) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("ctrl-c received, shutting down");
                server.close().await;
                break;
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config::log_json_from_env() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Drives one connection until it closes.
async fn serve(ws: WebSocket, mut events: SocketEvents) {
    let id = ws.id();
    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Open => {
                tracing::info!(%id, remote = %ws.remote_address(), "client connected");
            }
            SocketEvent::Message(Payload::Text(text)) => {
                let reply = match protocol::parse(&text) {
                    Some(Ok(request)) => protocol::to_text(&protocol::execute(&ws, request)),
                    Some(Err(reply)) => protocol::to_text(&reply),
                    None => text,
                };
                let _ = ws.send(reply, false);
            }
            SocketEvent::Message(Payload::Binary(data)) => {
                let _ = ws.send(data, true);
            }
            SocketEvent::Backpressure(buffered) => {
                tracing::debug!(%id, buffered, "backpressure");
            }
            SocketEvent::Error(message) => {
                tracing::warn!(%id, %message, "connection error");
            }
            SocketEvent::Close { code, reason } => {
                tracing::info!(%id, code, %reason, "client disconnected");
                break;
            }
            SocketEvent::Drain(_) | SocketEvent::Ping(_) | SocketEvent::Pong(_) => {}
        }
    }
}
