//! Shared helpers for the integration tests.

#![allow(dead_code, clippy::panic)]

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use mimic_ws::config::ServerConfig;
use mimic_ws::server::{
    ServerEvent, ServerEvents, SocketEvent, SocketEvents, WebSocket, WebSocketServer,
};

/// Client side of a test connection.
pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(3);

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    let Ok(listener) = std::net::TcpListener::bind("127.0.0.1:0") else {
        panic!("bind an ephemeral port");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("ephemeral port address");
    };
    addr.port()
}

/// Starts a server and waits until it listens.
pub async fn start(config: ServerConfig) -> (WebSocketServer, ServerEvents) {
    let Ok((server, mut events)) = WebSocketServer::start(config) else {
        panic!("valid config");
    };
    let ServerEvent::Listening = next_event(&mut events).await else {
        panic!("expected the server to listen");
    };
    (server, events)
}

/// Next server-scope event.
pub async fn next_event(events: &mut ServerEvents) -> ServerEvent {
    let Ok(Some(event)) = timeout(WAIT, events.recv()).await else {
        panic!("expected a server event");
    };
    event
}

/// Next connection-scope event.
pub async fn next_socket_event(events: &mut SocketEvents) -> SocketEvent {
    let Ok(Some(event)) = timeout(WAIT, events.recv()).await else {
        panic!("expected a socket event");
    };
    event
}

/// Next connection-scope event that is not a backpressure or drain report.
pub async fn next_lifecycle_event(events: &mut SocketEvents) -> SocketEvent {
    loop {
        match next_socket_event(events).await {
            SocketEvent::Backpressure(_) | SocketEvent::Drain(_) => {}
            event => return event,
        }
    }
}

/// Opens a client connection to `path`.
pub async fn connect(port: u16, path: &str) -> Client {
    let Ok((client, _)) = connect_async(format!("ws://127.0.0.1:{port}{path}")).await else {
        panic!("client handshake failed");
    };
    client
}

/// Waits for the server side of the next connection, past its `Open`.
pub async fn accept(events: &mut ServerEvents) -> (WebSocket, SocketEvents) {
    let ServerEvent::Connection(ws, mut socket_events) = next_event(events).await else {
        panic!("expected a connection");
    };
    let SocketEvent::Open = next_socket_event(&mut socket_events).await else {
        panic!("expected open first");
    };
    (ws, socket_events)
}

/// Connects a client and returns both ends.
pub async fn open_pair(
    port: u16,
    events: &mut ServerEvents,
) -> (Client, WebSocket, SocketEvents) {
    let client = connect(port, "/").await;
    let (ws, socket_events) = accept(events).await;
    (client, ws, socket_events)
}

/// Next data or close frame received by `client`, `None` on timeout or
/// end of stream.
pub async fn next_message(client: &mut Client) -> Option<Message> {
    loop {
        match timeout(WAIT, client.next()).await {
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(Some(Ok(message))) => return Some(message),
            _ => return None,
        }
    }
}

/// `true` if `client` receives no data frame within `window`.
pub async fn stays_silent(client: &mut Client, window: Duration) -> bool {
    loop {
        match timeout(window, client.next()).await {
            Err(_) => return true,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(_) => return false,
        }
    }
}

/// Reads until a close frame arrives and returns its code and reason.
pub async fn read_until_close(client: &mut Client) -> Option<(u16, String)> {
    loop {
        match next_message(client).await? {
            Message::Close(Some(frame)) => {
                return Some((u16::from(frame.code), frame.reason.as_str().to_string()));
            }
            Message::Close(None) => return Some((1005, String::new())),
            _ => {}
        }
    }
}
