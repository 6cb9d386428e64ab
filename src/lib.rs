//! # mimic-ws
//!
//! Event-driven WebSocket server with backpressure-aware sends and topic
//! publish/subscribe.
//!
//! The crate puts a per-connection, event-driven interface on top of an
//! asynchronous socket engine built on `axum`. Every connection is a
//! [`server::WebSocket`] handle whose operations never block; what happens
//! on the wire comes back as tagged events on `tokio::sync::mpsc`
//! receivers.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, optionally TLS)
//!     │
//!     ├── Listener + verification gate (engine/)
//!     ├── Connection driver, writer task (engine/)
//!     │
//!     ├── Dispatcher task + Registry (server/)
//!     ├── WebSocketServer, WebSocket handles (server/)
//!     │
//!     └── TopicBroker (pubsub/)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use mimic_ws::config::ServerConfig;
//! use mimic_ws::server::{ServerEvent, SocketEvent, WebSocketServer};
//!
//! # async fn run() -> Result<(), mimic_ws::error::ConfigError> {
//! let (server, mut events) = WebSocketServer::start(ServerConfig::new(1337))?;
//! while let Some(event) = events.recv().await {
//!     if let ServerEvent::Connection(ws, mut socket_events) = event {
//!         tokio::spawn(async move {
//!             while let Some(event) = socket_events.recv().await {
//!                 if let SocketEvent::Message(payload) = event {
//!                     let binary = payload.is_binary();
//!                     let _ = ws.send(payload.into_bytes(), binary);
//!                 }
//!             }
//!         });
//!     }
//! }
//! server.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod pubsub;
pub mod server;
