//! Server coordinator and connection handles.
//!
//! [`WebSocketServer::start`] validates the configuration, spawns the
//! listener and the dispatcher task, and returns the server handle together
//! with the receiver of [`ServerEvent`]s. Each accepted connection arrives
//! as [`ServerEvent::Connection`] carrying a [`WebSocket`] handle and the
//! receiver of that connection's [`SocketEvent`]s.
//!
//! ```text
//! engine callbacks ──► dispatcher ──► Registry
//!                          │
//!                          ├──► ServerEvent channel
//!                          └──► per-connection SocketEvent channels
//! ```

mod dispatcher;
pub mod events;
pub mod registry;
pub mod websocket;

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::Uri;
use tokio::sync::{mpsc, oneshot};

use crate::config::ServerConfig;
use crate::engine::handshake::{self, UpgradeContext};
use crate::engine::listener::{self, TlsFiles};
use crate::error::ConfigError;
use crate::pubsub::TopicBroker;
use dispatcher::{Command, Dispatcher, ListeningCallback};

pub use dispatcher::SHUTDOWN_GRACE;
pub use events::{ServerEvent, ServerEvents, SocketEvent, SocketEvents};
pub use registry::Registry;
pub use websocket::WebSocket;

/// Snapshot returned by [`WebSocketServer::address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Configured host.
    pub address: String,
    /// Configured family label.
    pub family: String,
    /// Configured port.
    pub port: u16,
}

/// Handle to a running server. Cheap to clone; dropping every clone
/// shuts the server down.
#[derive(Debug, Clone)]
pub struct WebSocketServer {
    config: Arc<ServerConfig>,
    broker: Arc<TopicBroker>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WebSocketServer {
    /// Validates `config` and starts listening.
    ///
    /// Binding happens in the background: its outcome arrives as
    /// [`ServerEvent::Listening`] or [`ServerEvent::Error`]. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid; nothing is
    /// started in that case.
    pub fn start(config: ServerConfig) -> Result<(Self, ServerEvents), ConfigError> {
        Self::spawn(config, None)
    }

    /// Like [`WebSocketServer::start`], and runs `on_listening` on its own
    /// task once the listener is bound, after `Listening` was queued.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn start_with<F>(
        config: ServerConfig,
        on_listening: F,
    ) -> Result<(Self, ServerEvents), ConfigError>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(config, Some(Box::new(on_listening)))
    }

    fn spawn(
        config: ServerConfig,
        on_listening: Option<ListeningCallback>,
    ) -> Result<(Self, ServerEvents), ConfigError> {
        config.validate()?;
        if config.compression {
            tracing::warn!("per-message compression is not negotiated; serving uncompressed");
        }

        let config = Arc::new(config);
        let broker = Arc::new(TopicBroker::new());
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let context = Arc::new(UpgradeContext {
            broker: Arc::clone(&broker),
            events: engine_tx.clone(),
            verify: config.verify_client.clone(),
            max_payload_length: config.max_payload_length,
            max_backpressure: config.max_backpressure,
            idle_timeout: config.idle_timeout,
        });
        let router = handshake::router(context, config.route_path());
        let tls = config.tls_files().map(|(cert, key)| TlsFiles {
            cert: cert.to_path_buf(),
            key: key.to_path_buf(),
        });

        tracing::info!(
            host = %config.host,
            port = config.port,
            path = %config.path,
            tls = tls.is_some(),
            "starting ws server"
        );
        listener::spawn(config.host.clone(), config.port, tls, router, engine_tx);

        let dispatcher = Dispatcher::new(config.max_backpressure, events_tx, on_listening);
        tokio::spawn(dispatcher.run(engine_rx, commands_rx));

        Ok((
            Self {
                config,
                broker,
                commands,
            },
            events_rx,
        ))
    }

    /// Closes every connection and the listener.
    ///
    /// The returned future resolves after [`ServerEvent::Close`] was
    /// emitted; shutdown starts when this is called, whether or not the
    /// future is awaited. Calling it again only waits for the same close.
    pub fn close(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done, done_rx) = oneshot::channel();
        let sent = self.commands.send(Command::Close(done)).is_ok();
        async move {
            if sent {
                let _ = done_rx.await;
            }
        }
    }

    /// Handles of every open connection.
    pub async fn clients(&self) -> Vec<WebSocket> {
        let (reply, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Clients(reply)).is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Number of open connections.
    pub async fn client_count(&self) -> usize {
        self.clients().await.len()
    }

    /// `true` when the path of `url` is the configured path.
    #[must_use]
    pub fn should_handle(&self, url: &str) -> bool {
        path_matches(&self.config.path, url)
    }

    /// Publishes to every subscriber of `topic`. Returns how many
    /// connections were reached.
    pub fn publish(&self, topic: &str, message: impl Into<Bytes>, is_binary: bool) -> usize {
        self.broker.publish(topic, &message.into(), is_binary, None)
    }

    /// Configured host, family and port.
    #[must_use]
    pub fn address(&self) -> ServerAddress {
        ServerAddress {
            address: self.config.host.clone(),
            family: self.config.family.clone(),
            port: self.config.port,
        }
    }

    /// The validated configuration.
    #[must_use]
    pub fn options(&self) -> &ServerConfig {
        &self.config
    }
}

fn path_matches(configured: &str, url: &str) -> bool {
    let (Ok(configured), Ok(requested)) = (configured.parse::<Uri>(), url.parse::<Uri>()) else {
        return false;
    };
    configured.path() == requested.path()
}
