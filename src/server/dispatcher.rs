//! The server's dispatcher task.
//!
//! One task owns the [`Registry`] and handles every engine callback and
//! server command in arrival order, so the registry never needs a lock.
//! Engine callbacks are polled before commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

use super::events::{ServerEvent, SocketEvent};
use super::registry::Registry;
use super::websocket::WebSocket;
use crate::domain::{ConnectionId, ReadyState};
use crate::engine::{EngineEvent, EngineSocket, ListenSocket, close_code};

/// Longest a shutdown waits for open connections to report their close.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Callback run once the listener is bound.
pub(crate) type ListeningCallback = Box<dyn FnOnce() + Send + 'static>;

/// Requests from [`super::WebSocketServer`].
#[derive(Debug)]
pub(crate) enum Command {
    /// Start (or join) shutdown; resolved once `Close` was emitted.
    Close(oneshot::Sender<()>),
    /// Snapshot of the registered handles.
    Clients(oneshot::Sender<Vec<WebSocket>>),
}

enum Shutdown {
    Running,
    Draining {
        deadline: Instant,
        waiters: Vec<oneshot::Sender<()>>,
    },
    Closed,
}

pub(crate) struct Dispatcher {
    registry: Registry,
    listen_socket: Option<ListenSocket>,
    max_backpressure: usize,
    events: mpsc::UnboundedSender<ServerEvent>,
    on_listening: Option<ListeningCallback>,
    shutdown: Shutdown,
}

impl Dispatcher {
    pub(crate) fn new(
        max_backpressure: usize,
        events: mpsc::UnboundedSender<ServerEvent>,
        on_listening: Option<ListeningCallback>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            listen_socket: None,
            max_backpressure,
            events,
            on_listening,
            shutdown: Shutdown::Running,
        }
    }

    /// Runs until both the engine and every server handle are gone.
    ///
    /// Dropping every server handle starts a shutdown, as `close()` would.
    pub(crate) async fn run(
        mut self,
        mut engine: mpsc::UnboundedReceiver<EngineEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut engine_open = true;
        let mut commands_open = true;

        while engine_open || commands_open {
            let deadline = match &self.shutdown {
                Shutdown::Draining { deadline, .. } => Some(*deadline),
                Shutdown::Running | Shutdown::Closed => None,
            };
            let grace = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                event = engine.recv(), if engine_open => match event {
                    Some(event) => self.on_engine(event),
                    None => engine_open = false,
                },
                command = commands.recv(), if commands_open => match command {
                    Some(Command::Close(done)) => self.begin_shutdown(Some(done)),
                    Some(Command::Clients(reply)) => {
                        let _ = reply.send(self.registry.handles());
                    }
                    None => {
                        commands_open = false;
                        self.begin_shutdown(None);
                    }
                },
                () = grace => {
                    tracing::warn!(remaining = self.registry.len(), "shutdown grace elapsed");
                    self.finish_shutdown();
                }
            }

            if matches!(self.shutdown, Shutdown::Draining { .. }) && self.registry.is_empty() {
                self.finish_shutdown();
            }
        }
        tracing::debug!("dispatcher stopped");
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    fn lookup(&self, socket: &Arc<dyn EngineSocket>) -> Option<&WebSocket> {
        socket.bound_id().and_then(|id| self.registry.get(id))
    }

    fn on_engine(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Listening(listen_socket) => self.on_listening(listen_socket),
            EngineEvent::ListenFailed(message) => {
                tracing::warn!(%message, "listen failed");
                self.on_listening = None;
                self.emit(ServerEvent::Error(message));
            }
            EngineEvent::Open(socket) => self.on_open(socket),
            EngineEvent::Message(socket, payload) => {
                tracing::debug!(key = %socket.key(), binary = payload.is_binary(), "ws message");
                if let Some(handle) = self.lookup(&socket) {
                    handle.emit(SocketEvent::Message(payload));
                }
            }
            EngineEvent::Drain(socket) => {
                tracing::debug!(key = %socket.key(), "ws drain");
                if let Some(handle) = self.lookup(&socket).cloned() {
                    handle.emit(SocketEvent::Drain(handle.buffered_amount()));
                    self.emit(ServerEvent::Drain(handle));
                }
            }
            EngineEvent::Ping(socket, data) => {
                tracing::debug!(key = %socket.key(), "ws ping");
                if let Some(handle) = self.lookup(&socket).cloned() {
                    self.emit(ServerEvent::Ping(handle.clone()));
                    handle.emit(SocketEvent::Ping(data));
                }
            }
            EngineEvent::Pong(socket, data) => {
                tracing::debug!(key = %socket.key(), "ws pong");
                if let Some(handle) = self.lookup(&socket).cloned() {
                    self.emit(ServerEvent::Pong(handle.clone()));
                    handle.emit(SocketEvent::Pong(data));
                }
            }
            EngineEvent::Close {
                socket,
                code,
                reason,
            } => self.on_close(&socket, code, reason),
        }
    }

    fn on_listening(&mut self, listen_socket: ListenSocket) {
        if !matches!(self.shutdown, Shutdown::Running) {
            tracing::debug!(addr = %listen_socket.local_addr(), "bound after close, releasing");
            listen_socket.close();
            return;
        }

        tracing::info!(addr = %listen_socket.local_addr(), "ws server listening");
        self.listen_socket = Some(listen_socket);
        self.emit(ServerEvent::Listening);
        if let Some(callback) = self.on_listening.take() {
            tokio::spawn(async move { callback() });
        }
    }

    fn on_open(&mut self, socket: Arc<dyn EngineSocket>) {
        if !matches!(self.shutdown, Shutdown::Running) {
            tracing::debug!(key = %socket.key(), "open after close, aborting");
            let _ = socket.close();
            return;
        }

        let id = ConnectionId::new();
        socket.bind_id(id);
        let (handle, socket_events) = WebSocket::new(id, socket, self.max_backpressure);
        handle.advance(ReadyState::Open);
        self.registry.insert(handle.clone());
        tracing::debug!(%id, clients = self.registry.len(), "ws open");

        self.emit(ServerEvent::Connection(handle.clone(), socket_events));
        handle.emit(SocketEvent::Open);
    }

    fn on_close(&mut self, socket: &Arc<dyn EngineSocket>, code: u16, reason: String) {
        let Some(id) = socket.bound_id() else {
            return;
        };
        tracing::debug!(%id, code, "ws close");

        let Some(handle) = self.registry.remove(id) else {
            return;
        };
        if handle.advance(ReadyState::Closing) < ReadyState::Closing {
            handle.emit(SocketEvent::Close { code, reason });
        }
        handle.advance(ReadyState::Closed);
    }

    fn begin_shutdown(&mut self, waiter: Option<oneshot::Sender<()>>) {
        match &mut self.shutdown {
            Shutdown::Running => {}
            Shutdown::Draining { waiters, .. } => {
                waiters.extend(waiter);
                return;
            }
            Shutdown::Closed => {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(());
                }
                return;
            }
        }

        tracing::info!(clients = self.registry.len(), "closing ws server");
        for handle in self.registry.handles() {
            if handle.ready_state() < ReadyState::Closing {
                handle.close(close_code::NORMAL, "");
            }
        }
        if let Some(listen_socket) = self.listen_socket.take() {
            listen_socket.close();
        }
        self.on_listening = None;
        self.shutdown = Shutdown::Draining {
            deadline: Instant::now() + SHUTDOWN_GRACE,
            waiters: waiter.into_iter().collect(),
        };
    }

    fn finish_shutdown(&mut self) {
        if !matches!(self.shutdown, Shutdown::Draining { .. }) {
            return;
        }
        let Shutdown::Draining { waiters, .. } =
            std::mem::replace(&mut self.shutdown, Shutdown::Closed)
        else {
            return;
        };

        tracing::info!("ws server closed");
        self.emit(ServerEvent::Close);
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}
