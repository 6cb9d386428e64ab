//! Plain and TLS listeners.
//!
//! Binding happens on a spawned task; the result reaches the dispatcher as
//! [`EngineEvent::Listening`] or [`EngineEvent::ListenFailed`], never
//! synchronously. Closing a [`ListenSocket`] stops accepting new
//! connections; already upgraded sockets keep running on their own tasks.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::EngineEvent;

/// TLS certificate chain and private key, both PEM.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    /// Certificate chain.
    pub cert: PathBuf,
    /// Private key.
    pub key: PathBuf,
}

/// A bound, accepting listener.
#[derive(Debug)]
pub struct ListenSocket {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl ListenSocket {
    /// Address actually bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections.
    pub fn close(self) {
        self.accept_task.abort();
        tracing::debug!(addr = %self.local_addr, "listen socket closed");
    }
}

/// Binds `host:port` on a background task and reports the outcome on
/// `events`. Never retries.
pub fn spawn(
    host: String,
    port: u16,
    tls: Option<TlsFiles>,
    router: Router,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    tokio::spawn(async move {
        let event = match listen(&host, port, tls, router).await {
            Ok(socket) => EngineEvent::Listening(socket),
            Err(err) => {
                tracing::warn!(%host, port, %err, "failed to bind");
                EngineEvent::ListenFailed(format!(
                    "Failed to start websocket server, host {host}, port {port}"
                ))
            }
        };
        let _ = events.send(event);
    });
}

async fn listen(
    host: &str,
    port: u16,
    tls: Option<TlsFiles>,
    router: Router,
) -> std::io::Result<ListenSocket> {
    let rustls = match &tls {
        Some(files) => Some(RustlsConfig::from_pem_file(&files.cert, &files.key).await?),
        None => None,
    };

    let listener = TcpListener::bind((host, port)).await?;
    let local_addr = listener.local_addr()?;
    let service = router.into_make_service_with_connect_info::<SocketAddr>();

    let accept_task = match rustls {
        None => tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, service).await {
                tracing::warn!(%err, "listener stopped");
            }
        }),
        Some(config) => {
            let listener = listener.into_std()?;
            tokio::spawn(async move {
                if let Err(err) = axum_server::from_tcp_rustls(listener, config)
                    .serve(service)
                    .await
                {
                    tracing::warn!(%err, "tls listener stopped");
                }
            })
        }
    };

    Ok(ListenSocket {
        local_addr,
        accept_task,
    })
}
