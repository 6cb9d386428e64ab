//! HTTP upgrade route and the verification gate.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use super::{EngineEvent, EngineSocket, UpgradedSocket, connection, high_water};
use crate::config::{VerifyClient, VerifyInfo};
use crate::error::HandshakeRejection;
use crate::pubsub::TopicBroker;

/// Router state shared by every upgrade.
#[derive(Debug)]
pub struct UpgradeContext {
    /// Broker new sockets publish and subscribe through.
    pub broker: Arc<TopicBroker>,
    /// Engine callback channel.
    pub events: mpsc::UnboundedSender<EngineEvent>,
    /// Verification gate.
    pub verify: VerifyClient,
    /// Inbound message limit (0 = unlimited).
    pub max_payload_length: usize,
    /// Outbound queue limit (0 = unlimited).
    pub max_backpressure: usize,
    /// Idle timeout for upgraded sockets.
    pub idle_timeout: Option<Duration>,
}

impl UpgradeContext {
    async fn accept(self: Arc<Self>, ws: WebSocket, remote: IpAddr) {
        let (socket, outbound) = UpgradedSocket::new(
            remote,
            high_water(self.max_backpressure),
            self.max_backpressure,
            Arc::clone(&self.broker),
            self.events.clone(),
        );
        tracing::debug!(key = %socket.key(), %remote, "ws upgraded");
        connection::run(ws, socket, outbound, self.idle_timeout).await;
    }
}

/// Builds the upgrade router for `path`.
///
/// The trailing-slash twin of `path` is routed too, so `/foobar/` reaches a
/// server configured for `/foobar`.
pub fn router(context: Arc<UpgradeContext>, path: &str) -> Router {
    let mut router = Router::new().route(path, get(upgrade));
    if path != "/" {
        let twin = match path.strip_suffix('/') {
            Some(trimmed) => trimmed.to_string(),
            None => format!("{path}/"),
        };
        router = router.route(&twin, get(upgrade));
    }
    router.layer(TraceLayer::new_for_http()).with_state(context)
}

/// `GET <path>`: runs the verification gate, then upgrades.
async fn upgrade(
    State(context): State<Arc<UpgradeContext>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let info = request_info(&uri, &headers);
    if !context.verify.verify(&info) {
        tracing::debug!(url = %info.url, %remote, "handshake rejected");
        return HandshakeRejection.into_response();
    }

    let limit = context.max_payload_length;
    let ws = if limit > 0 {
        ws.max_message_size(limit).max_frame_size(limit)
    } else {
        ws
    };

    ws.on_failed_upgrade(move |err| tracing::debug!(%err, %remote, "ws upgrade failed"))
        .on_upgrade(move |socket| context.accept(socket, remote.ip()))
}

/// Extracts the headers, query string and decoded path of a handshake.
#[must_use]
pub fn request_info(uri: &Uri, headers: &HeaderMap) -> VerifyInfo {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect();

    let url = urlencoding::decode(uri.path())
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| uri.path().to_string());

    VerifyInfo {
        headers,
        query: uri.query().unwrap_or_default().to_string(),
        url,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn request_info_collects_headers_query_and_path() {
        let Ok(uri) = "/foobar/?token=qwerty".parse::<Uri>() else {
            panic!("valid uri");
        };
        let mut headers = HeaderMap::new();
        headers.insert("foo", HeaderValue::from_static("bar"));
        headers.insert("pam", HeaderValue::from_static("bam"));
        headers.insert("host", HeaderValue::from_static("localhost:1337"));

        let info = request_info(&uri, &headers);

        assert_eq!(info.url, "/foobar/");
        assert_eq!(info.query, "token=qwerty");
        assert_eq!(info.headers.get("foo").map(String::as_str), Some("bar"));
        assert_eq!(info.headers.get("pam").map(String::as_str), Some("bam"));
        assert_eq!(
            info.headers.get("host").map(String::as_str),
            Some("localhost:1337")
        );
    }

    #[test]
    fn request_info_decodes_path() {
        let Ok(uri) = "/chat%20room".parse::<Uri>() else {
            panic!("valid uri");
        };
        let info = request_info(&uri, &HeaderMap::new());
        assert_eq!(info.url, "/chat room");
        assert_eq!(info.query, "");
    }
}
