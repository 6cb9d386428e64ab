//! Server configuration.
//!
//! [`ServerConfig`] is built in code (`ServerConfig::new(port)` plus
//! chained setters) or loaded from environment variables via
//! [`ServerConfig::from_env`] (optionally from a `.env` file through
//! `dotenvy`). It is validated once, when the server starts, and is
//! immutable afterwards.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;

/// Request information handed to the verification gate during the
/// handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyInfo {
    /// Request headers keyed by lower-cased name.
    pub headers: HashMap<String, String>,
    /// Raw query string without the leading `?` (empty when absent).
    pub query: String,
    /// Decoded request path.
    pub url: String,
}

/// Verification gate evaluated before a connection is upgraded.
///
/// Returning `false` rejects the peer with `401 Unauthorized`. The default
/// accepts everyone.
#[derive(Clone)]
pub struct VerifyClient(Arc<dyn Fn(&VerifyInfo) -> bool + Send + Sync>);

impl VerifyClient {
    /// Wraps a predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&VerifyInfo) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Runs the predicate.
    #[must_use]
    pub fn verify(&self, info: &VerifyInfo) -> bool {
        (self.0)(info)
    }
}

impl Default for VerifyClient {
    fn default() -> Self {
        Self::new(|_| true)
    }
}

impl fmt::Debug for VerifyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VerifyClient(..)")
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub host: String,

    /// Port to bind to. Required, must be greater than zero.
    pub port: u16,

    /// Route accepting WebSocket upgrades. Must start with `/` and cannot
    /// contain route parameters or wildcards.
    pub path: String,

    /// Largest inbound message in bytes (0 = unlimited).
    pub max_payload_length: usize,

    /// Buffered outbound bytes above which a connection is closed with
    /// 1011 (0 = unlimited).
    pub max_backpressure: usize,

    /// Close connections that receive nothing for this long.
    pub idle_timeout: Option<Duration>,

    /// Requested per-message compression.
    pub compression: bool,

    /// PEM certificate chain. Must be set together with `tls_key_path`.
    pub tls_cert_path: Option<PathBuf>,

    /// PEM private key. Must be set together with `tls_cert_path`.
    pub tls_key_path: Option<PathBuf>,

    /// Handshake verification gate.
    pub verify_client: VerifyClient,

    /// Address family label reported by `address()`. Cosmetic.
    pub family: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            path: "/".to_string(),
            max_payload_length: 0,
            max_backpressure: 0,
            idle_timeout: None,
            compression: false,
            tls_cert_path: None,
            tls_key_path: None,
            verify_client: VerifyClient::default(),
            family: "IPv4".to_string(),
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on `port`.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Sets the bind host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the upgrade path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the inbound payload limit.
    #[must_use]
    pub fn max_payload_length(mut self, bytes: usize) -> Self {
        self.max_payload_length = bytes;
        self
    }

    /// Sets the backpressure limit for forced closes.
    #[must_use]
    pub fn max_backpressure(mut self, bytes: usize) -> Self {
        self.max_backpressure = bytes;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Enables or disables compression.
    #[must_use]
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Serves over TLS using the given PEM files.
    #[must_use]
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls_cert_path = Some(cert.into());
        self.tls_key_path = Some(key.into());
        self
    }

    /// Installs a handshake verification gate.
    #[must_use]
    pub fn verify_client<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&VerifyInfo) -> bool + Send + Sync + 'static,
    {
        self.verify_client = VerifyClient::new(predicate);
        self
    }

    /// Sets the family label.
    #[must_use]
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = family.into();
        self
    }

    /// Checks every configuration invariant.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant: zero port, empty, relative or
    /// parameterised path, a one-sided TLS pair, or TLS files missing on disk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let route = self.route_path();
        if !route.starts_with('/')
            || route.contains(['{', '}', '*'])
            || route.contains("/:")
        {
            return Err(ConfigError::InvalidPath(self.path.clone()));
        }

        match (&self.tls_cert_path, &self.tls_key_path) {
            (None, None) => {}
            (Some(cert), Some(key)) => {
                if !cert.exists() {
                    return Err(ConfigError::TlsFileMissing {
                        kind: "certificate",
                        path: cert.clone(),
                    });
                }
                if !key.exists() {
                    return Err(ConfigError::TlsFileMissing {
                        kind: "key",
                        path: key.clone(),
                    });
                }
            }
            _ => return Err(ConfigError::IncompleteTls),
        }

        Ok(())
    }

    /// Returns the certificate and key paths when TLS is configured.
    #[must_use]
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Path component of the configured path, without any query string.
    #[must_use]
    pub fn route_path(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` first so a `.env` file is honoured.
    /// `MIMIC_WS_PORT` is required; everything else falls back to the
    /// defaults above.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] when the port is not set,
    /// [`ConfigError::InvalidEnv`] when the port or payload limit cannot be
    /// parsed, and [`ConfigError::NegativeMaxPayload`] for a negative
    /// payload limit.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port_raw =
            std::env::var("MIMIC_WS_PORT").map_err(|_| ConfigError::MissingEnv("MIMIC_WS_PORT"))?;
        let port = port_raw.parse().map_err(|_| ConfigError::InvalidEnv {
            key: "MIMIC_WS_PORT",
            value: port_raw.clone(),
        })?;

        let max_payload_length = match std::env::var("MIMIC_WS_MAX_PAYLOAD") {
            Ok(raw) => {
                let value: i64 = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                    key: "MIMIC_WS_MAX_PAYLOAD",
                    value: raw.clone(),
                })?;
                usize::try_from(value).map_err(|_| ConfigError::NegativeMaxPayload(value))?
            }
            Err(_) => 0,
        };

        let defaults = Self::default();
        let idle_secs: u64 = parse_env("MIMIC_WS_IDLE_TIMEOUT_SECS", 0);

        Ok(Self {
            host: std::env::var("MIMIC_WS_HOST").unwrap_or(defaults.host),
            port,
            path: std::env::var("MIMIC_WS_PATH").unwrap_or(defaults.path),
            max_payload_length,
            max_backpressure: parse_env("MIMIC_WS_MAX_BACKPRESSURE", 0),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            compression: parse_env_bool("MIMIC_WS_COMPRESSION", false),
            tls_cert_path: std::env::var("MIMIC_WS_TLS_CERT").ok().map(PathBuf::from),
            tls_key_path: std::env::var("MIMIC_WS_TLS_KEY").ok().map(PathBuf::from),
            verify_client: VerifyClient::default(),
            family: std::env::var("MIMIC_WS_FAMILY").unwrap_or(defaults.family),
        })
    }
}

/// Whether the demo binary logs JSON (`MIMIC_WS_LOG_JSON`, default
/// `false`). Loads `.env` first, like [`ServerConfig::from_env`].
#[must_use]
pub fn log_json_from_env() -> bool {
    dotenvy::dotenv().ok();
    parse_env_bool("MIMIC_WS_LOG_JSON", false)
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|v| v.to_ascii_lowercase())
        .as_deref()
    {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::new(1337);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.path, "/");
        assert_eq!(config.max_payload_length, 0);
        assert_eq!(config.max_backpressure, 0);
        assert_eq!(config.family, "IPv4");
        assert!(config.idle_timeout.is_none());
        assert!(!config.compression);
        assert!(config.validate().is_ok());
        assert!(config.tls_files().is_none());
    }

    #[test]
    fn zero_port_is_rejected() {
        let Err(err) = ServerConfig::default().validate() else {
            panic!("port 0 must be rejected");
        };
        assert!(matches!(err, ConfigError::InvalidPort));
    }

    #[test]
    fn empty_or_relative_path_is_rejected() {
        let Err(err) = ServerConfig::new(1337).path("").validate() else {
            panic!("empty path must be rejected");
        };
        assert!(matches!(err, ConfigError::InvalidPath(_)));
        assert!(ServerConfig::new(1337).path("foo").validate().is_err());
        assert!(ServerConfig::new(1337).path("/{id}").validate().is_err());
        assert!(ServerConfig::new(1337).path("/ws/*rest").validate().is_err());
        assert!(ServerConfig::new(1337).path("/foobar").validate().is_ok());
    }

    #[test]
    fn one_sided_tls_is_rejected() {
        let mut config = ServerConfig::new(1337);
        config.tls_cert_path = Some(PathBuf::from("cert.pem"));
        let Err(err) = config.validate() else {
            panic!("cert without key must be rejected");
        };
        assert!(matches!(err, ConfigError::IncompleteTls));

        let mut config = ServerConfig::new(1337);
        config.tls_key_path = Some(PathBuf::from("key.pem"));
        assert!(matches!(config.validate(), Err(ConfigError::IncompleteTls)));
    }

    #[test]
    fn missing_tls_files_are_rejected() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");

        let Err(err) = ServerConfig::new(1337).tls(&cert, &key).validate() else {
            panic!("missing cert must be rejected");
        };
        assert!(matches!(err, ConfigError::TlsFileMissing { kind: "certificate", .. }));

        if std::fs::write(&cert, b"cert").is_err() {
            panic!("write cert");
        }
        let Err(err) = ServerConfig::new(1337).tls(&cert, &key).validate() else {
            panic!("missing key must be rejected");
        };
        assert!(matches!(err, ConfigError::TlsFileMissing { kind: "key", .. }));

        if std::fs::write(&key, b"key").is_err() {
            panic!("write key");
        }
        let config = ServerConfig::new(1337).tls(&cert, &key);
        assert!(config.validate().is_ok());
        assert!(config.tls_files().is_some());
    }

    #[test]
    fn route_path_strips_query() {
        assert_eq!(ServerConfig::new(1).path("/foo?x=1").route_path(), "/foo");
        assert_eq!(ServerConfig::new(1).route_path(), "/");
    }

    #[test]
    fn unset_bool_falls_back_to_default() {
        assert!(parse_env_bool("MIMIC_WS_UNSET_FLAG_FOR_TESTS", true));
        assert!(!parse_env_bool("MIMIC_WS_UNSET_FLAG_FOR_TESTS", false));
    }

    #[test]
    fn default_gate_accepts_everyone() {
        let config = ServerConfig::new(1);
        assert!(config.verify_client.verify(&VerifyInfo::default()));

        let config = config.verify_client(|info| info.query == "token=ok");
        assert!(!config.verify_client.verify(&VerifyInfo::default()));
        let info = VerifyInfo {
            query: "token=ok".to_string(),
            ..VerifyInfo::default()
        };
        assert!(config.verify_client.verify(&info));
    }
}
