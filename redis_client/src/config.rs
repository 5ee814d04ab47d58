//! `ClientConfig` (component K): the fields in the configuration table,
//! buildable either through setters, by loading a TOML file in the
//! teacher's `config_parser` style, or by layering `REDIS_CLIENT_*`
//! environment overrides. Precedence is defaults < file < environment <
//! explicit setters applied after the load.
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{ClientError, ClientErrorKind, ClientResult};
use crate::hooks::{ConnectHook, DisconnectHook};

/// Runs after the built-in socket tuning (§4.C), so callers can apply
/// options the library has no opinion on.
pub type SocketConfigurator = Arc<dyn Fn(&TcpStream) + Send + Sync>;

/// TLS sub-configuration (OpenSSL-compatible options).
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub ca_file: Option<String>,
    pub ca_dir: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub dh_params_file: Option<String>,
    pub cipher_list: Option<String>,
    pub cipher_suites: Option<String>,
    pub sni_hostname: Option<String>,
    pub verify_peer: bool,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
struct FileConfig {
    db: Option<i64>,
    username: Option<String>,
    password: Option<String>,
    socket_timeout_ms: Option<u64>,
    tcp_buffer_size: Option<usize>,
    protocol_version: Option<u8>,
    hello: Option<bool>,
    scan_count: Option<u32>,
    tls: TlsConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            db: None,
            username: None,
            password: None,
            socket_timeout_ms: None,
            tcp_buffer_size: None,
            protocol_version: None,
            hello: None,
            scan_count: None,
            tls: TlsConfig::default(),
        }
    }
}

/// Per-server configuration. Callbacks (socket configurator, pipeline
/// consumer, push consumer, transmit-error handler) and hooks are not part
/// of the file format; they are only ever set programmatically.
#[derive(Clone)]
pub struct ClientConfig {
    pub db: i64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub socket_timeout_ms: u64,
    pub tcp_buffer_size: Option<usize>,
    pub protocol_version: u8,
    pub hello: bool,
    pub scan_count: u32,
    pub tls: TlsConfig,
    pub(crate) socket_configurator: Option<SocketConfigurator>,
    pub(crate) connect_hooks: Vec<ConnectHook>,
    pub(crate) disconnect_hooks: Vec<DisconnectHook>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            db: 0,
            username: None,
            password: None,
            socket_timeout_ms: 5_000,
            tcp_buffer_size: None,
            protocol_version: 2,
            hello: false,
            scan_count: 10,
            tls: TlsConfig::default(),
            socket_configurator: None,
            connect_hooks: Vec::new(),
            disconnect_hooks: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_auth(mut self, username: Option<String>, password: String) -> Self {
        self.username = username;
        self.password = Some(password);
        self
    }

    pub fn with_socket_timeout_ms(mut self, ms: u64) -> Self {
        self.socket_timeout_ms = ms;
        self
    }

    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_hello(mut self, hello: bool) -> Self {
        self.hello = hello;
        self
    }

    pub fn with_scan_count(mut self, count: u32) -> Self {
        self.scan_count = count;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Installs a hook run once per connection after the built-in socket
    /// tuning (read/write timeouts, linger, keepalive, nodelay).
    pub fn with_socket_configurator<F>(mut self, configurator: F) -> Self
    where
        F: Fn(&TcpStream) + Send + Sync + 'static,
    {
        self.socket_configurator = Some(Arc::new(configurator));
        self
    }

    /// Layers `REDIS_CLIENT_*` environment variables over the current
    /// values, meant to run between a file load and any explicit setters
    /// called afterward (precedence: defaults < file < environment <
    /// setters applied after this call).
    pub fn apply_env(mut self) -> ClientResult<Self> {
        if let Ok(v) = std::env::var("REDIS_CLIENT_DB") {
            self.db = v
                .parse()
                .map_err(|_| ClientError::new(ClientErrorKind::ParseError, "REDIS_CLIENT_DB is not an integer"))?;
        }
        if let Ok(v) = std::env::var("REDIS_CLIENT_SOCKET_TIMEOUT_MS") {
            let timeout: u64 = v.parse().map_err(|_| {
                ClientError::new(ClientErrorKind::ParseError, "REDIS_CLIENT_SOCKET_TIMEOUT_MS is not a u64")
            })?;
            if timeout == 0 {
                return Err(ClientError::new(
                    ClientErrorKind::SizeInvalid,
                    "REDIS_CLIENT_SOCKET_TIMEOUT_MS must be nonzero",
                ));
            }
            self.socket_timeout_ms = timeout;
        }
        if let Ok(v) = std::env::var("REDIS_CLIENT_PROTOCOL_VERSION") {
            let version: u8 = v.parse().map_err(|_| {
                ClientError::new(ClientErrorKind::ParseError, "REDIS_CLIENT_PROTOCOL_VERSION is not a u8")
            })?;
            if version != 2 && version != 3 {
                return Err(ClientError::new(
                    ClientErrorKind::SizeInvalid,
                    "REDIS_CLIENT_PROTOCOL_VERSION must be 2 or 3",
                ));
            }
            self.protocol_version = version;
        }
        if let Ok(v) = std::env::var("REDIS_CLIENT_USERNAME") {
            self.username = Some(v);
        }
        if let Ok(v) = std::env::var("REDIS_CLIENT_PASSWORD") {
            self.password = Some(v);
        }
        Ok(self)
    }

    /// Loads a TOML file and layers its fields over `self`'s current
    /// values, validating ranges before applying them. Unset fields in the
    /// file leave `self`'s existing value (defaults, or earlier setters)
    /// untouched; setters called after this return take precedence.
    pub fn load_file(mut self, path: impl AsRef<Path>) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ClientError::from_io(ClientErrorKind::NoInit, e))?;
        let file: FileConfig = toml::from_str(&text)
            .map_err(|e| ClientError::new(ClientErrorKind::ParseError, e.to_string()))?;

        if let Some(timeout) = file.socket_timeout_ms {
            if timeout == 0 {
                return Err(ClientError::new(
                    ClientErrorKind::SizeInvalid,
                    "socket_timeout_ms must be nonzero",
                ));
            }
            self.socket_timeout_ms = timeout;
        }
        if let Some(version) = file.protocol_version {
            if version != 2 && version != 3 {
                return Err(ClientError::new(
                    ClientErrorKind::SizeInvalid,
                    "protocol_version must be 2 or 3",
                ));
            }
            self.protocol_version = version;
        }
        if let Some(db) = file.db {
            self.db = db;
        }
        if file.username.is_some() {
            self.username = file.username;
        }
        if file.password.is_some() {
            self.password = file.password;
        }
        if let Some(size) = file.tcp_buffer_size {
            self.tcp_buffer_size = Some(size);
        }
        if let Some(hello) = file.hello {
            self.hello = hello;
        }
        if let Some(count) = file.scan_count {
            self.scan_count = count;
        }
        self.tls = file.tls;

        Ok(self)
    }
}
