//! Core connection type

use super::state::ConnectionState;
use super::tls::{SslMode, TlsConfig};
use super::transport::Transport;
use crate::auth::{AuthStep, Negotiator};
use crate::metrics::{counters, histograms, labels};
use crate::protocol::constants::PROTOCOL_VERSION;
use crate::protocol::{
    decode_message, encode_message, BackendMessage, DbError, Framer, FrontendMessage,
};
use crate::query::{ActiveQuery, QueryResult};
use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Instant;
use tracing::Instrument;

/// Default Postgres port
pub const DEFAULT_PORT: u16 = 5432;

/// Connection configuration
///
/// Immutable once handed to a [`crate::Pool`]. Build it with
/// [`ConnectionConfig::builder`] or parse it from a connection URI.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server hostname or IPv4 address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Username
    pub user: String,
    /// Password (optional)
    pub password: Option<String>,
    /// Database name
    pub database: String,
    /// SSL/TLS mode
    pub sslmode: SslMode,
    /// PEM file of trusted CA certificates for the verifying SSL modes
    pub sslrootcert: Option<String>,
    /// Application name reported to the server
    pub application_name: Option<String>,
    /// Additional startup parameters, sent in order
    pub params: Vec<(String, String)>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("sslmode", &self.sslmode)
            .field("sslrootcert", &self.sslrootcert)
            .field("application_name", &self.application_name)
            .field("params", &self.params)
            .finish()
    }
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    ///
    /// # Defaults
    ///
    /// - `port`: 5432
    /// - `database`: same as `user`
    /// - `sslmode`: `require`
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self::builder(host, user).build()
    }

    /// Create a builder for advanced configuration
    ///
    /// ```
    /// use pgwire_lite::{ConnectionConfig, SslMode};
    ///
    /// let config = ConnectionConfig::builder("db.internal", "bot")
    ///     .password("secret")
    ///     .database("app")
    ///     .sslmode(SslMode::Disable)
    ///     .build();
    /// assert_eq!(config.port, 5432);
    /// ```
    pub fn builder(host: impl Into<String>, user: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: None,
            database: None,
            sslmode: SslMode::default(),
            sslrootcert: None,
            application_name: None,
            params: Vec::new(),
        }
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add startup parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Startup packet parameters, in the order they are sent
    pub fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            ("database".to_string(), self.database.clone()),
            ("client_encoding".to_string(), "UTF8".to_string()),
        ];

        if let Some(app_name) = &self.application_name {
            params.push(("application_name".to_string(), app_name.clone()));
        }

        params.extend(self.params.iter().cloned());
        params
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    database: Option<String>,
    sslmode: SslMode,
    sslrootcert: Option<String>,
    application_name: Option<String>,
    params: Vec<(String, String)>,
}

impl ConnectionConfigBuilder {
    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set database (defaults to the user name)
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set SSL/TLS mode
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.sslmode = mode;
        self
    }

    /// Set the PEM file of trusted CA certificates
    pub fn sslrootcert(mut self, path: impl Into<String>) -> Self {
        self.sslrootcert = Some(path.into());
        self
    }

    /// Set application name reported in `pg_stat_activity`
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Add startup parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        let database = self.database.unwrap_or_else(|| self.user.clone());
        ConnectionConfig {
            host: self.host,
            port: self.port,
            user: self.user,
            password: self.password,
            database,
            sslmode: self.sslmode,
            sslrootcert: self.sslrootcert,
            application_name: self.application_name,
            params: self.params,
        }
    }
}

/// Postgres connection
///
/// Owns the socket and the inbound frame buffer. Queries run one at a time;
/// callers needing concurrency go through [`crate::Pool`].
#[derive(Debug)]
pub struct Connection {
    transport: Option<Transport>,
    state: ConnectionState,
    framer: Framer,
    process_id: Option<i32>,
    secret_key: Option<i32>,
    parameters: HashMap<String, String>,
}

impl Connection {
    fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Connecting,
            framer: Framer::new(),
            process_id: None,
            secret_key: None,
            parameters: HashMap::new(),
        }
    }

    /// Open a socket, negotiate TLS, and authenticate
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        async {
            // Build TLS settings before touching the network so bad config fails fast
            let tls = if config.sslmode.uses_tls() {
                Some(TlsConfig::new(
                    config.sslmode,
                    config.sslrootcert.as_deref(),
                )?)
            } else {
                None
            };

            let transport = Transport::connect_tcp(&config.host, config.port).await?;
            let mut conn = Connection::new(transport);
            if let Some(tls) = &tls {
                conn.negotiate_tls(tls, &config.host).await?;
            }
            conn.startup(config).await?;
            Ok(conn)
        }
        .instrument(tracing::info_span!(
            "connect",
            user = %config.user,
            database = %config.database,
            host = %config.host
        ))
        .await
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Server parameter reported through ParameterStatus (e.g. `server_version`)
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Backend process ID and secret key from BackendKeyData
    pub fn backend_key(&self) -> Option<(i32, i32)> {
        Some((self.process_id?, self.secret_key?))
    }

    /// Whether the socket is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    /// Negotiate TLS upgrade with the server via the SSLRequest protocol.
    ///
    /// Sends the 8-byte SSLRequest message and reads the server's single-byte response.
    /// `S` upgrades the transport; `N` means the server refuses TLS.
    async fn negotiate_tls(&mut self, tls_config: &TlsConfig, hostname: &str) -> Result<()> {
        self.state.transition(ConnectionState::NegotiatingTls)?;
        self.send_message(&FrontendMessage::SslRequest).await?;

        let response = loop {
            if let Some(byte) = self.framer.take_byte() {
                break byte;
            }
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            if transport.read_buf(self.framer.buffer_mut()).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        };

        match response {
            b'S' => {
                // Anything after 'S' arrived unencrypted and cannot be trusted
                if self.framer.buffered() > 0 {
                    return Err(Error::Protocol(
                        "unexpected data after SSLRequest response".into(),
                    ));
                }
                tracing::debug!("server accepted TLS, upgrading connection");
                let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                self.transport = Some(transport.upgrade_to_tls(tls_config, hostname).await?);
                tracing::debug!("TLS connection established");
                Ok(())
            }
            b'N' => Err(Error::Config(format!(
                "server does not support TLS (sslmode={})",
                tls_config.mode()
            ))),
            other => Err(Error::Protocol(format!(
                "unexpected SSLRequest response byte: 0x{:02X}",
                other
            ))),
        }
    }

    /// Send the startup packet and run authentication until ReadyForQuery
    async fn startup(&mut self, config: &ConnectionConfig) -> Result<()> {
        self.state.transition(ConnectionState::Authenticating)?;

        let startup = FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: config.startup_params(),
        };
        self.send_message(&startup).await?;

        let mut negotiator = Negotiator::new(config.user.clone(), config.password.clone());
        let auth_start = Instant::now();
        let result = self.authenticate(&mut negotiator).await;

        let mechanism = negotiator.mechanism().as_str();
        counters::auth_attempted(mechanism);
        match &result {
            Ok(()) => {
                histograms::auth_duration(mechanism, auth_start.elapsed().as_millis() as u64);
                self.state.transition(ConnectionState::Ready)?;
                tracing::info!(
                    mechanism,
                    tls = self.is_tls(),
                    server_version = self.parameter("server_version").unwrap_or("unknown"),
                    "startup complete"
                );
            }
            Err(e) => {
                counters::auth_failed(mechanism, e.category());
                tracing::warn!(mechanism, error = %e, "startup failed");
            }
        }
        result
    }

    /// Handle authentication and the post-auth parameter burst
    async fn authenticate(&mut self, negotiator: &mut Negotiator) -> Result<()> {
        let mut authenticated = false;

        loop {
            let msg = self.receive_message().await?;

            match msg {
                BackendMessage::Authentication(auth) => {
                    if authenticated {
                        return Err(Error::Protocol(
                            "authentication message after AuthenticationOk".into(),
                        ));
                    }
                    match negotiator.handle(auth)? {
                        AuthStep::Respond(reply) => self.send_message(&reply).await?,
                        AuthStep::Wait => {}
                        AuthStep::Authenticated => {
                            tracing::debug!("authentication successful");
                            authenticated = true;
                        }
                    }
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = Some(process_id);
                    self.secret_key = Some(secret_key);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::debug!("parameter status: {} = {}", name, value);
                    self.parameters.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(message = ?notice.message, "notice during startup");
                }
                BackendMessage::ReadyForQuery { .. } if authenticated => return Ok(()),
                BackendMessage::ErrorResponse(err) => return Err(startup_error(&err)),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} during startup",
                        other.name()
                    )));
                }
            }
        }
    }

    /// Run one simple query and assemble its result.
    ///
    /// A backend ErrorResponse yields `Error::Query` and leaves the connection
    /// ready; any other error means the connection is no longer usable.
    pub async fn simple_query(&mut self, sql: &str) -> Result<QueryResult> {
        if !self.state.is_ready() {
            return Err(Error::Protocol(format!(
                "query issued while connection is {}",
                self.state
            )));
        }

        let start = Instant::now();
        let result = self
            .run_query(sql)
            .instrument(tracing::debug_span!("query", sql_len = sql.len()))
            .await;

        histograms::query_duration(start.elapsed().as_millis() as u64);
        match &result {
            Ok(r) => {
                counters::query_completed(labels::STATUS_OK);
                tracing::debug!(command = %r.command, rows = r.row_count, "query complete");
            }
            Err(e) => {
                counters::query_completed(labels::STATUS_ERROR);
                tracing::debug!(error = %e, "query failed");
            }
        }
        result
    }

    async fn run_query(&mut self, sql: &str) -> Result<QueryResult> {
        self.state.transition(ConnectionState::Querying)?;
        self.send_message(&FrontendMessage::Query(sql.to_string()))
            .await?;

        let mut active = ActiveQuery::new();
        loop {
            match self.receive_message().await? {
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                msg => {
                    if active.handle(msg)? {
                        break;
                    }
                }
            }
        }

        self.state.transition(ConnectionState::Ready)?;
        active.finish()
    }

    /// Send a frontend message
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg);
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        transport.write_all(&buf).await?;
        transport.flush().await?;
        Ok(())
    }

    /// Receive a backend message
    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            if let Some(frame) = self.framer.next_frame()? {
                return decode_message(&frame);
            }

            // Need more data
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(self.framer.buffer_mut()).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Send Terminate and shut the socket down
    pub async fn close(mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state.transition(ConnectionState::Closed)?;
        let _ = self.send_message(&FrontendMessage::Terminate).await;
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await?;
        }
        tracing::info!("connection closed");
        Ok(())
    }
}

/// Only class 28 (invalid authorization) is an authentication failure; anything
/// else, such as a missing database, is reported as a connection error
fn startup_error(err: &DbError) -> Error {
    match err.code.as_deref() {
        Some(code) if code.starts_with("28") => Error::Authentication(err.to_string()),
        _ => Error::Connection(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_classification() {
        let auth = DbError {
            code: Some("28P01".into()),
            message: Some("password authentication failed".into()),
            ..DbError::default()
        };
        assert!(matches!(startup_error(&auth), Error::Authentication(ref m) if m.contains("28P01")));

        let missing_db = DbError {
            code: Some("3D000".into()),
            message: Some("database \"nope\" does not exist".into()),
            ..DbError::default()
        };
        assert!(matches!(startup_error(&missing_db), Error::Connection(ref m) if m.contains("3D000")));
    }

    #[test]
    fn test_connection_config() {
        let config = ConnectionConfig::new("localhost", "testuser")
            .password("testpass")
            .param("search_path", "app");

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.user, "testuser");
        assert_eq!(config.database, "testuser");
        assert_eq!(config.password, Some("testpass".to_string()));
        assert_eq!(
            config.params,
            vec![("search_path".to_string(), "app".to_string())]
        );
    }

    #[test]
    fn test_connection_config_builder_fluent() {
        let config = ConnectionConfig::builder("db.internal", "myuser")
            .port(6543)
            .password("secret")
            .database("mydb")
            .sslmode(SslMode::VerifyFull)
            .sslrootcert("/etc/ssl/ca.pem")
            .application_name("test_app")
            .param("key1", "value1")
            .build();

        assert_eq!(config.port, 6543);
        assert_eq!(config.database, "mydb");
        assert_eq!(config.sslmode, SslMode::VerifyFull);
        assert_eq!(config.sslrootcert.as_deref(), Some("/etc/ssl/ca.pem"));
        assert_eq!(config.application_name.as_deref(), Some("test_app"));
    }

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::new("localhost", "user");

        assert!(config.password.is_none());
        assert!(config.application_name.is_none());
        assert!(config.sslrootcert.is_none());
        assert_eq!(config.sslmode, SslMode::Require);
    }

    #[test]
    fn test_startup_params_order() {
        let config = ConnectionConfig::builder("localhost", "bot")
            .database("app")
            .application_name("wallet-bot")
            .param("TimeZone", "UTC")
            .build();

        let keys: Vec<_> = config
            .startup_params()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            ["user", "database", "client_encoding", "application_name", "TimeZone"]
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("localhost", "bot").password("hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ConnectionConfig::builder("127.0.0.1", "bot")
            .port(port)
            .sslmode(SslMode::Disable)
            .build();
        let err = Connection::connect(&config).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_connection_is_send() {
        fn require_send<T: Send>() {}
        require_send::<Connection>();
    }
}
