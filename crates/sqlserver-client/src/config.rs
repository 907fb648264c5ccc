//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use sqlserver_pool::{PoolConfig, RetryPolicy};

/// How the connection negotiates encryption in prelogin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMode {
    /// Encrypt everything; fail if the server cannot.
    #[default]
    Required,
    /// Encrypt the login exchange only, then drop to plaintext.
    LoginOnly,
    /// No TLS at all. Development and trusted networks only: credentials
    /// travel obfuscated, not encrypted.
    Disabled,
}

/// Authentication material for Login7.
#[derive(Clone)]
pub enum Credentials {
    /// SQL Server authentication (username + password).
    SqlPassword {
        /// Login name.
        username: String,
        /// Password.
        password: String,
    },
    /// A token from an external provider, carried opaquely.
    ExternalToken {
        /// The provider token.
        token: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlPassword { username, .. } => f
                .debug_struct("SqlPassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::ExternalToken { .. } => {
                f.debug_struct("ExternalToken").field("token", &"<redacted>").finish()
            }
        }
    }
}

/// Per-stage timeouts.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// TCP connect.
    pub connect: Duration,
    /// TLS handshake.
    pub tls: Duration,
    /// Login exchange.
    pub login: Duration,
    /// Default per-request deadline; `None` waits forever.
    pub request: Option<Duration>,
    /// How long to wait for an attention acknowledgement before the
    /// connection is declared broken.
    pub cancel_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            tls: Duration::from_secs(15),
            login: Duration::from_secs(15),
            request: Some(Duration::from_secs(30)),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Connection and pool configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Initial database; empty uses the login's default.
    pub database: String,
    /// Authentication material.
    pub credentials: Credentials,
    /// Application name reported in Login7.
    pub app_name: String,
    /// Encryption stance.
    pub encryption: EncryptionMode,
    /// Skip server certificate validation (development only).
    pub trust_server_certificate: bool,
    /// Requested packet size (clamped to the protocol's 512..=32767).
    pub packet_size: u32,
    /// Ask for a read-only routing target.
    pub read_only_intent: bool,
    /// How many server routing redirects to follow while connecting.
    pub max_redirects: u8,
    /// Timeout set.
    pub timeouts: Timeouts,
    /// Pool sizing and validation policy.
    pub pool: PoolConfig,
    /// Query run to validate idle connections before hand-off.
    pub validation_query: Arc<str>,
    /// Retry policy for operations submitted through the retrying paths.
    pub retry: RetryPolicy,
}

impl Config {
    /// A configuration for `host` with defaults everywhere else.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1433,
            database: String::new(),
            credentials: Credentials::SqlPassword {
                username: String::new(),
                password: String::new(),
            },
            app_name: String::from("sqlserver-client"),
            encryption: EncryptionMode::default(),
            trust_server_certificate: false,
            packet_size: tds_wire::DEFAULT_PACKET_SIZE as u32,
            read_only_intent: false,
            max_redirects: 2,
            timeouts: Timeouts::default(),
            pool: PoolConfig::default(),
            validation_query: Arc::from("SELECT 1"),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Use SQL Server authentication.
    #[must_use]
    pub fn sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::SqlPassword {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Set the encryption stance.
    #[must_use]
    pub fn encryption(mut self, mode: EncryptionMode) -> Self {
        self.encryption = mode;
        self
    }

    /// Trust any server certificate (development only).
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the idle validation query.
    #[must_use]
    pub fn validation_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.validation_query = query.into();
        self
    }

    /// Check the configuration for obvious mistakes.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.host.is_empty() {
            return Err(crate::error::Error::Config("host must not be empty".into()));
        }
        let size = self.packet_size as usize;
        if !(tds_wire::MIN_PACKET_SIZE..=tds_wire::MAX_PACKET_SIZE).contains(&size) {
            return Err(crate::error::Error::Config(format!(
                "packet_size {size} outside {}..={}",
                tds_wire::MIN_PACKET_SIZE,
                tds_wire::MAX_PACKET_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new("db.example.com");
        assert_eq!(config.port, 1433);
        assert_eq!(config.encryption, EncryptionMode::Required);
        assert_eq!(config.packet_size, 4096);
        config.validate().unwrap();
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let config = Config::new("h").sql_auth("sa", "s3cret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn bad_packet_size_rejected() {
        let mut config = Config::new("h");
        config.packet_size = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_host_rejected() {
        assert!(Config::new("").validate().is_err());
    }
}
