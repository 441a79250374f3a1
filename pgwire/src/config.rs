//! Configuration for a probing session
//!
//! Settings come from code, from a config file (TOML, JSON or YAML, picked
//! by extension) overlaid with `PGPROBE_*` environment variables, or from
//! the `pgprobe` command line.

use crate::error::{PgWireError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use wireprobe_core::Deadline;

/// Prefix of the environment variables that override file settings
pub const ENV_PREFIX: &str = "PGPROBE";

fn default_port() -> u16 {
    5432
}

fn default_application_name() -> String {
    "wireprobe".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

fn default_listen_window_ms() -> u64 {
    5_000
}

fn default_max_message_len() -> usize {
    64 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

/// Session configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server host name or address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Role to authenticate as
    pub user: String,

    /// Password, needed unless the server trusts the connection
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Database to connect to (the server defaults it to the user name)
    #[serde(default)]
    pub database: Option<String>,

    /// `application_name` startup parameter
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Extra startup parameters such as `search_path` or `TimeZone`
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    /// Budget for connecting and authenticating
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Budget for one query or describe
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// How long `listen` collects notifications
    #[serde(default = "default_listen_window_ms")]
    pub listen_window_ms: u64,

    /// Largest message length accepted from the server
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Fail SCRAM authentication when the server signature does not match
    #[serde(default = "default_true")]
    pub verify_server_signature: bool,
}

impl SessionConfig {
    /// Configuration with defaults for everything but host and user
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            password: None,
            database: None,
            application_name: default_application_name(),
            options: BTreeMap::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            listen_window_ms: default_listen_window_ms(),
            max_message_len: default_max_message_len(),
            verify_server_signature: true,
        }
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Load configuration from a file, then apply `PGPROBE_*` overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;

        let config: SessionConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no session could work with
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(PgWireError::Config("host must not be empty".to_string()));
        }
        if self.user.is_empty() {
            return Err(PgWireError::Config("user must not be empty".to_string()));
        }
        if self.connect_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(PgWireError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.max_message_len < 4 {
            return Err(PgWireError::Config(format!(
                "max_message_len {} is too small",
                self.max_message_len
            )));
        }
        Ok(())
    }

    /// Parameters for the startup message, in the order they are sent
    pub fn startup_parameters(&self) -> Vec<(String, String)> {
        let mut parameters = vec![("user".to_string(), self.user.clone())];
        if let Some(database) = &self.database {
            parameters.push(("database".to_string(), database.clone()));
        }
        parameters.push(("application_name".to_string(), self.application_name.clone()));
        parameters.push(("client_encoding".to_string(), "UTF8".to_string()));

        for (key, value) in &self.options {
            if !parameters.iter().any(|(existing, _)| existing == key) {
                parameters.push((key.clone(), value.clone()));
            }
        }
        parameters
    }

    /// Deadline covering connect plus authentication, starting now
    pub fn connect_deadline(&self) -> Deadline {
        Deadline::after_millis(self.connect_timeout_ms)
    }

    /// Deadline for one query or describe, starting now
    pub fn operation_deadline(&self) -> Deadline {
        Deadline::after_millis(self.operation_timeout_ms)
    }

    /// Default notification collection window
    pub fn listen_window(&self) -> Duration {
        Duration::from_millis(self.listen_window_ms)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("application_name", &self.application_name)
            .field("options", &self.options)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .field("listen_window_ms", &self.listen_window_ms)
            .field("max_message_len", &self.max_message_len)
            .field("verify_server_signature", &self.verify_server_signature)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_new_uses_defaults() {
        let config = SessionConfig::new("db.internal", "probe");
        assert_eq!(config.port, 5432);
        assert_eq!(config.application_name, "wireprobe");
        assert_eq!(config.max_message_len, 64 * 1024 * 1024);
        assert!(config.verify_server_signature);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
host = "10.0.0.5"
port = 6543
user = "reporter"
password = "s3cret"
database = "analytics"
listen_window_ms = 250

[options]
search_path = "reporting"
"#
        )
        .unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 6543);
        assert_eq!(config.password.as_deref(), Some("s3cret"));
        assert_eq!(config.listen_window(), Duration::from_millis(250));
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.options.get("search_path").map(String::as_str), Some("reporting"));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"host": "localhost", "user": "app", "verify_server_signature": false}}"#)
            .unwrap();

        let config = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.user, "app");
        assert!(!config.verify_server_signature);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "host = \"\"\nuser = \"app\"").unwrap();
        assert!(matches!(
            SessionConfig::from_file(file.path()),
            Err(PgWireError::Config(_))
        ));

        assert!(matches!(
            SessionConfig::from_file("/nonexistent/pgprobe.toml"),
            Err(PgWireError::Config(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = SessionConfig::new("localhost", "");
        assert!(config.validate().is_err());

        config.user = "app".to_string();
        config.operation_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_startup_parameters_order() {
        let mut config = SessionConfig::new("localhost", "app").with_database("orders");
        config.options.insert("TimeZone".to_string(), "UTC".to_string());
        config.options.insert("user".to_string(), "ignored".to_string());

        let keys: Vec<_> = config
            .startup_parameters()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec!["user", "database", "application_name", "client_encoding", "TimeZone"]
        );
    }

    #[test]
    fn test_password_is_never_shown() {
        let config = SessionConfig::new("localhost", "app").with_password("hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
        assert!(!serde_json::to_string(&config).unwrap().contains("hunter2"));
    }
}
