//! Connection target parsed from a database URL.

use crate::error::{SnapshotError, SnapshotResult};
use percent_encoding::percent_decode_str;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use url::Url;

const DEFAULT_PORT: u16 = 5432;

/// PostgreSQL connection details split into the pieces the command-line
/// tools expect. The password never leaves a [`SecretString`].
pub struct ConnectionTarget {
    url: SecretString,
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<SecretString>,
    database: String,
    ssl_mode: Option<String>,
}

impl ConnectionTarget {
    /// Parse a `postgres://` or `postgresql://` URL
    pub fn parse(url: &SecretString) -> SnapshotResult<Self> {
        let raw = url.expose_secret();
        let parsed = Url::parse(raw)
            .map_err(|e| SnapshotError::Configuration(format!("database URL is malformed: {e}")))?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(SnapshotError::Configuration(format!(
                "unsupported database scheme '{}'",
                parsed.scheme()
            )));
        }

        let database = decode(parsed.path().trim_start_matches('/'))?;
        if database.is_empty() {
            return Err(SnapshotError::Configuration(
                "database URL does not name a database".to_string(),
            ));
        }

        let username = match parsed.username() {
            "" => None,
            name => Some(decode(name)?),
        };
        let password = parsed
            .password()
            .map(decode)
            .transpose()?
            .map(SecretString::from);
        let ssl_mode = parsed
            .query_pairs()
            .find(|(key, _)| key == "sslmode")
            .map(|(_, value)| value.into_owned());

        Ok(Self {
            url: SecretString::from(raw.to_string()),
            host: parsed.host_str().unwrap_or("localhost").to_string(),
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            username,
            password,
            database,
            ssl_mode,
        })
    }

    /// Full URL including credentials
    pub fn url(&self) -> &SecretString {
        &self.url
    }

    /// Server host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Login role, if the URL names one
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Database name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Connection arguments shared by `pg_dump` and `psql`
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--dbname".to_string(),
            self.database.clone(),
        ];
        if let Some(user) = &self.username {
            args.push("--username".to_string());
            args.push(user.clone());
        }
        args
    }

    /// Environment for the command-line tools. Credentials go through
    /// `PGPASSWORD` so they never show up in the process table.
    pub fn cli_env(&self) -> Vec<(&'static str, String)> {
        let mut env = Vec::new();
        if let Some(password) = &self.password {
            env.push(("PGPASSWORD", password.expose_secret().to_string()));
        }
        if let Some(mode) = &self.ssl_mode {
            env.push(("PGSSLMODE", mode.clone()));
        }
        env
    }

    /// Remove the password from tool output before it is logged
    pub fn scrub(&self, text: &str) -> String {
        match &self.password {
            Some(password) if !password.expose_secret().is_empty() => {
                text.replace(password.expose_secret(), "***")
            }
            _ => text.to_string(),
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(user) => write!(
                f,
                "postgres://{user}@{}:{}/{}",
                self.host, self.port, self.database
            ),
            None => write!(f, "postgres://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("target", &self.to_string())
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn decode(component: &str) -> SnapshotResult<String> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| SnapshotError::Configuration(format!("database URL is not valid UTF-8: {e}")))
}
