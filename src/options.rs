//! Connection options and connection-string rendering.

use serde::{Deserialize, Serialize};

/// Fields needed to build a libpq-compatible connection string: `host`,
/// `port`, `db`, `user`, `password`, `ssl_enable`, `ca`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: String,
    pub db: String,
    pub user: String,
    pub password: String,
    pub ssl_enable: bool,
    pub ca: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: "5432".to_string(),
            db: "postgres".to_string(),
            user: String::new(),
            password: String::new(),
            ssl_enable: false,
            ca: None,
        }
    }
}

impl ConnectionOptions {
    pub fn new(host: impl Into<String>, port: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            db: db.into(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn ssl_enable(mut self, enable: bool) -> Self {
        self.ssl_enable = enable;
        self
    }

    pub fn ca(mut self, ca: impl Into<String>) -> Self {
        self.ca = Some(ca.into());
        self
    }

    /// Renders a libpq key=value connection string, e.g.
    /// `host=h port=p dbname=d user=u password=w sslmode=verify-full`.
    ///
    /// Fields that are empty (password, ca) are omitted entirely rather
    /// than emitted as `key=`, since libpq treats an explicit empty value
    /// differently from an absent keyword for some parameters.
    pub fn to_conn_str(&self) -> String {
        let mut parts = vec![
            format!("host={}", escape(&self.host)),
            format!("port={}", escape(&self.port)),
            format!("dbname={}", escape(&self.db)),
        ];
        if !self.user.is_empty() {
            parts.push(format!("user={}", escape(&self.user)));
        }
        if !self.password.is_empty() {
            parts.push(format!("password={}", escape(&self.password)));
        }
        if self.ssl_enable {
            parts.push("sslmode=verify-full".to_string());
            if let Some(ca) = &self.ca {
                parts.push(format!("sslrootcert={}", escape(ca)));
            }
        } else {
            parts.push("sslmode=disable".to_string());
        }
        parts.join(" ")
    }
}

/// libpq connection strings quote values containing whitespace or quotes
/// with single quotes, backslash-escaping embedded quotes/backslashes.
fn escape(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '\\') {
        let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
        format!("'{escaped}'")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_minimal_conn_str() {
        let opts = ConnectionOptions::new("localhost", "5432", "postgres");
        assert_eq!(
            opts.to_conn_str(),
            "host=localhost port=5432 dbname=postgres sslmode=disable"
        );
    }

    #[test]
    fn renders_full_conn_str_with_credentials() {
        let opts = ConnectionOptions::new("db.internal", "5433", "app")
            .user("svc")
            .password("s3cr3t");
        assert_eq!(
            opts.to_conn_str(),
            "host=db.internal port=5433 dbname=app user=svc password=s3cr3t sslmode=disable"
        );
    }

    #[test]
    fn quotes_values_with_whitespace() {
        let opts = ConnectionOptions::new("localhost", "5432", "my db");
        assert!(opts.to_conn_str().contains("dbname='my db'"));
    }

    #[test]
    fn ssl_enable_adds_sslmode_and_rootcert() {
        let opts = ConnectionOptions::new("localhost", "5432", "postgres")
            .ssl_enable(true)
            .ca("/etc/ssl/ca.pem");
        let conn_str = opts.to_conn_str();
        assert!(conn_str.contains("sslmode=verify-full"));
        assert!(conn_str.contains("sslrootcert=/etc/ssl/ca.pem"));
    }

    #[test]
    fn default_matches_documented_defaults() {
        let opts = ConnectionOptions::default();
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.port, "5432");
        assert_eq!(opts.db, "postgres");
    }
}
