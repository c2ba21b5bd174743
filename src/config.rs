//! Loads `ConnectionOptions` from a JSON config file.
//!
//! Kept deliberately small: a single `serde_json`-backed struct mirroring
//! `ConnectionOptions`, with the same defaults, read from disk through
//! `tokio::fs` so callers never block the runtime on config load.

use serde::Deserialize;

use crate::error::Result;
use crate::options::ConnectionOptions;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    host: String,
    port: String,
    db: String,
    user: String,
    password: String,
    ssl_enable: bool,
    ca: Option<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        let defaults = ConnectionOptions::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            db: defaults.db,
            user: defaults.user,
            password: defaults.password,
            ssl_enable: defaults.ssl_enable,
            ca: defaults.ca,
        }
    }
}

impl From<RawConfig> for ConnectionOptions {
    fn from(raw: RawConfig) -> Self {
        let mut opts = ConnectionOptions::new(raw.host, raw.port, raw.db)
            .user(raw.user)
            .password(raw.password)
            .ssl_enable(raw.ssl_enable);
        if let Some(ca) = raw.ca {
            opts = opts.ca(ca);
        }
        opts
    }
}

/// Reads `path` as JSON and returns the `ConnectionOptions` it describes.
/// Any field the file omits falls back to `ConnectionOptions::default()`.
pub async fn load_connection_options(path: impl AsRef<std::path::Path>) -> Result<ConnectionOptions> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path).await?;
    let raw: RawConfig = serde_json::from_str(&contents)?;
    tracing::info!(path = %path.display(), "loaded connection config");
    Ok(raw.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_fields_fall_back_to_defaults() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("pgcore-config-test-{}.json", crate::ids::next_connection_id()));
        tokio::fs::write(&path, r#"{"host": "db.internal"}"#).await.unwrap();

        let opts = load_connection_options(&path).await.unwrap();
        assert_eq!(opts.host, "db.internal");
        assert_eq!(opts.port, "5432");
        assert_eq!(opts.db, "postgres");

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn full_config_round_trips() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("pgcore-config-test-full-{}.json", crate::ids::next_connection_id()));
        tokio::fs::write(
            &path,
            r#"{"host":"db","port":"6543","db":"app","user":"alice","password":"secret","ssl_enable":true,"ca":"/etc/ca.pem"}"#,
        )
        .await
        .unwrap();

        let opts = load_connection_options(&path).await.unwrap();
        assert_eq!(opts.user, "alice");
        assert!(opts.ssl_enable);
        assert_eq!(opts.ca.as_deref(), Some("/etc/ca.pem"));

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
