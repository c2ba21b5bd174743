//! Applies `<version>-<name>.sql` files from a directory in ascending
//! version order, tracking what has already run in a `migrations` table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::options::ConnectionOptions;
use crate::query::Query;
use crate::result::PgResult;
use crate::transaction::TransactionLevel;

const CREATE_MIGRATIONS_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS migrations(
    id SERIAL PRIMARY KEY,
    version integer NOT NULL,
    "timestamp" bigint NOT NULL DEFAULT extract(EPOCH FROM now()),
    name text NOT NULL
);"#;

const LATEST_MIGRATION: &str = "SELECT version FROM migrations ORDER BY id DESC LIMIT 1;";
const RECORD_MIGRATION: &str = "INSERT INTO migrations(version, name) VALUES($1::integer, $2::text);";

struct MigrationRecord {
    version: i32,
    name: String,
    file: PathBuf,
}

fn parse_migration_file(path: &Path) -> Option<MigrationRecord> {
    let filename = path.file_name()?.to_str()?;
    let dash = filename.find('-')?;
    let dot = filename.rfind('.')?;
    if dot <= dash {
        return None;
    }
    let version: i32 = filename[..dash].parse().ok()?;
    let name = filename[dash + 1..dot].to_string();
    Some(MigrationRecord {
        version,
        name,
        file: path.to_path_buf(),
    })
}

/// Runs every migration under a directory not yet recorded in the
/// `migrations` table, in ascending version order, inside one transaction.
pub struct Migrator {
    opts: ConnectionOptions,
    migrations: BTreeMap<i32, MigrationRecord>,
}

impl Migrator {
    /// Scans `migrations_dir` for `<version>-<name>.sql` files. Entries
    /// that don't match the naming convention are skipped.
    pub async fn new(opts: ConnectionOptions, migrations_dir: impl AsRef<Path>) -> Result<Self> {
        let migrations_dir = migrations_dir.as_ref();
        let metadata = tokio::fs::metadata(migrations_dir).await.map_err(|_| {
            Error::InvalidMigrationsDir {
                path: migrations_dir.display().to_string(),
            }
        })?;
        if !metadata.is_dir() {
            return Err(Error::InvalidMigrationsDir {
                path: migrations_dir.display().to_string(),
            });
        }

        let mut migrations = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(migrations_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(record) = parse_migration_file(&entry.path()) {
                migrations.insert(record.version, record);
            }
        }

        Ok(Self { opts, migrations })
    }

    /// Connects, ensures the `migrations` table exists, and applies every
    /// migration newer than the highest recorded version.
    pub async fn run(&self) -> Result<()> {
        let mut conn = Connection::new(self.opts.to_conn_str());
        conn.connect().await?;

        let create_results = conn.query(&Query::new(CREATE_MIGRATIONS_TABLE)).await?;
        ensure_success(&create_results)?;

        conn.transaction(TransactionLevel::Serializable, async move |conn: &mut Connection| {
            let mut results = conn.query(&Query::new(LATEST_MIGRATION)).await?;
            ensure_success(&results)?;

            let latest_applied: Option<i32> = match results.first_mut() {
                Some(result) if result.row_count() > 0 => Some(result.row(0).get_by_name("version")?),
                _ => None,
            };

            self.apply_from(conn, latest_applied).await
        })
        .await
    }

    async fn apply_from(&self, conn: &mut Connection, after: Option<i32>) -> Result<()> {
        let pending = self
            .migrations
            .range(after.map(|v| v + 1).unwrap_or(i32::MIN)..);
        for (version, record) in pending {
            tracing::info!(version, name = %record.name, "running migration");
            let sql = tokio::fs::read_to_string(&record.file).await?;
            let results = conn.query(&Query::new(sql)).await?;
            ensure_success(&results)?;

            let save_results = conn
                .query_with(RECORD_MIGRATION, (*version, record.name.clone()))
                .await?;
            ensure_success(&save_results)?;
            tracing::info!(version, name = %record.name, "migration applied");
        }
        Ok(())
    }
}

fn ensure_success(results: &[PgResult]) -> Result<()> {
    match results.first() {
        Some(result) if result.is_succeed() => Ok(()),
        Some(result) => {
            let message = result.error_message().unwrap_or_default();
            tracing::error!(%message, "migration query failed");
            Err(Error::query_failed(message))
        }
        None => Err(Error::query_failed("migration query returned no result")),
    }
}
