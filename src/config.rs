use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub store_timeout_ms: u64,
    pub max_upload_bytes: usize,
    pub session_ttl_hours: i64,
    pub max_db_connections: u32,
}

/// What the process does after loading configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Serve,
    Migrate,
    Reconcile,
    PurgeDeleted { older_than_days: i64 },
    IssueSession { user_id: i64 },
    RevokeSession { token: String },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Cloud drive file service")]
#[command(group(
    ArgGroup::new("mode")
        .args([
            "migrate",
            "reconcile",
            "purge_deleted_older_than_days",
            "issue_session",
            "revoke_session",
        ])
        .multiple(false)
))]
pub struct Args {
    /// Host to bind to (overrides FILE_SERVICE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_SERVICE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where file content is stored (overrides FILE_SERVICE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_SERVICE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Per store call timeout in milliseconds (overrides FILE_SERVICE_STORE_TIMEOUT_MS)
    #[arg(long)]
    pub store_timeout_ms: Option<u64>,

    /// Largest accepted request body (overrides FILE_SERVICE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Report live files whose content is missing, then exit
    #[arg(long)]
    pub reconcile: bool,

    /// Remove content of files deleted more than N days ago, then exit
    #[arg(long, value_name = "DAYS")]
    pub purge_deleted_older_than_days: Option<i64>,

    /// Print a new session token for USER_ID, then exit
    #[arg(long, value_name = "USER_ID")]
    pub issue_session: Option<i64>,

    /// Invalidate a session token, then exit
    #[arg(long, value_name = "TOKEN")]
    pub revoke_session: Option<String>,
}

/// Read `name` from the environment, parsing it, or fall back to `default`.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, Mode)> {
        // --- Environment fallback ---
        let env_host = env::var("FILE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("FILE_SERVICE_PORT", 3000u16)?;
        let env_storage =
            env::var("FILE_SERVICE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FILE_SERVICE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/files.db".into());
        let env_timeout = env_or("FILE_SERVICE_STORE_TIMEOUT_MS", 5_000u64)?;
        let env_max_upload = env_or("FILE_SERVICE_MAX_UPLOAD_BYTES", 64 * 1024 * 1024usize)?;
        let session_ttl_hours = env_or("FILE_SERVICE_SESSION_TTL_HOURS", 30 * 24i64)?;
        let max_db_connections = env_or("FILE_SERVICE_MAX_DB_CONNECTIONS", 5u32)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            store_timeout_ms: args.store_timeout_ms.unwrap_or(env_timeout),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            session_ttl_hours,
            max_db_connections,
        };

        let mode = if args.migrate {
            Mode::Migrate
        } else if args.reconcile {
            Mode::Reconcile
        } else if let Some(days) = args.purge_deleted_older_than_days {
            anyhow::ensure!(days >= 0, "--purge-deleted-older-than-days must not be negative");
            Mode::PurgeDeleted {
                older_than_days: days,
            }
        } else if let Some(user_id) = args.issue_session {
            Mode::IssueSession { user_id }
        } else if let Some(token) = args.revoke_session {
            Mode::RevokeSession { token }
        } else {
            Mode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }
}
