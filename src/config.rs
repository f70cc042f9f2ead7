use anyhow::{Context, Result, bail};
use clap::Parser;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub queue_name: String,
    pub catalog_table: String,
    pub stock_table: String,
    pub topic: String,
    pub incoming_prefix: String,
    pub processed_prefix: String,
    pub batch_size: usize,
    pub publish_concurrency: usize,
    pub visibility_secs: u64,
    pub op_timeout_secs: u64,
    /// Expected credentials for the access gate, keyed by username.
    /// Required; the service refuses to start without it.
    pub credentials: HashMap<String, String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Catalog import pipeline service")]
pub struct Args {
    /// Host to bind to (overrides CATALOG_IMPORT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CATALOG_IMPORT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides CATALOG_IMPORT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CATALOG_IMPORT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Queue name for per-record messages (overrides CATALOG_IMPORT_QUEUE)
    #[arg(long)]
    pub queue: Option<String>,

    /// Catalog table name (overrides CATALOG_IMPORT_CATALOG_TABLE)
    #[arg(long)]
    pub catalog_table: Option<String>,

    /// Stock table name (overrides CATALOG_IMPORT_STOCK_TABLE)
    #[arg(long)]
    pub stock_table: Option<String>,

    /// Completion notification topic (overrides CATALOG_IMPORT_TOPIC)
    #[arg(long)]
    pub topic: Option<String>,

    /// Key prefix that triggers the import pipeline (overrides CATALOG_IMPORT_INCOMING_PREFIX)
    #[arg(long)]
    pub incoming_prefix: Option<String>,

    /// Key prefix finalized objects move to (overrides CATALOG_IMPORT_PROCESSED_PREFIX)
    #[arg(long)]
    pub processed_prefix: Option<String>,

    /// Maximum messages per consumer batch (overrides CATALOG_IMPORT_BATCH_SIZE)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// In-flight publish limit per file (overrides CATALOG_IMPORT_PUBLISH_CONCURRENCY)
    #[arg(long)]
    pub publish_concurrency: Option<usize>,

    /// Queue visibility timeout in seconds (overrides CATALOG_IMPORT_VISIBILITY_SECS)
    #[arg(long)]
    pub visibility_secs: Option<u64>,

    /// Timeout in seconds for queue/store calls (overrides CATALOG_IMPORT_OP_TIMEOUT_SECS)
    #[arg(long)]
    pub op_timeout_secs: Option<u64>,

    /// Access gate credentials as `user:password[,user:password]`
    /// (overrides CATALOG_IMPORT_CREDENTIALS)
    #[arg(long)]
    pub credentials: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read an optional environment variable and parse it, failing with context
/// on a malformed value rather than silently falling back.
fn env_parsed<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .ok()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

/// Parse `user:password[,user:password...]` into a lookup table.
fn parse_credentials(raw: &str) -> Result<HashMap<String, String>> {
    let mut table = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((user, password)) = pair.split_once(':') else {
            bail!("credential entry `{}` is not in user:password form", pair);
        };
        if user.is_empty() {
            bail!("credential entry with empty username");
        }
        table.insert(user.to_string(), password.to_string());
    }
    if table.is_empty() {
        bail!("credential table is empty");
    }
    Ok(table)
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    ///
    /// Missing required configuration (the credential table) is a startup
    /// failure, never deferred to request time.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::build(args)
    }

    fn build(args: Args) -> Result<(Self, bool)> {
        let credentials_raw = match args.credentials {
            Some(raw) => raw,
            None => env::var("CATALOG_IMPORT_CREDENTIALS")
                .context("CATALOG_IMPORT_CREDENTIALS is required (user:password[,user:password])")?,
        };
        let credentials = parse_credentials(&credentials_raw)?;

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("CATALOG_IMPORT_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => env_parsed("CATALOG_IMPORT_PORT", 3000)?,
            },
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("CATALOG_IMPORT_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_or(
                    "CATALOG_IMPORT_DATABASE_URL",
                    "sqlite://./data/meta/catalog_import.db",
                )
            }),
            queue_name: args
                .queue
                .unwrap_or_else(|| env_or("CATALOG_IMPORT_QUEUE", "catalog-items")),
            catalog_table: args
                .catalog_table
                .unwrap_or_else(|| env_or("CATALOG_IMPORT_CATALOG_TABLE", "catalog_entries")),
            stock_table: args
                .stock_table
                .unwrap_or_else(|| env_or("CATALOG_IMPORT_STOCK_TABLE", "stock_entries")),
            topic: args
                .topic
                .unwrap_or_else(|| env_or("CATALOG_IMPORT_TOPIC", "product-created")),
            incoming_prefix: args
                .incoming_prefix
                .unwrap_or_else(|| env_or("CATALOG_IMPORT_INCOMING_PREFIX", "uploaded")),
            processed_prefix: args
                .processed_prefix
                .unwrap_or_else(|| env_or("CATALOG_IMPORT_PROCESSED_PREFIX", "parsed")),
            batch_size: match args.batch_size {
                Some(n) => n,
                None => env_parsed("CATALOG_IMPORT_BATCH_SIZE", 5)?,
            },
            publish_concurrency: match args.publish_concurrency {
                Some(n) => n,
                None => env_parsed("CATALOG_IMPORT_PUBLISH_CONCURRENCY", 4)?,
            },
            visibility_secs: match args.visibility_secs {
                Some(n) => n,
                None => env_parsed("CATALOG_IMPORT_VISIBILITY_SECS", 30)?,
            },
            op_timeout_secs: match args.op_timeout_secs {
                Some(n) => n,
                None => env_parsed("CATALOG_IMPORT_OP_TIMEOUT_SECS", 10)?,
            },
            credentials,
        };

        if cfg.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if cfg.publish_concurrency == 0 {
            bail!("publish concurrency must be at least 1");
        }
        if cfg.incoming_prefix == cfg.processed_prefix {
            bail!("incoming and processed prefixes must differ");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    pub fn visibility(&self) -> Duration {
        Duration::from_secs(self.visibility_secs)
    }
}
