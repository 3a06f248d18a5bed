use crate::{
    models::variant::SizeSpec,
    services::{
        conveyor::{ConveyPolicy, DEFAULT_CACHE_DAYS, DEFAULT_CONCURRENCY},
        retry::RetryPolicy,
        s3_store::S3Settings,
    },
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Which transport backs the conveyor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Backend {
    /// SQLite metadata plus payload files under the storage directory.
    #[default]
    Local,
    S3,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "s3" => Ok(Backend::S3),
            other => bail!("unknown backend `{other}` (expected `local` or `s3`)"),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub bucket: String,
    pub category: Option<String>,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub s3: S3Settings,
    pub policy: ConveyPolicy,
    pub sizes: Vec<SizeSpec>,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for AppConfig {
    // credentials stay out of logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bucket", &self.bucket)
            .field("category", &self.category)
            .field("backend", &self.backend)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("s3_region", &self.s3.region)
            .field("s3_endpoint", &self.s3.endpoint_url)
            .field("policy", &self.policy)
            .field("sizes", &self.sizes.len())
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Conveys files to and from S3-compatible object storage")]
pub struct Args {
    /// Target bucket (overrides CONVEYOR_BUCKET)
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Category path such as `users/42` (overrides CONVEYOR_CATEGORY)
    #[arg(long, global = true)]
    pub category: Option<String>,

    /// Storage backend (overrides CONVEYOR_BACKEND)
    #[arg(long, value_enum, global = true)]
    pub backend: Option<Backend>,

    /// Directory for local payloads (overrides CONVEYOR_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL for local metadata (overrides CONVEYOR_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// S3 region (overrides CONVEYOR_S3_REGION)
    #[arg(long, global = true)]
    pub s3_region: Option<String>,

    /// Custom S3 endpoint (overrides CONVEYOR_S3_ENDPOINT)
    #[arg(long, global = true)]
    pub s3_endpoint: Option<String>,

    /// Use path-style S3 addressing (or CONVEYOR_S3_PATH_STYLE=true)
    #[arg(long, global = true)]
    pub s3_path_style: bool,

    /// Parallel transfers (overrides CONVEYOR_CONCURRENCY)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Upload attempts before giving up (overrides CONVEYOR_MAX_ATTEMPTS)
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Per store call timeout, 0 disables (overrides CONVEYOR_TIMEOUT_SECS)
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Cache lifetime in days (overrides CONVEYOR_CACHE_DAYS)
    #[arg(long, global = true)]
    pub cache_days: Option<u64>,

    /// Emit https URLs (or CONVEYOR_SECURE_URLS=true)
    #[arg(long, global = true)]
    pub secure_urls: bool,

    /// Image size `key=WxH[!][:format]`, repeatable (overrides CONVEYOR_SIZES)
    #[arg(long = "size", global = true)]
    pub sizes: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Upload a local file
    Upload {
        path: PathBuf,
        /// Store under this name instead of the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Upload an image and every configured size
    Image { path: PathBuf },
    /// Fetch an object to a file or stdout
    Download {
        name: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print object metadata as JSON
    Info { name: String },
    /// Exit 0 if the object exists, 1 otherwise
    Exists { name: String },
    /// Delete an object under the current category
    Delete { name: String },
    /// Print the public URL of an object
    Url { name: String },
    /// Mirror a directory to or from the category prefix
    Sync {
        dir: PathBuf,
        #[arg(long)]
        download: bool,
    },
    /// Download an object into a temp file and print its path
    Stash {
        name: String,
        #[arg(long, default_value = "conveyor-")]
        prefix: String,
    },
    /// Run the HTTP server
    Serve {
        /// Host to bind to (overrides CONVEYOR_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to (overrides CONVEYOR_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Apply the local metadata schema and exit
    Migrate,
    /// Create the configured bucket on the local backend
    CreateBucket,
}

impl AppConfig {
    /// Parse CLI args and the process environment.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        let cfg = Self::resolve(&args, |key| env::var(key).ok())?;
        Ok((cfg, args.command))
    }

    /// Merge `args` over the variables `env` yields; CLI values win.
    pub fn resolve(args: &Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let bucket = args
            .bucket
            .clone()
            .or_else(|| var("CONVEYOR_BUCKET"))
            .ok_or_else(|| anyhow!("a bucket is required (--bucket or CONVEYOR_BUCKET)"))?;

        let backend = match args.backend {
            Some(backend) => backend,
            None => var("CONVEYOR_BACKEND")
                .map(|v| v.parse::<Backend>())
                .transpose()
                .context("parsing CONVEYOR_BACKEND")?
                .unwrap_or_default(),
        };

        let concurrency = pick(args.concurrency, &var, "CONVEYOR_CONCURRENCY")?
            .unwrap_or(DEFAULT_CONCURRENCY);
        let max_attempts = pick(args.max_attempts, &var, "CONVEYOR_MAX_ATTEMPTS")?
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let timeout_secs = pick(args.timeout_secs, &var, "CONVEYOR_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let cache_days =
            pick(args.cache_days, &var, "CONVEYOR_CACHE_DAYS")?.unwrap_or(DEFAULT_CACHE_DAYS);
        let cache_secs = cache_days
            .checked_mul(24 * 60 * 60)
            .ok_or_else(|| anyhow!("{cache_days} days does not fit in a duration"))
            .context("CONVEYOR_CACHE_DAYS")?;
        let port = match args.command {
            Command::Serve { port: Some(port), .. } => port,
            _ => pick(None, &var, "CONVEYOR_PORT")?.unwrap_or(3000),
        };
        let host = match &args.command {
            Command::Serve { host: Some(host), .. } => host.clone(),
            _ => var("CONVEYOR_HOST").unwrap_or_else(|| "0.0.0.0".into()),
        };

        let raw_sizes = if args.sizes.is_empty() {
            var("CONVEYOR_SIZES")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default()
        } else {
            args.sizes.clone()
        };
        let sizes = raw_sizes
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<SizeSpec>().with_context(|| format!("parsing size `{s}`")))
            .collect::<Result<Vec<_>>>()?;

        let policy = ConveyPolicy {
            cache_length: Duration::from_secs(cache_secs),
            concurrency: concurrency.max(1),
            retry: RetryPolicy::new(max_attempts, RETRY_BASE_DELAY),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            secure_urls: args.secure_urls || flag(&var, "CONVEYOR_SECURE_URLS"),
            ..ConveyPolicy::default()
        };

        Ok(Self {
            bucket,
            category: args.category.clone().or_else(|| var("CONVEYOR_CATEGORY")),
            backend,
            storage_dir: args
                .storage_dir
                .clone()
                .or_else(|| var("CONVEYOR_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .clone()
                .or_else(|| var("CONVEYOR_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/conveyor.db".into()),
            s3: S3Settings {
                region: args
                    .s3_region
                    .clone()
                    .or_else(|| var("CONVEYOR_S3_REGION"))
                    .unwrap_or_else(|| "us-east-1".into()),
                endpoint_url: args.s3_endpoint.clone().or_else(|| var("CONVEYOR_S3_ENDPOINT")),
                access_key_id: var("CONVEYOR_S3_ACCESS_KEY_ID"),
                secret_access_key: var("CONVEYOR_S3_SECRET_ACCESS_KEY"),
                force_path_style: args.s3_path_style || flag(&var, "CONVEYOR_S3_PATH_STYLE"),
            },
            policy,
            sizes,
            host,
            port,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value if given, else the parsed environment variable.
fn pick<T>(cli: Option<T>, var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if cli.is_some() {
        return Ok(cli);
    }
    var(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", key, value))
        })
        .transpose()
}

fn flag(var: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    var(key).is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
