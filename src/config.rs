use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub public_url: String,
    pub link_signing_key: String,
    pub feed_link_hours: u64,
    pub identity_header: String,
    pub request_timeout_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Personal file sharing over an object store")]
pub struct Args {
    /// Host to bind to (overrides SHAREFILE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SHAREFILE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides SHAREFILE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL of the object index (overrides SHAREFILE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Externally visible base URL used in links (overrides SHAREFILE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Secret used to sign download links (overrides SHAREFILE_LINK_SIGNING_KEY)
    #[arg(long)]
    pub link_signing_key: Option<String>,

    /// Lifetime of links in feeds and share pages, in hours (overrides SHAREFILE_FEED_LINK_HOURS)
    #[arg(long)]
    pub feed_link_hours: Option<u64>,

    /// Header carrying the authenticated identity (overrides SHAREFILE_IDENTITY_HEADER)
    #[arg(long)]
    pub identity_header: Option<String>,

    /// Per-request storage deadline in seconds (overrides SHAREFILE_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables visible through `lookup`, then over
    /// the defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let number = |name: &str, default: u64| -> Result<u64> {
            match lookup(name) {
                Some(value) => value
                    .parse::<u64>()
                    .with_context(|| format!("parsing {} value `{}`", name, value)),
                None => Ok(default),
            }
        };

        let env_port = match lookup("SHAREFILE_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing SHAREFILE_PORT value `{}`", value))?,
            None => 8080,
        };

        let cfg = Self {
            host: args.host.unwrap_or_else(|| var("SHAREFILE_HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| var("SHAREFILE_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                var("SHAREFILE_DATABASE_URL", "sqlite://./data/meta/sharefile.db")
            }),
            public_url: args
                .public_url
                .unwrap_or_else(|| var("SHAREFILE_PUBLIC_URL", "http://127.0.0.1:8080")),
            link_signing_key: args
                .link_signing_key
                .unwrap_or_else(|| var("SHAREFILE_LINK_SIGNING_KEY", "")),
            feed_link_hours: match args.feed_link_hours {
                Some(hours) => hours,
                None => number("SHAREFILE_FEED_LINK_HOURS", 1)?,
            },
            identity_header: args
                .identity_header
                .unwrap_or_else(|| var("SHAREFILE_IDENTITY_HEADER", "x-forwarded-email"))
                .to_ascii_lowercase(),
            request_timeout_secs: match args.request_timeout_secs {
                Some(secs) => secs,
                None => number("SHAREFILE_REQUEST_TIMEOUT_SECS", 300)?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.link_signing_key.is_empty() {
            bail!("a link signing key is required (SHAREFILE_LINK_SIGNING_KEY)");
        }
        if self.feed_link_hours == 0 {
            bail!("feed link lifetime must be at least one hour");
        }
        if self.request_timeout_secs == 0 {
            bail!("request timeout must be positive");
        }
        if self.identity_header.is_empty() {
            bail!("identity header name must not be empty");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn feed_link_ttl(&self) -> Duration {
        Duration::from_secs(self.feed_link_hours * 3600)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
