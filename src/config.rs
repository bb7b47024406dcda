use crate::services::upload::{MIB, MIN_PART_SIZE, UploadSettings};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Which `S3Backend` implementation connections are built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// AWS SDK client against the profile's endpoint.
    Aws,
    /// Shared in-process store, for local demos.
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aws" | "s3" => Ok(BackendKind::Aws),
            "memory" => Ok(BackendKind::Memory),
            other => anyhow::bail!("unknown backend `{}` (expected `aws` or `memory`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub secret_key_path: String,
    pub multipart_threshold: usize,
    pub part_size: usize,
    pub part_concurrency: usize,
    pub presign_expiry_secs: u64,
    pub max_upload_bytes: usize,
    pub backend: BackendKind,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "S3-compatible bucket explorer API")]
pub struct Args {
    /// Host to bind to (overrides BUCKET_EXPLORER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKET_EXPLORER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides BUCKET_EXPLORER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Key file used to seal stored secrets (overrides BUCKET_EXPLORER_SECRET_KEY_PATH)
    #[arg(long)]
    pub secret_key_path: Option<String>,

    /// Payloads larger than this many bytes use multipart upload
    #[arg(long)]
    pub multipart_threshold: Option<usize>,

    /// Multipart part size in bytes (at least 5 MiB)
    #[arg(long)]
    pub part_size: Option<usize>,

    /// Parts uploaded concurrently
    #[arg(long)]
    pub part_concurrency: Option<usize>,

    /// Lifetime of presigned download URLs, in seconds
    #[arg(long)]
    pub presign_expiry_secs: Option<u64>,

    /// Largest accepted upload request body, in bytes
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Backend implementation
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` from the environment, parsing it when present.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge `args` over the environment over defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        let defaults = UploadSettings::default();

        // --- Environment fallback ---
        let env_host = env_or("BUCKET_EXPLORER_HOST", "0.0.0.0".to_string())?;
        let env_port = env_or("BUCKET_EXPLORER_PORT", 3000u16)?;
        let env_db = env_or(
            "BUCKET_EXPLORER_DATABASE_URL",
            "sqlite://./data/explorer.db".to_string(),
        )?;
        let env_key = env_or(
            "BUCKET_EXPLORER_SECRET_KEY_PATH",
            "./data/secret.key".to_string(),
        )?;
        let env_threshold =
            env_or("BUCKET_EXPLORER_MULTIPART_THRESHOLD", defaults.multipart_threshold)?;
        let env_part_size = env_or("BUCKET_EXPLORER_PART_SIZE", defaults.part_size)?;
        let env_concurrency =
            env_or("BUCKET_EXPLORER_PART_CONCURRENCY", defaults.part_concurrency)?;
        let env_expiry = env_or("BUCKET_EXPLORER_PRESIGN_EXPIRY_SECS", 3600u64)?;
        let env_max_upload = env_or("BUCKET_EXPLORER_MAX_UPLOAD_BYTES", 5 * 1024 * MIB)?;
        let env_backend = env_or("BUCKET_EXPLORER_BACKEND", BackendKind::Aws)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            secret_key_path: args.secret_key_path.unwrap_or(env_key),
            multipart_threshold: args.multipart_threshold.unwrap_or(env_threshold),
            part_size: args.part_size.unwrap_or(env_part_size),
            part_concurrency: args.part_concurrency.unwrap_or(env_concurrency),
            presign_expiry_secs: args.presign_expiry_secs.unwrap_or(env_expiry),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            backend: args.backend.unwrap_or(env_backend),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upload tuning, with part size and concurrency clamped to usable values.
    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            multipart_threshold: self.multipart_threshold,
            part_size: self.part_size.max(MIN_PART_SIZE),
            part_concurrency: self.part_concurrency.max(1),
        }
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs.max(1))
    }
}
