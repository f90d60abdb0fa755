use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

/// Which remote media store backs listing images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MediaBackend {
    Local,
    Cloudinary,
}

impl FromStr for MediaBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloudinary" => Ok(Self::Cloudinary),
            other => bail!("unknown media backend `{}` (expected `local` or `cloudinary`)", other),
        }
    }
}

/// Cloudinary account settings, present when the cloudinary backend is chosen.
#[derive(Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_base: String,
}

impl fmt::Debug for CloudinaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub upload_dir: String,
    pub max_upload_bytes: u64,
    pub media_backend: MediaBackend,
    pub media_dir: String,
    pub media_base_url: String,
    pub media_folder: String,
    pub cloudinary: Option<CloudinaryConfig>,
    pub remote_timeout: Duration,
    pub db_timeout: Duration,
    pub require_image: bool,
    pub reconcile_interval: Option<Duration>,
    pub reconcile_grace: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Listing service with managed image attachments")]
pub struct Args {
    /// Host to bind to (overrides LISTING_MEDIA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides LISTING_MEDIA_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides LISTING_MEDIA_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory where incoming uploads are staged (overrides LISTING_MEDIA_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Media backend: local or cloudinary (overrides LISTING_MEDIA_BACKEND)
    #[arg(long, value_enum)]
    pub media_backend: Option<MediaBackend>,

    /// Directory for the local media backend (overrides LISTING_MEDIA_DIR)
    #[arg(long)]
    pub media_dir: Option<String>,

    /// Public URL prefix for the local media backend (overrides LISTING_MEDIA_BASE_URL)
    #[arg(long)]
    pub media_base_url: Option<String>,

    /// Remote folder images are stored in (overrides LISTING_MEDIA_FOLDER)
    #[arg(long)]
    pub media_folder: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env_string("LISTING_MEDIA_HOST", "0.0.0.0");
        let env_port = env_or("LISTING_MEDIA_PORT", 3000u16)?;
        let env_db = env_string("LISTING_MEDIA_DATABASE_URL", "sqlite://./data/listings.db");
        let env_uploads = env_string("LISTING_MEDIA_UPLOAD_DIR", "./data/uploads");
        let env_backend = env_or("LISTING_MEDIA_BACKEND", MediaBackend::Local)?;
        let env_media_dir = env_string("LISTING_MEDIA_DIR", "./data/media");
        let env_base_url = env_string("LISTING_MEDIA_BASE_URL", "http://localhost:3000/media");
        let env_folder = env_string("LISTING_MEDIA_FOLDER", "listings");

        let max_upload_bytes = env_or("LISTING_MEDIA_MAX_UPLOAD_BYTES", 10 * 1024 * 1024u64)?;
        let remote_timeout_secs = env_or("LISTING_MEDIA_REMOTE_TIMEOUT_SECS", 30u64)?;
        let db_timeout_secs = env_or("LISTING_MEDIA_DB_TIMEOUT_SECS", 5u64)?;
        let require_image = env_or("LISTING_MEDIA_REQUIRE_IMAGE", true)?;
        let reconcile_interval_secs = env_or("LISTING_MEDIA_RECONCILE_INTERVAL_SECS", 0u64)?;
        let reconcile_grace_secs = env_or("LISTING_MEDIA_RECONCILE_GRACE_SECS", 3600u64)?;

        if remote_timeout_secs == 0 || db_timeout_secs == 0 {
            bail!("timeouts must be at least one second");
        }

        // --- Merge ---
        let media_backend = args.media_backend.unwrap_or(env_backend);
        let cloudinary = match media_backend {
            MediaBackend::Local => None,
            MediaBackend::Cloudinary => Some(CloudinaryConfig {
                cloud_name: env::var("CLOUDINARY_CLOUD_NAME")
                    .context("CLOUDINARY_CLOUD_NAME is required for the cloudinary backend")?,
                api_key: env::var("CLOUDINARY_KEY")
                    .context("CLOUDINARY_KEY is required for the cloudinary backend")?,
                api_secret: env::var("CLOUDINARY_SECRET")
                    .context("CLOUDINARY_SECRET is required for the cloudinary backend")?,
                api_base: env_string("CLOUDINARY_API_BASE", "https://api.cloudinary.com"),
            }),
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            upload_dir: args.upload_dir.unwrap_or(env_uploads),
            max_upload_bytes,
            media_backend,
            media_dir: args.media_dir.unwrap_or(env_media_dir),
            media_base_url: args.media_base_url.unwrap_or(env_base_url),
            media_folder: args.media_folder.unwrap_or(env_folder),
            cloudinary,
            remote_timeout: Duration::from_secs(remote_timeout_secs),
            db_timeout: Duration::from_secs(db_timeout_secs),
            require_image,
            reconcile_interval: (reconcile_interval_secs > 0)
                .then(|| Duration::from_secs(reconcile_interval_secs)),
            reconcile_grace: Duration::from_secs(reconcile_grace_secs),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Cloudinary".parse::<MediaBackend>().unwrap(), MediaBackend::Cloudinary);
        assert_eq!("local".parse::<MediaBackend>().unwrap(), MediaBackend::Local);
        assert!("s3".parse::<MediaBackend>().is_err());
    }

    #[test]
    fn cli_values_override_defaults() {
        let cfg = AppConfig::from_args(Args {
            host: Some("127.0.0.1".into()),
            port: Some(8080),
            media_folder: Some("homes".into()),
            media_backend: Some(MediaBackend::Local),
            ..Args::default()
        })
        .unwrap();

        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.media_folder, "homes");
        assert!(cfg.cloudinary.is_none());
    }

    #[test]
    fn cloudinary_config_debug_hides_secret() {
        let cfg = CloudinaryConfig {
            cloud_name: "demo".into(),
            api_key: "key".into(),
            api_secret: "hunter2".into(),
            api_base: "https://api.cloudinary.com".into(),
        };
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }
}
