use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr};
use uuid::Uuid;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Directory published thumbnails are written to and served from.
    pub assets_dir: String,
    /// Parent of the per-process scratch directory.
    pub scratch_root: String,
    /// Externally reachable origin, used to build thumbnail URLs.
    pub public_base_url: String,
    pub jwt_secret: String,
    pub s3_bucket: String,
    pub s3_region: String,
    /// Custom S3 endpoint (MinIO, LocalStack). Enables path-style addressing.
    pub s3_endpoint: Option<String>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub max_video_bytes: u64,
    pub max_thumbnail_bytes: u64,
    pub max_form_field_bytes: u64,
    pub signed_url_ttl_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Tubely video ingest service")]
pub struct Args {
    /// Host to bind to (overrides TUBELY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TUBELY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides TUBELY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Thumbnail directory (overrides TUBELY_ASSETS_DIR)
    #[arg(long)]
    pub assets_dir: Option<String>,

    /// Scratch parent directory (overrides TUBELY_SCRATCH_ROOT)
    #[arg(long)]
    pub scratch_root: Option<String>,

    /// Public origin (overrides TUBELY_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// S3 bucket for videos (overrides TUBELY_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// S3 region (overrides TUBELY_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// S3 endpoint for compatible stores (overrides TUBELY_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// ffmpeg binary (overrides TUBELY_FFMPEG_PATH)
    #[arg(long)]
    pub ffmpeg_path: Option<String>,

    /// ffprobe binary (overrides TUBELY_FFPROBE_PATH)
    #[arg(long)]
    pub ffprobe_path: Option<String>,

    /// Video upload ceiling in bytes (overrides TUBELY_MAX_VIDEO_BYTES)
    #[arg(long)]
    pub max_video_bytes: Option<u64>,

    /// Thumbnail upload ceiling in bytes (overrides TUBELY_MAX_THUMBNAIL_BYTES)
    #[arg(long)]
    pub max_thumbnail_bytes: Option<u64>,

    /// Ceiling for non-file form fields in bytes (overrides TUBELY_MAX_FORM_FIELD_BYTES)
    #[arg(long)]
    pub max_form_field_bytes: Option<u64>,

    /// Signed URL lifetime in seconds (overrides TUBELY_SIGNED_URL_TTL_SECS)
    #[arg(long)]
    pub signed_url_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Run migrations before serving
    #[arg(long)]
    pub auto_migrate: bool,

    /// Print an access token for this user id and exit
    #[arg(long, value_name = "USER_ID")]
    pub issue_token: Option<Uuid>,
}

/// What the binary should do once configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunMode {
    /// Apply migrations and exit.
    pub migrate_only: bool,
    /// Apply migrations, then serve.
    pub auto_migrate: bool,
    /// Mint a token for this user and exit.
    pub issue_token: Option<Uuid>,
}

const MAX_SIGNED_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flags.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        // Parse CLI once
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name))
    }

    /// Merge `args` over variables read through `lookup` over defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<(Self, RunMode)>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let text = |name: &str, default: &str| -> Result<String> {
            match lookup(name) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let optional = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) if value.trim().is_empty() => Ok(None),
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let number = |name: &str, default: u64| -> Result<u64> { parse_var(&lookup, name, default) };

        // --- Environment fallback ---
        let env_port = parse_var(&lookup, "TUBELY_PORT", 8091u16)?;
        let jwt_secret = optional("TUBELY_JWT_SECRET")?
            .context("TUBELY_JWT_SECRET must be set")?;

        // --- Merge ---
        let cfg = Self {
            host: match args.host {
                Some(host) => host,
                None => text("TUBELY_HOST", "0.0.0.0")?,
            },
            port: args.port.unwrap_or(env_port),
            database_url: match args.database_url {
                Some(url) => url,
                None => text("TUBELY_DATABASE_URL", "sqlite://./data/tubely.db")?,
            },
            assets_dir: match args.assets_dir {
                Some(dir) => dir,
                None => text("TUBELY_ASSETS_DIR", "./data/assets")?,
            },
            scratch_root: match args.scratch_root {
                Some(dir) => dir,
                None => text("TUBELY_SCRATCH_ROOT", &env::temp_dir().to_string_lossy())?,
            },
            public_base_url: match args.public_base_url {
                Some(url) => url,
                None => text("TUBELY_PUBLIC_BASE_URL", "http://localhost:8091")?,
            },
            jwt_secret,
            s3_bucket: match args.s3_bucket {
                Some(bucket) => bucket,
                None => text("TUBELY_S3_BUCKET", "tubely-media")?,
            },
            s3_region: match args.s3_region {
                Some(region) => region,
                None => text("TUBELY_S3_REGION", "us-east-1")?,
            },
            s3_endpoint: match args.s3_endpoint {
                Some(endpoint) => Some(endpoint),
                None => optional("TUBELY_S3_ENDPOINT")?,
            },
            ffmpeg_path: match args.ffmpeg_path {
                Some(path) => path,
                None => text("TUBELY_FFMPEG_PATH", "ffmpeg")?,
            },
            ffprobe_path: match args.ffprobe_path {
                Some(path) => path,
                None => text("TUBELY_FFPROBE_PATH", "ffprobe")?,
            },
            max_video_bytes: match args.max_video_bytes {
                Some(limit) => limit,
                None => number("TUBELY_MAX_VIDEO_BYTES", 1 << 30)?,
            },
            max_thumbnail_bytes: match args.max_thumbnail_bytes {
                Some(limit) => limit,
                None => number("TUBELY_MAX_THUMBNAIL_BYTES", 10 << 20)?,
            },
            max_form_field_bytes: match args.max_form_field_bytes {
                Some(limit) => limit,
                None => number("TUBELY_MAX_FORM_FIELD_BYTES", 10 << 20)?,
            },
            signed_url_ttl_secs: match args.signed_url_ttl_secs {
                Some(ttl) => ttl,
                None => number("TUBELY_SIGNED_URL_TTL_SECS", 15 * 60)?,
            },
        };

        if cfg.signed_url_ttl_secs == 0 || cfg.signed_url_ttl_secs > MAX_SIGNED_URL_TTL_SECS {
            bail!(
                "signed URL TTL must be between 1 and {} seconds, got {}",
                MAX_SIGNED_URL_TTL_SECS,
                cfg.signed_url_ttl_secs
            );
        }

        let mode = RunMode {
            migrate_only: args.migrate,
            auto_migrate: args.auto_migrate,
            issue_token: args.issue_token,
        };
        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("assets_dir", &self.assets_dir)
            .field("scratch_root", &self.scratch_root)
            .field("public_base_url", &self.public_base_url)
            .field("jwt_secret", &"<redacted>")
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_region", &self.s3_region)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("ffmpeg_path", &self.ffmpeg_path)
            .field("ffprobe_path", &self.ffprobe_path)
            .field("max_video_bytes", &self.max_video_bytes)
            .field("max_thumbnail_bytes", &self.max_thumbnail_bytes)
            .field("max_form_field_bytes", &self.max_form_field_bytes)
            .field("signed_url_ttl_secs", &self.signed_url_ttl_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let (cfg, mode) =
            AppConfig::resolve(Args::default(), env_of(&[("TUBELY_JWT_SECRET", "s")])).unwrap();
        assert_eq!(cfg.port, 8091);
        assert_eq!(cfg.s3_bucket, "tubely-media");
        assert_eq!(cfg.s3_region, "us-east-1");
        assert_eq!(cfg.s3_endpoint, None);
        assert_eq!(cfg.max_video_bytes, 1 << 30);
        assert_eq!(cfg.max_thumbnail_bytes, 10 << 20);
        assert_eq!(cfg.signed_url_ttl_secs, 900);
        assert_eq!(mode, RunMode::default());
    }

    #[test]
    fn secret_is_required() {
        let err = AppConfig::resolve(Args::default(), env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("TUBELY_JWT_SECRET"));
    }

    #[test]
    fn args_override_environment() {
        let args = Args {
            port: Some(9000),
            s3_bucket: Some("cli-bucket".into()),
            auto_migrate: true,
            ..Args::default()
        };
        let (cfg, mode) = AppConfig::resolve(
            args,
            env_of(&[
                ("TUBELY_JWT_SECRET", "s"),
                ("TUBELY_PORT", "7000"),
                ("TUBELY_S3_BUCKET", "env-bucket"),
                ("TUBELY_S3_ENDPOINT", "http://localhost:9000"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.s3_bucket, "cli-bucket");
        assert_eq!(cfg.s3_endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(mode.auto_migrate);
        assert!(!mode.migrate_only);
    }

    #[test]
    fn form_field_ceiling_flag_beats_environment() {
        let (cfg, _) = AppConfig::resolve(
            Args::default(),
            env_of(&[("TUBELY_JWT_SECRET", "s"), ("TUBELY_MAX_FORM_FIELD_BYTES", "2048")]),
        )
        .unwrap();
        assert_eq!(cfg.max_form_field_bytes, 2048);

        let args = Args {
            max_form_field_bytes: Some(512),
            ..Args::default()
        };
        let (cfg, _) = AppConfig::resolve(
            args,
            env_of(&[("TUBELY_JWT_SECRET", "s"), ("TUBELY_MAX_FORM_FIELD_BYTES", "2048")]),
        )
        .unwrap();
        assert_eq!(cfg.max_form_field_bytes, 512);
    }

    #[test]
    fn issue_token_flag_parses_user_id() {
        let user = Uuid::new_v4();
        let id = user.to_string();
        let args = Args::parse_from(["tubely", "--issue-token", id.as_str()]);
        let (_, mode) = AppConfig::resolve(args, env_of(&[("TUBELY_JWT_SECRET", "s")])).unwrap();
        assert_eq!(mode.issue_token, Some(user));
        assert!(!mode.migrate_only);

        assert!(Args::try_parse_from(["tubely", "--issue-token", "not-a-uuid"]).is_err());
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = AppConfig::resolve(
            Args::default(),
            env_of(&[("TUBELY_JWT_SECRET", "s"), ("TUBELY_MAX_VIDEO_BYTES", "lots")]),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("TUBELY_MAX_VIDEO_BYTES"));
    }

    #[test]
    fn ttl_must_be_presignable() {
        let err = AppConfig::resolve(
            Args::default(),
            env_of(&[("TUBELY_JWT_SECRET", "s"), ("TUBELY_SIGNED_URL_TTL_SECS", "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("TTL"));
    }

    #[test]
    fn debug_hides_secret() {
        let (cfg, _) = AppConfig::resolve(
            Args::default(),
            env_of(&[("TUBELY_JWT_SECRET", "hunter2")]),
        )
        .unwrap();
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
