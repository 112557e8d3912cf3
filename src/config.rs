use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt};

/// Which pair of collaborators backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite records and on-disk objects with signed links served locally.
    Local,
    /// DynamoDB records and S3 objects.
    Aws,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub table: String,
    pub backend: Backend,
    pub user_index: String,
    pub storage_dir: String,
    pub database_url: String,
    pub public_url: String,
    pub signing_secret: Option<String>,
    pub base_path: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bucket", &self.bucket)
            .field("table", &self.table)
            .field("backend", &self.backend)
            .field("user_index", &self.user_index)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("public_url", &self.public_url)
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("base_path", &self.base_path)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image metadata registry with signed upload/download links")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_API_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_API_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object-store bucket holding image payloads (overrides IMAGE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Record-store table holding image metadata (overrides TABLE_NAME)
    #[arg(long)]
    pub table: Option<String>,

    /// Storage backend (overrides IMAGE_API_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Secondary index used for owner lookups (overrides IMAGE_API_USER_INDEX)
    #[arg(long)]
    pub user_index: Option<String>,

    /// Directory where local objects are stored (overrides IMAGE_API_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// SQLite database URL for local records (overrides IMAGE_API_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Externally reachable base URL used in local signed links (overrides IMAGE_API_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// HMAC secret for local signed links (overrides IMAGE_API_SIGNING_SECRET)
    #[arg(long)]
    pub signing_secret: Option<String>,

    /// Path prefix for the image routes, e.g. `/prod` (overrides IMAGE_API_BASE_PATH)
    #[arg(long)]
    pub base_path: Option<String>,

    /// Create the record table and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge parsed CLI args over values looked up through `env`.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let host = args
            .host
            .or_else(|| env("IMAGE_API_HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());

        let port = match args.port {
            Some(port) => port,
            None => match env("IMAGE_API_PORT") {
                Some(value) => value
                    .parse::<u16>()
                    .with_context(|| format!("parsing IMAGE_API_PORT value `{}`", value))?,
                None => 3000,
            },
        };

        let bucket = args
            .bucket
            .or_else(|| env("IMAGE_BUCKET"))
            .filter(|v| !v.is_empty());
        let Some(bucket) = bucket else {
            bail!("object-store bucket is required (--bucket or IMAGE_BUCKET)");
        };

        let table = args
            .table
            .or_else(|| env("TABLE_NAME"))
            .filter(|v| !v.is_empty());
        let Some(table) = table else {
            bail!("record-store table is required (--table or TABLE_NAME)");
        };

        let backend = match args.backend {
            Some(backend) => backend,
            None => match env("IMAGE_API_BACKEND") {
                Some(value) => Backend::from_str(&value, true).map_err(|err| {
                    anyhow::anyhow!("parsing IMAGE_API_BACKEND value `{}`: {}", value, err)
                })?,
                None => Backend::Local,
            },
        };

        let cfg = Self {
            host,
            port,
            bucket,
            table,
            backend,
            user_index: args
                .user_index
                .or_else(|| env("IMAGE_API_USER_INDEX"))
                .unwrap_or_else(|| "UserIndex".into()),
            storage_dir: args
                .storage_dir
                .or_else(|| env("IMAGE_API_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| env("IMAGE_API_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/images.db".into()),
            public_url: args
                .public_url
                .or_else(|| env("IMAGE_API_PUBLIC_URL"))
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", port)),
            signing_secret: args
                .signing_secret
                .or_else(|| env("IMAGE_API_SIGNING_SECRET"))
                .filter(|v| !v.is_empty()),
            base_path: normalize_base_path(
                &args
                    .base_path
                    .or_else(|| env("IMAGE_API_BASE_PATH"))
                    .unwrap_or_default(),
            ),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Absolute URL prefix of the signed blob routes.
    pub fn blob_link_base(&self) -> String {
        format!(
            "{}{}/blobs",
            self.public_url.trim_end_matches('/'),
            self.base_path
        )
    }
}

/// `""`, `"/"` → `""`; `"prod/"` → `"/prod"`.
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, bool)> {
        let args = Args::parse_from(std::iter::once("image-registry").chain(argv.iter().copied()));
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_required_settings_exist() {
        let (cfg, migrate) =
            resolve(&[], &[("IMAGE_BUCKET", "images"), ("TABLE_NAME", "images")]).unwrap();
        assert!(!migrate);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.backend, Backend::Local);
        assert_eq!(cfg.user_index, "UserIndex");
        assert_eq!(cfg.public_url, "http://127.0.0.1:3000");
        assert_eq!(cfg.base_path, "");
        assert_eq!(cfg.blob_link_base(), "http://127.0.0.1:3000/blobs");
        assert!(cfg.signing_secret.is_none());
    }

    #[test]
    fn cli_overrides_environment() {
        let (cfg, migrate) = resolve(
            &["--port", "8080", "--backend", "aws", "--bucket", "cli-bucket", "--migrate"],
            &[
                ("IMAGE_BUCKET", "env-bucket"),
                ("TABLE_NAME", "env-table"),
                ("IMAGE_API_PORT", "9000"),
                ("IMAGE_API_BACKEND", "local"),
            ],
        )
        .unwrap();
        assert!(migrate);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.backend, Backend::Aws);
        assert_eq!(cfg.bucket, "cli-bucket");
        assert_eq!(cfg.table, "env-table");
    }

    #[test]
    fn bucket_and_table_are_required() {
        let err = resolve(&[], &[("TABLE_NAME", "t")]).unwrap_err();
        assert!(err.to_string().contains("IMAGE_BUCKET"));
        let err = resolve(&[], &[("IMAGE_BUCKET", "b"), ("TABLE_NAME", "")]).unwrap_err();
        assert!(err.to_string().contains("TABLE_NAME"));
    }

    #[test]
    fn invalid_environment_values_are_reported() {
        let base = [("IMAGE_BUCKET", "b"), ("TABLE_NAME", "t")];
        let err = resolve(&[], &[base[0], base[1], ("IMAGE_API_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("IMAGE_API_PORT"));
        let err = resolve(&[], &[base[0], base[1], ("IMAGE_API_BACKEND", "gcs")]).unwrap_err();
        assert!(err.to_string().contains("IMAGE_API_BACKEND"));
        let (cfg, _) = resolve(&[], &[base[0], base[1], ("IMAGE_API_BACKEND", "AWS")]).unwrap();
        assert_eq!(cfg.backend, Backend::Aws);
    }

    #[test]
    fn base_path_is_normalized_into_links() {
        let (cfg, _) = resolve(
            &["--base-path", "prod/", "--public-url", "https://img.example.com/"],
            &[("IMAGE_BUCKET", "b"), ("TABLE_NAME", "t")],
        )
        .unwrap();
        assert_eq!(cfg.base_path, "/prod");
        assert_eq!(cfg.blob_link_base(), "https://img.example.com/prod/blobs");
        assert_eq!(normalize_base_path("/"), "");
    }

    #[test]
    fn debug_output_redacts_the_secret() {
        let (cfg, _) = resolve(
            &["--signing-secret", "hunter2"],
            &[("IMAGE_BUCKET", "b"), ("TABLE_NAME", "t")],
        )
        .unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
