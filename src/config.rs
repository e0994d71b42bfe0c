use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

const DEV_SECRET: &str = "change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    /// Accept a bare `username` without a token.
    pub allow_anonymous: bool,
    pub cors_origin: String,
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub history_limit: i64,
    pub auth_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            database_url: "sqlite://pairline.db".to_owned(),
            database_max_connections: 16,
            jwt_secret: DEV_SECRET.to_owned(),
            allow_anonymous: false,
            cors_origin: "http://localhost:5173".to_owned(),
            upload_dir: PathBuf::from("uploads"),
            public_base_url: "http://localhost:5000".to_owned(),
            max_upload_bytes: 5 * 1024 * 1024,
            history_limit: 100,
            auth_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Reads `.env` and the process environment; unset keys keep defaults.
    pub fn from_env() -> anyhow::Result<Config> {
        let defaults = Config::default();
        let config = Config {
            addr: parsed("PAIRLINE_ADDR", defaults.addr)?,
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parsed(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            jwt_secret: dotenv::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            allow_anonymous: parsed("ALLOW_ANONYMOUS", defaults.allow_anonymous)?,
            cors_origin: dotenv::var("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            upload_dir: dotenv::var("UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            public_base_url: dotenv::var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.public_base_url),
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            history_limit: parsed("HISTORY_LIMIT", defaults.history_limit)?,
            auth_timeout: Duration::from_secs(parsed(
                "AUTH_TIMEOUT_SECS",
                defaults.auth_timeout.as_secs(),
            )?),
        };

        if config.jwt_secret == DEV_SECRET {
            tracing::warn!("JWT_SECRET is not set, using the development secret");
        }
        Ok(config)
    }
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("{key}={raw:?} is not valid")),
        Err(_) => Ok(default),
    }
}
