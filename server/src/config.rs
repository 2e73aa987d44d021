use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server_name: String,
    pub database_url: String,
    /// Directory where uploads are spooled before placement
    pub spool_path: String,
    pub rest_port: u16,
    /// Upper bound on chunks per item
    pub default_part_count: usize,
    /// Placement attempts per chunk before the item fails
    pub max_chunk_attempts: u32,
    pub upload_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Retries of a contended capacity update
    pub capacity_retry_attempts: u32,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Config {
            server_name: std::env::var("SERVER_NAME").unwrap_or_else(|_| "stow".to_string()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/stow.db".to_string()),
            spool_path: std::env::var("SPOOL_PATH").unwrap_or_else(|_| "./data/spool".to_string()),
            rest_port: env_or("REST_PORT", 11111)?,
            default_part_count: env_or("DEFAULT_PART_COUNT", 6)?,
            max_chunk_attempts: env_or("MAX_CHUNK_ATTEMPTS", 5)?,
            upload_timeout_secs: env_or("UPLOAD_TIMEOUT_SECS", 3600)?,
            probe_timeout_secs: env_or("PROBE_TIMEOUT_SECS", 5)?,
            capacity_retry_attempts: env_or("CAPACITY_RETRY_ATTEMPTS", 8)?,
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024 * 1024)?,
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        if config.default_part_count == 0 {
            anyhow::bail!("DEFAULT_PART_COUNT must be at least 1");
        }
        if config.max_chunk_attempts == 0 {
            anyhow::bail!("MAX_CHUNK_ATTEMPTS must be at least 1");
        }

        Ok(config)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Settings for tests: short timeouts and a private spool directory.
    #[cfg(test)]
    pub fn for_tests(spool_path: &std::path::Path) -> Self {
        Config {
            server_name: "stow-test".to_string(),
            database_url: "sqlite::memory:".to_string(),
            spool_path: spool_path.to_string_lossy().into_owned(),
            rest_port: 0,
            default_part_count: 6,
            max_chunk_attempts: 5,
            upload_timeout_secs: 30,
            probe_timeout_secs: 2,
            capacity_retry_attempts: 8,
            max_upload_bytes: 64 * 1024 * 1024,
            cors_origins: Vec::new(),
        }
    }
}
