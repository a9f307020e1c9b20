use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub workspace_root: PathBuf,
    pub run_timeout_ms: u64,
    pub compile_timeout_ms: u64,
    pub max_output_bytes: usize,
    pub runtimes_path: Option<PathBuf>,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:2000".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        Ok(Self {
            bind_addr,
            workspace_root: env::var("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("runbox")),
            run_timeout_ms: parse_env("RUN_TIMEOUT_MS", 3_000u64),
            compile_timeout_ms: parse_env("COMPILE_TIMEOUT_MS", 10_000u64),
            max_output_bytes: parse_env("MAX_OUTPUT_BYTES", 1_048_576usize),
            runtimes_path: env::var("RUNTIMES_PATH").ok().map(PathBuf::from),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
