use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const APP_DIR: &str = "kinledger";
pub const DB_FILE: &str = "kinledger.sqlite3";
pub const ENV_DB: &str = "KINLEDGER_DB";
pub const ENV_LOG: &str = "KINLEDGER_LOG";
pub const ENV_LOG_DIR: &str = "KINLEDGER_LOG_DIR";
pub const ENV_LOG_FILE: &str = "KINLEDGER_LOG_FILE";
pub const DEFAULT_LOG_FILTER: &str = "kinledger=info,sqlx=warn";

/// Rotation limits for the on-disk log sink.
pub const LOG_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const LOG_MAX_FILES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub log_dir: Option<PathBuf>,
    pub max_bytes: usize,
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
            max_bytes: LOG_MAX_BYTES,
            max_files: LOG_MAX_FILES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log: LogConfig,
}

impl AppConfig {
    /// Resolve paths from the command line, then the environment, then platform defaults.
    pub fn resolve(cli_db: Option<PathBuf>) -> Result<Self> {
        Self::resolve_with(cli_db, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(cli_db: Option<PathBuf>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match cli_db {
            Some(path) => path,
            None => match env(ENV_DB).filter(|v| !v.trim().is_empty()) {
                Some(path) => PathBuf::from(path),
                None => default_db_path()?,
            },
        };

        let file_sink = env(ENV_LOG_FILE).map_or(true, |v| v != "0");
        let log_dir = if file_sink {
            Some(match env(ENV_LOG_DIR).filter(|v| !v.trim().is_empty()) {
                Some(dir) => PathBuf::from(dir),
                None => default_log_dir(&db_path),
            })
        } else {
            None
        };

        Ok(Self {
            db_path,
            log: LogConfig {
                filter: env(ENV_LOG).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
                log_dir,
                ..LogConfig::default()
            },
        })
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    Ok(base.join(APP_DIR).join(DB_FILE))
}

fn default_log_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn cli_path_wins_over_environment() {
        let cfg = AppConfig::resolve_with(
            Some(PathBuf::from("/tmp/cli.sqlite3")),
            env_of(&[(ENV_DB, "/tmp/env.sqlite3")]),
        )
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/cli.sqlite3"));
        assert_eq!(cfg.log.log_dir, Some(PathBuf::from("/tmp/logs")));
    }

    #[test]
    fn environment_supplies_db_and_log_settings() {
        let cfg = AppConfig::resolve_with(
            None,
            env_of(&[
                (ENV_DB, "/data/census.sqlite3"),
                (ENV_LOG, "kinledger=debug"),
                (ENV_LOG_DIR, "/var/log/kin"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/data/census.sqlite3"));
        assert_eq!(cfg.log.filter, "kinledger=debug");
        assert_eq!(cfg.log.log_dir, Some(PathBuf::from("/var/log/kin")));
    }

    #[test]
    fn file_sink_can_be_disabled() {
        let cfg = AppConfig::resolve_with(
            Some(PathBuf::from("db.sqlite3")),
            env_of(&[(ENV_LOG_FILE, "0")]),
        )
        .unwrap();
        assert!(cfg.log.log_dir.is_none());
        assert_eq!(cfg.log.filter, DEFAULT_LOG_FILTER);
    }
}
