use std::path::PathBuf;
use thiserror::Error;

pub const LOG_ENV: &str = "EXAMHALLD_LOG";
pub const WORKSPACE_ENV: &str = "EXAMHALLD_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is set but empty")]
    Empty { var: &'static str },
}

/// Process-level settings read once at startup. Workspace settings live in
/// the database and are handled by `setup.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let log_filter = lookup(LOG_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let workspace = match lookup(WORKSPACE_ENV) {
            Some(v) if v.trim().is_empty() => {
                return Err(ConfigError::Empty { var: WORKSPACE_ENV })
            }
            Some(v) => Some(PathBuf::from(v.trim())),
            None => None,
        };

        Ok(Self {
            log_filter,
            workspace,
        })
    }
}
