// Runner configuration (environment-driven)

use std::path::PathBuf;
use std::time::Duration;

use openssl_exec_core::application::constants::{
    DEFAULT_READ_CHUNK_SIZE, GRACEFUL_TERMINATE_TIMEOUT,
};

/// Comma-separated variables passed through to openssl. Unset = inherit all.
pub const ENV_ALLOWLIST_VAR: &str = "OPENSSL_EXEC_ENV_ALLOWLIST";
/// Working directory for openssl
pub const WORKDIR_VAR: &str = "OPENSSL_EXEC_WORKDIR";
/// Read size for stdout/stderr chunks
pub const READ_CHUNK_SIZE_VAR: &str = "OPENSSL_EXEC_READ_CHUNK_SIZE";
/// Milliseconds between SIGTERM and SIGKILL on terminate
pub const TERMINATE_GRACE_VAR: &str = "OPENSSL_EXEC_TERMINATE_GRACE_MS";

/// How SubprocessRunner launches processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// When set, the child environment is cleared and only these variables
    /// are copied from the parent
    pub env_allowlist: Option<Vec<String>>,
    pub working_dir: Option<PathBuf>,
    pub read_chunk_size: usize,
    pub terminate_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            env_allowlist: None,
            working_dir: None,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            terminate_grace: GRACEFUL_TERMINATE_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    /// Load from `OPENSSL_EXEC_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup. Unparseable values fall back
    /// to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_allowlist = lookup(ENV_ALLOWLIST_VAR).map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        });

        let working_dir = lookup(WORKDIR_VAR)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let read_chunk_size = lookup(READ_CHUNK_SIZE_VAR)
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_READ_CHUNK_SIZE);

        let terminate_grace = lookup(TERMINATE_GRACE_VAR)
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(GRACEFUL_TERMINATE_TIMEOUT);

        Self {
            env_allowlist,
            working_dir,
            read_chunk_size,
            terminate_grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = RunnerConfig::from_lookup(lookup(&[]));
        assert_eq!(config, RunnerConfig::default());
    }

    #[test]
    fn test_allowlist_parsing() {
        let config = RunnerConfig::from_lookup(lookup(&[(
            ENV_ALLOWLIST_VAR,
            "PATH, HOME,,OPENSSL_CONF",
        )]));
        assert_eq!(
            config.env_allowlist,
            Some(vec![
                "PATH".to_string(),
                "HOME".to_string(),
                "OPENSSL_CONF".to_string()
            ])
        );
    }

    #[test]
    fn test_invalid_chunk_size_falls_back() {
        let config = RunnerConfig::from_lookup(lookup(&[(READ_CHUNK_SIZE_VAR, "0")]));
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);

        let config = RunnerConfig::from_lookup(lookup(&[(READ_CHUNK_SIZE_VAR, "lots")]));
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);

        let config = RunnerConfig::from_lookup(lookup(&[
            (READ_CHUNK_SIZE_VAR, "4096"),
            (WORKDIR_VAR, "/tmp"),
        ]));
        assert_eq!(config.read_chunk_size, 4096);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_terminate_grace_override() {
        let config = RunnerConfig::from_lookup(lookup(&[(TERMINATE_GRACE_VAR, "250")]));
        assert_eq!(config.terminate_grace, Duration::from_millis(250));

        let config = RunnerConfig::from_lookup(lookup(&[(TERMINATE_GRACE_VAR, "soon")]));
        assert_eq!(config.terminate_grace, GRACEFUL_TERMINATE_TIMEOUT);
    }
}
