//! Process-wide binding configuration.

use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BindError, Result};
use crate::native::vsi::VSIMEM_ROOT;

/// Environment variable overriding the worker pool size.
pub const ENV_WORKER_THREADS: &str = "GEOBIND_WORKER_THREADS";
/// Environment variable overriding the virtual file prefix.
pub const ENV_VSIMEM_PREFIX: &str = "GEOBIND_VSIMEM_PREFIX";
/// Environment variable holding the log filter directive.
pub const ENV_LOG: &str = "GEOBIND_LOG";

/// Binding settings, read once per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Upper bound of concurrently running job bodies per main context.
    pub worker_threads: usize,
    /// Directory under `/vsimem/` where buffer-backed files are named.
    pub vsimem_prefix: String,
    /// `tracing` filter directive, e.g. `geobind=debug`.
    pub log_filter: Option<String>,
    /// How often a main-context thread blocked on a lock delivers queued
    /// progress events, in milliseconds.
    pub progress_poll_ms: u64,
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            vsimem_prefix: format!("{VSIMEM_ROOT}geobind"),
            log_filter: None,
            progress_poll_ms: 2,
        }
    }
}

impl BindingConfig {
    /// Parse a JSON object; missing fields keep their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Defaults overridden by the `GEOBIND_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_WORKER_THREADS) {
            match raw.parse() {
                Ok(n) => config.worker_threads = n,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_WORKER_THREADS}"),
            }
        }
        if let Ok(prefix) = std::env::var(ENV_VSIMEM_PREFIX) {
            config.vsimem_prefix = prefix;
        }
        if let Ok(filter) = std::env::var(ENV_LOG) {
            config.log_filter = Some(filter);
        }
        config.normalized()
    }

    fn normalized(mut self) -> Self {
        self.worker_threads = self.worker_threads.max(1);
        self.progress_poll_ms = self.progress_poll_ms.max(1);
        if !self.vsimem_prefix.starts_with(VSIMEM_ROOT) {
            warn!(prefix = %self.vsimem_prefix, "prefix outside {VSIMEM_ROOT}, using default");
            self.vsimem_prefix = Self::default().vsimem_prefix;
        }
        self
    }

    pub fn progress_poll(&self) -> Duration {
        Duration::from_millis(self.progress_poll_ms)
    }
}

static CONFIG: OnceCell<BindingConfig> = OnceCell::new();

/// Install the process configuration.
///
/// The configuration freezes on first use, so once any context, buffer or
/// job has read it, only an identical `config` is accepted.
pub fn install(config: BindingConfig) -> Result<()> {
    let mut config = Some(config);
    let in_effect = CONFIG.get_or_init(|| config.take().unwrap_or_default());
    match config {
        Some(requested) if requested != *in_effect => {
            warn!(?requested, ?in_effect, "configuration already in effect");
            Err(BindError::invalid(
                "a different configuration is already in effect; call geo_init first",
            ))
        }
        _ => Ok(()),
    }
}

/// The configuration in effect, loaded from the environment on first use.
pub fn current() -> &'static BindingConfig {
    CONFIG.get_or_init(BindingConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fills_defaults() {
        let config = BindingConfig::from_json(r#"{"worker_threads": 3}"#).unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.vsimem_prefix, "/vsimem/geobind");
        assert_eq!(config.progress_poll_ms, 2);
        assert_eq!(config.log_filter, None);
    }

    #[test]
    fn json_is_normalized() {
        let config =
            BindingConfig::from_json(r#"{"worker_threads": 0, "vsimem_prefix": "/tmp/x"}"#)
                .unwrap();
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.vsimem_prefix, "/vsimem/geobind");
    }

    #[test]
    fn malformed_json_fails() {
        assert!(BindingConfig::from_json("{worker_threads").is_err());
        assert!(BindingConfig::from_json(r#"{"worker_threads": "many"}"#).is_err());
    }

    #[test]
    fn install_accepts_only_the_config_in_effect() {
        let in_effect = current().clone();
        assert!(install(in_effect.clone()).is_ok());

        let other = BindingConfig {
            worker_threads: in_effect.worker_threads + 1,
            ..in_effect.clone()
        };
        let err = install(other).unwrap_err();
        assert!(matches!(err, BindError::InvalidArgument(ref m) if m.contains("already in effect")));
        assert_ne!(current().worker_threads, in_effect.worker_threads + 1);
    }

    #[test]
    fn current_is_stable() {
        let a = current() as *const BindingConfig;
        let b = current() as *const BindingConfig;
        assert_eq!(a, b);
        assert!(current().worker_threads >= 1);
    }
}
