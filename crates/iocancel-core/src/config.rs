//! Runtime configuration.
//!
//! Read once from the environment and cached:
//! - `IOCANCEL_LOG`: unset, empty or `off` disables logging; `stderr` logs to
//!   stderr; anything else is a file path opened for append.
//! - `IOCANCEL_LOG_LEVEL`: `trace|debug|info|warn|error` (default `info`).
//! - `IOCANCEL_LAZY`: `off`/`0`/`false` disables lazy hook installation.

use std::path::PathBuf;
use std::sync::OnceLock;

use crate::log::LogLevel;

pub const ENV_LOG: &str = "IOCANCEL_LOG";
pub const ENV_LOG_LEVEL: &str = "IOCANCEL_LOG_LEVEL";
pub const ENV_LAZY: &str = "IOCANCEL_LAZY";

/// Where structured log records go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Off,
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "off" | "none" | "0" => Self::Off,
            "stderr" | "2" => Self::Stderr,
            _ => Self::File(PathBuf::from(trimmed)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    pub log: LogTarget,
    pub log_level: LogLevel,
    pub lazy_enabled: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            log: LogTarget::Off,
            log_level: LogLevel::Info,
            lazy_enabled: true,
        }
    }
}

impl HookConfig {
    /// Build from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            log: lookup(ENV_LOG)
                .map(|v| LogTarget::from_str_loose(&v))
                .unwrap_or(defaults.log),
            log_level: lookup(ENV_LOG_LEVEL)
                .map(|v| LogLevel::from_str_loose(&v))
                .unwrap_or(defaults.log_level),
            lazy_enabled: lookup(ENV_LAZY)
                .map(|v| parse_switch(&v, defaults.lazy_enabled))
                .unwrap_or(defaults.lazy_enabled),
        }
    }
}

fn parse_switch(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "0" | "false" | "no" | "disabled" => false,
        "on" | "1" | "true" | "yes" | "enabled" => true,
        _ => default,
    }
}

static CONFIG: OnceLock<HookConfig> = OnceLock::new();

/// Get the process configuration (reads the environment on first call).
#[must_use]
pub fn config() -> &'static HookConfig {
    CONFIG.get_or_init(HookConfig::from_env)
}
