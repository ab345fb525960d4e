//! Configuration file support for sshlm.
//!
//! Loads `config.toml` from the user's config directory (or `--config`).
//! Command-line flags take precedence over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Color;
use serde::Deserialize;

use crate::output::OutputFormat;

/// Default log file when neither the flag nor the config names one.
pub const DEFAULT_LOG: &str = "/var/log/secure";

/// Log source name that selects the systemd journal.
pub const JOURNAL: &str = "journal";

/// Settings read from the config file. Every field is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// authorized_keys files to collect fingerprints from
    #[serde(default)]
    pub authkeys: Vec<PathBuf>,
    /// `user,fingerprint` CSV used instead of the database
    pub users: Option<PathBuf>,
    /// Log file, or "journal"; an empty string only collects keys
    pub log: Option<String>,
    pub database: Option<PathBuf>,
    pub output: Option<OutputFormat>,
    pub color: Option<bool>,
    pub follow: Option<bool>,
    pub follow_authkeys: Option<bool>,
    pub update_keys: Option<bool>,
    pub resume: Option<bool>,
    #[serde(default)]
    pub theme: ThemeConfig,
}

/// Per-field color names, e.g. `username = "green"`.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ThemeConfig {
    pub username: Option<String>,
    pub key_user: Option<String>,
    pub event_type: Option<String>,
    pub event_time: Option<String>,
    pub source_ip: Option<String>,
    pub port: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl FileConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sshlm").join("config.toml"))
    }

    /// Load configuration from `path`.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: FileConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(Some(config))
    }
}

/// Resolved colors for each output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub username: Color,
    pub key_user: Color,
    pub event_type: Color,
    pub event_time: Color,
    pub source_ip: Color,
    pub port: Color,
    pub start_time: Color,
    pub end_time: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            username: Color::Green,
            key_user: Color::Cyan,
            event_type: Color::Yellow,
            event_time: Color::Red,
            source_ip: Color::Blue,
            port: Color::Blue,
            start_time: Color::Green,
            end_time: Color::Red,
        }
    }
}

impl Theme {
    /// Apply color names from the config over the defaults. Unknown names
    /// keep the default and are reported.
    pub fn from_config(config: &ThemeConfig) -> Self {
        let defaults = Theme::default();
        let pick = |name: &Option<String>, fallback: Color| match name {
            Some(name) => name.parse::<Color>().unwrap_or_else(|_| {
                tracing::warn!("unknown theme color '{}', using default", name);
                fallback
            }),
            None => fallback,
        };

        Self {
            username: pick(&config.username, defaults.username),
            key_user: pick(&config.key_user, defaults.key_user),
            event_type: pick(&config.event_type, defaults.event_type),
            event_time: pick(&config.event_time, defaults.event_time),
            source_ip: pick(&config.source_ip, defaults.source_ip),
            port: pick(&config.port, defaults.port),
            start_time: pick(&config.start_time, defaults.start_time),
            end_time: pick(&config.end_time, defaults.end_time),
        }
    }
}

/// Where log lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    File(PathBuf),
    Journal,
    /// Only collect keys.
    None,
}

/// Effective settings after merging flags over the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub authkeys: Vec<PathBuf>,
    pub users: Option<PathBuf>,
    pub log: LogSource,
    pub database: PathBuf,
    pub output: OutputFormat,
    pub theme: Option<Theme>,
    pub follow: bool,
    pub follow_authkeys: bool,
    pub update_keys: bool,
    pub resume: bool,
}

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub authkeys: Vec<PathBuf>,
    pub users: Option<PathBuf>,
    pub log: Option<String>,
    pub database: Option<PathBuf>,
    pub output: Option<OutputFormat>,
    pub color: bool,
    pub follow: bool,
    pub follow_authkeys: bool,
    pub update_keys: bool,
    pub resume: bool,
}

impl Settings {
    pub fn resolve(flags: Overrides, file: FileConfig) -> Self {
        let authkeys = if flags.authkeys.is_empty() {
            file.authkeys
        } else {
            flags.authkeys
        };

        let log = match flags.log.or(file.log) {
            None => LogSource::File(PathBuf::from(DEFAULT_LOG)),
            Some(s) if s.is_empty() => LogSource::None,
            Some(s) if s == JOURNAL => LogSource::Journal,
            Some(s) => LogSource::File(PathBuf::from(s)),
        };

        let follow = flags.follow || file.follow.unwrap_or(false);

        // Follow mode streams events, so the summary table makes no sense there.
        let output = if follow {
            OutputFormat::Log
        } else {
            flags.output.or(file.output).unwrap_or_default()
        };

        let color = flags.color || file.color.unwrap_or(false);

        Self {
            authkeys,
            users: flags.users.or(file.users),
            log,
            database: flags
                .database
                .or(file.database)
                .unwrap_or_else(sshlm_db::Database::default_path),
            output,
            theme: color.then(|| Theme::from_config(&file.theme)),
            follow,
            follow_authkeys: flags.follow_authkeys || file.follow_authkeys.unwrap_or(false),
            update_keys: flags.update_keys || file.update_keys.unwrap_or(false),
            resume: flags.resume || file.resume.unwrap_or(false),
        }
    }
}
