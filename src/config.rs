use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cli::RunOpts;
use crate::tracker::Debounce;

pub const DEFAULT_INTERVAL_SECS: u64 = 7;
pub const DEFAULT_LINES: usize = 120;
pub const DEFAULT_DEBOUNCE_CYCLES: u32 = 2;
pub const DEFAULT_AGENT_NAME: &str = "cursor-agent";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("webhook URL not provided; set AGENT_NOTIFIER_WEBHOOK, pass --webhook-url, or use --dry-run")]
    MissingWebhook,

    #[error("invalid webhook URL {url:?}: {reason}")]
    InvalidWebhook { url: String, reason: String },

    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("invalid {field} pattern: {source}")]
    Pattern {
        field: &'static str,
        source: regex::Error,
    },
}

/// Contents of the TOML config file; every key is optional
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub webhook_url: Option<String>,
    pub interval_secs: Option<u64>,
    pub lines: Option<usize>,
    pub debounce_cycles: Option<u32>,
    pub debounce_dwell_secs: Option<u64>,
    pub match_command: Option<String>,
    pub match_text: Option<String>,
    pub agent_name: Option<String>,
    pub tmux_bin: Option<String>,
    pub git_bin: Option<String>,
    pub capture_timeout_secs: Option<u64>,
    pub git_timeout_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub dry_run: Option<bool>,
}

impl FileConfig {
    /// Default location: `$XDG_CONFIG_HOME/agent-notifier/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("agent-notifier").join("config.toml"))
    }

    /// Load an explicit file (must exist) or the default one (may be absent)
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_path(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: Option<String>,
    pub interval: Duration,
    pub lines: usize,
    pub debounce: Debounce,
    pub match_command: Option<Regex>,
    /// Case-insensitive, searched in a pane's trailing lines
    pub match_text: Option<Regex>,
    pub agent_name: String,
    pub tmux_bin: String,
    pub git_bin: String,
    pub capture_timeout: Duration,
    pub git_timeout: Duration,
    pub http_timeout: Duration,
    pub max_attempts: u32,
    pub dry_run: bool,
}

impl Config {
    /// Merge CLI/env overrides over the file and validate the result
    pub fn resolve(opts: &RunOpts, file: FileConfig) -> Result<Self, ConfigError> {
        let webhook_url = opts
            .webhook_url
            .clone()
            .or(file.webhook_url)
            .filter(|url| !url.trim().is_empty());
        if let Some(url) = &webhook_url {
            validate_webhook_url(url)?;
        }

        let interval_secs = opts
            .interval
            .or(file.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        let lines = opts.lines.or(file.lines).unwrap_or(DEFAULT_LINES);
        let debounce_cycles = opts
            .debounce
            .or(file.debounce_cycles)
            .unwrap_or(DEFAULT_DEBOUNCE_CYCLES);
        let max_attempts = file.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);

        positive("interval_secs", interval_secs)?;
        positive("lines", lines as u64)?;
        positive("debounce_cycles", u64::from(debounce_cycles))?;
        positive("max_attempts", u64::from(max_attempts))?;

        let debounce = match opts.debounce_dwell.or(file.debounce_dwell_secs) {
            Some(secs) => Debounce::Dwell(Duration::from_secs(secs)),
            None => Debounce::Cycles(debounce_cycles),
        };

        let match_command = pattern(
            "match_command",
            opts.match_command.clone().or(file.match_command),
            false,
        )?;
        let match_text = pattern(
            "match_text",
            opts.match_text.clone().or(file.match_text),
            true,
        )?;

        Ok(Self {
            webhook_url,
            interval: Duration::from_secs(interval_secs),
            lines,
            debounce,
            match_command,
            match_text,
            agent_name: file
                .agent_name
                .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
            tmux_bin: file.tmux_bin.unwrap_or_else(|| "tmux".to_string()),
            git_bin: file.git_bin.unwrap_or_else(|| "git".to_string()),
            capture_timeout: timeout("capture_timeout_secs", file.capture_timeout_secs, 5)?,
            git_timeout: timeout("git_timeout_secs", file.git_timeout_secs, 5)?,
            http_timeout: timeout("http_timeout_secs", file.http_timeout_secs, 10)?,
            max_attempts,
            dry_run: opts.dry_run || file.dry_run.unwrap_or(false),
        })
    }

    /// The webhook URL, which is mandatory unless running dry
    pub fn require_webhook(&self) -> Result<&str, ConfigError> {
        self.webhook_url
            .as_deref()
            .ok_or(ConfigError::MissingWebhook)
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            message: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn timeout(field: &'static str, secs: Option<u64>, default: u64) -> Result<Duration, ConfigError> {
    let secs = secs.unwrap_or(default);
    positive(field, secs)?;
    Ok(Duration::from_secs(secs))
}

fn pattern(
    field: &'static str,
    value: Option<String>,
    case_insensitive: bool,
) -> Result<Option<Regex>, ConfigError> {
    value
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| {
            RegexBuilder::new(&pattern)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|source| ConfigError::Pattern { field, source })
        })
        .transpose()
}

fn validate_webhook_url(url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidWebhook {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidWebhook {
            url: url.to_string(),
            reason: format!("unsupported scheme {:?}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HOOK: &str = "https://discord.com/api/webhooks/123/abc";

    #[test]
    fn test_defaults() {
        let config = Config::resolve(&RunOpts::default(), FileConfig::default()).unwrap();
        assert_eq!(config.webhook_url, None);
        assert_eq!(config.interval, Duration::from_secs(7));
        assert_eq!(config.lines, 120);
        assert_eq!(config.debounce, Debounce::Cycles(2));
        assert_eq!(config.agent_name, "cursor-agent");
        assert_eq!(config.max_attempts, 4);
        assert!(config.match_command.is_none());
        assert!(config.match_text.is_none());
        assert!(!config.dry_run);
    }

    #[test]
    fn test_missing_webhook_is_reported() {
        let config = Config::resolve(&RunOpts::default(), FileConfig::default()).unwrap();
        assert!(matches!(
            config.require_webhook(),
            Err(ConfigError::MissingWebhook)
        ));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig::parse(
            r#"
            webhook_url = "https://example.com/file-hook"
            interval_secs = 30
            lines = 60
            debounce_cycles = 4
            agent_name = "claude"
            "#,
            Path::new("config.toml"),
        )
        .unwrap();
        let opts = RunOpts {
            webhook_url: Some(HOOK.to_string()),
            interval: Some(5),
            ..RunOpts::default()
        };

        let config = Config::resolve(&opts, file).unwrap();
        assert_eq!(config.require_webhook().unwrap(), HOOK);
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.lines, 60);
        assert_eq!(config.debounce, Debounce::Cycles(4));
        assert_eq!(config.agent_name, "claude");
    }

    #[test]
    fn test_dwell_selects_time_debounce() {
        let opts = RunOpts {
            debounce_dwell: Some(15),
            ..RunOpts::default()
        };
        let config = Config::resolve(&opts, FileConfig::default()).unwrap();
        assert_eq!(config.debounce, Debounce::Dwell(Duration::from_secs(15)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let opts = RunOpts {
            interval: Some(0),
            ..RunOpts::default()
        };
        let err = Config::resolve(&opts, FileConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "interval_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_debounce_and_lines_rejected() {
        let opts = RunOpts {
            debounce: Some(0),
            ..RunOpts::default()
        };
        assert!(Config::resolve(&opts, FileConfig::default()).is_err());

        let opts = RunOpts {
            lines: Some(0),
            ..RunOpts::default()
        };
        assert!(Config::resolve(&opts, FileConfig::default()).is_err());
    }

    #[test]
    fn test_invalid_webhook_rejected() {
        for url in ["not a url", "ftp://example.com/hook"] {
            let opts = RunOpts {
                webhook_url: Some(url.to_string()),
                ..RunOpts::default()
            };
            let err = Config::resolve(&opts, FileConfig::default()).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidWebhook { .. }), "{url}");
        }
    }

    #[test]
    fn test_bad_match_pattern_rejected() {
        let opts = RunOpts {
            match_command: Some("(cursor".to_string()),
            ..RunOpts::default()
        };
        let err = Config::resolve(&opts, FileConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Pattern {
                field: "match_command",
                ..
            }
        ));

        let opts = RunOpts {
            match_text: Some("[cursor".to_string()),
            ..RunOpts::default()
        };
        let err = Config::resolve(&opts, FileConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Pattern {
                field: "match_text",
                ..
            }
        ));
    }

    #[test]
    fn test_match_text_is_case_insensitive() {
        let file = FileConfig::parse(
            r#"match_text = "cursor[-_ ]?agent""#,
            Path::new("config.toml"),
        )
        .unwrap();
        let config = Config::resolve(&RunOpts::default(), file).unwrap();
        let re = config.match_text.unwrap();
        assert!(re.is_match("Cursor Agent"));
        assert!(re.is_match("cursor-agent"));
        assert!(config.match_command.is_none());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            webhook_url = "https://hooks.slack.com/services/T/B/X"
            match_command = "^(cursor|cursor-agent)$"
            git_timeout_secs = 2
            "#,
        )
        .unwrap();

        let file = FileConfig::load(Some(&path)).unwrap();
        let config = Config::resolve(&RunOpts::default(), file).unwrap();
        assert_eq!(config.git_timeout, Duration::from_secs(2));
        assert!(config.match_command.unwrap().is_match("cursor-agent"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = FileConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = FileConfig::parse("poll_every = 3", Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
