use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

/// Pre-compiled pattern for worker thread name prefixes (compiled once at first use)
static THREAD_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][-A-Za-z0-9_]*$").unwrap());

/// Backends understood by the job stack.
pub const SUPPORTED_BACKENDS: &[&str] = &["deque", "heap"];

/// Upper bound on the worker pool size.
pub const MAX_WORKERS: usize = 64;

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub queue: Option<QueueSection>,
    #[serde(default)]
    pub workers: Option<WorkersSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkersSection {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub thread_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Serialization formats a configuration file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Format implied by the file extension, if it names one.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn parse(self, s: &str) -> Result<RawConfigFile, ConfigError> {
        match self {
            #[cfg(feature = "toml")]
            Self::Toml => toml::from_str(s).map_err(parse_error),
            #[cfg(feature = "yaml")]
            Self::Yaml => serde_yaml::from_str(s).map_err(parse_error),
            #[cfg(feature = "json")]
            Self::Json => serde_json::from_str(s).map_err(parse_error),
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::Parse(format!(
                "{other:?} support is not compiled in"
            ))),
        }
    }

    /// Parse a file whose extension says nothing: objects are JSON, anything
    /// else is TOML or, failing that, YAML.
    fn parse_unknown(s: &str) -> Result<RawConfigFile, ConfigError> {
        if s.trim_start().starts_with('{') {
            return Self::Json.parse(s);
        }
        Self::Toml.parse(s).or_else(|_| Self::Yaml.parse(s))
    }
}

fn parse_error(e: impl fmt::Display) -> ConfigError {
    ConfigError::Parse(e.to_string())
}

/// Read and parse a config file, picking the format from its extension.
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let body = fs::read_to_string(path)?;
    match ConfigFormat::from_path(path) {
        Some(format) => format.parse(&body),
        None => ConfigFormat::parse_unknown(&body),
    }
}

/// Concrete configuration with defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    pub queue: QueueConfig,
    pub workers: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueConfig {
    /// `deque` or `heap`.
    pub backend: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerConfig {
    pub count: usize,
    /// Prefix of worker thread names; threads are named `{thread_name}-{n}`.
    pub thread_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: "deque".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 2,
            thread_name: "loadstack-worker".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn parse_bool(s: &str) -> Result<bool, &'static str> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err("expected a boolean"),
    }
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        load_raw_from_file(p)?.apply_to(&mut cfg);
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

impl RawConfigFile {
    /// Overwrite the fields of `cfg` that this file sets.
    fn apply_to(self, cfg: &mut Config) {
        let queue = self.queue.unwrap_or_default();
        let workers = self.workers.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        if let Some(backend) = queue.backend {
            cfg.queue.backend = backend;
        }
        if let Some(count) = workers.count {
            cfg.workers.count = count;
        }
        if let Some(name) = workers.thread_name {
            cfg.workers.thread_name = name;
        }
        if let Some(level) = logging.level {
            cfg.logging.level = level;
        }
        if let Some(json) = logging.json {
            cfg.logging.json = json;
        }
    }
}

/// Read `key` from the environment and parse its trimmed value. Unset
/// variables yield `None`.
fn env_override<T, E: fmt::Display>(
    key: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse(v.trim())
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = env_override("LOADSTACK_QUEUE_BACKEND", str::parse::<String>)? {
        cfg.queue.backend = v;
    }
    if let Some(v) = env_override("LOADSTACK_WORKER_COUNT", str::parse::<usize>)? {
        cfg.workers.count = v;
    }
    if let Some(v) = env_override("LOADSTACK_WORKER_THREAD_NAME", str::parse::<String>)? {
        cfg.workers.thread_name = v;
    }
    if let Some(v) = env_override("LOADSTACK_LOG_LEVEL", str::parse::<String>)? {
        cfg.logging.level = v;
    }
    if let Some(v) = env_override("LOADSTACK_LOG_JSON", parse_bool)? {
        cfg.logging.json = v;
    }
    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    let backend = cfg.queue.backend.trim().to_ascii_lowercase();
    if !SUPPORTED_BACKENDS.contains(&backend.as_str()) {
        return Err(ConfigError::Validation(format!(
            "unsupported queue.backend: {} (expected one of {})",
            cfg.queue.backend,
            SUPPORTED_BACKENDS.join(", ")
        )));
    }

    if cfg.workers.count == 0 || cfg.workers.count > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "workers.count must be between 1 and {}",
            MAX_WORKERS
        )));
    }
    if !THREAD_NAME_REGEX.is_match(&cfg.workers.thread_name) {
        return Err(ConfigError::Validation(format!(
            "invalid workers.thread_name: {}",
            cfg.workers.thread_name
        )));
    }

    if cfg.logging.level.trim().is_empty() {
        return Err(ConfigError::Validation(
            "logging.level must not be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;

    const ENV_KEYS: &[&str] = &[
        "LOADSTACK_QUEUE_BACKEND",
        "LOADSTACK_WORKER_COUNT",
        "LOADSTACK_WORKER_THREAD_NAME",
        "LOADSTACK_LOG_LEVEL",
        "LOADSTACK_LOG_JSON",
    ];

    fn write_config(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let f = Builder::new().suffix(suffix).tempfile().expect("tmpfile");
        std::fs::write(f.path(), body).unwrap();
        f
    }

    #[test]
    fn parse_toml() {
        let f = write_config(
            ".toml",
            r#"
[queue]
backend = "heap"

[workers]
count = 4
"#,
        );
        let cfg = load_raw_from_file(f.path()).expect("load");
        assert_eq!(cfg.queue.unwrap().backend.unwrap(), "heap");
        let w = cfg.workers.unwrap();
        assert_eq!(w.count.unwrap(), 4);
        assert!(w.thread_name.is_none());
        assert!(cfg.logging.is_none());
    }

    #[test]
    fn parse_yaml() {
        let f = write_config(
            ".yaml",
            r#"
workers:
  count: 3
  thread_name: loader
logging:
  level: debug
  json: true
"#,
        );
        let cfg = load_raw_from_file(f.path()).expect("load");
        let w = cfg.workers.unwrap();
        assert_eq!(w.count.unwrap(), 3);
        assert_eq!(w.thread_name.unwrap(), "loader");
        let l = cfg.logging.unwrap();
        assert_eq!(l.level.unwrap(), "debug");
        assert!(l.json.unwrap());
    }

    #[test]
    fn parse_json_without_extension() {
        let f = write_config("", r#"{"queue": {"backend": "heap"}}"#);
        let cfg = load_raw_from_file(f.path()).expect("load");
        assert_eq!(cfg.queue.unwrap().backend.unwrap(), "heap");
    }

    #[test]
    fn parse_yaml_without_extension() {
        let f = write_config("", "workers:\n  count: 5\n");
        let cfg = load_raw_from_file(f.path()).expect("load");
        assert_eq!(cfg.workers.unwrap().count, Some(5));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a/loadstack.TOML")),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("loadstack.yml")),
            Some(ConfigFormat::Yaml)
        );
        assert_eq!(ConfigFormat::from_path(Path::new("loadstack.conf")), None);
        assert_eq!(ConfigFormat::from_path(Path::new("loadstack")), None);

        // extension wins over contents
        let f = write_config(".json", "[queue]\nbackend = \"heap\"\n");
        assert!(matches!(
            load_raw_from_file(f.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn parse_garbage_fails() {
        let f = write_config(".toml", "this is = = not valid");
        assert!(matches!(
            load_raw_from_file(f.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn file_values_and_env_overrides() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }

        let f = write_config(
            ".toml",
            r#"
[queue]
backend = "heap"

[workers]
count = 4
thread_name = "from-file"
"#,
        );

        let cfg = load_config(Some(f.path())).expect("load config");
        assert_eq!(cfg.queue.backend, "heap");
        assert_eq!(cfg.workers.count, 4);
        assert_eq!(cfg.workers.thread_name, "from-file");
        assert_eq!(cfg.logging, LoggingConfig::default());

        std::env::set_var("LOADSTACK_QUEUE_BACKEND", "deque");
        std::env::set_var("LOADSTACK_WORKER_COUNT", "8");
        std::env::set_var("LOADSTACK_LOG_LEVEL", "debug");
        std::env::set_var("LOADSTACK_LOG_JSON", "yes");

        let cfg = load_config(Some(f.path())).expect("load config");
        assert_eq!(cfg.queue.backend, "deque");
        assert_eq!(cfg.workers.count, 8);
        assert_eq!(cfg.workers.thread_name, "from-file");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);

        std::env::set_var("LOADSTACK_WORKER_COUNT", "many");
        assert!(matches!(
            load_config::<&Path>(None),
            Err(ConfigError::Parse(_))
        ));

        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert_eq!(cfg.queue.backend, "deque");
        assert_eq!(cfg.workers.count, 2);
        validate_config(&cfg).expect("defaults are valid");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.queue.backend = "stack".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.queue.backend = "HEAP".into();
        assert!(validate_config(&cfg).is_ok());

        let mut cfg = Config::default();
        cfg.workers.count = 0;
        assert!(validate_config(&cfg).is_err());
        cfg.workers.count = MAX_WORKERS + 1;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.workers.thread_name = "bad name".into();
        assert!(validate_config(&cfg).is_err());
        cfg.workers.thread_name = "-leading".into();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.logging.level = "  ".into();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn bool_forms() {
        assert_eq!(parse_bool("Yes"), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert_eq!(parse_bool(" n "), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
