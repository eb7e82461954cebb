use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml::{Table, Value};

use crate::decision::policy::{DecisionPolicy, PolicyError};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["neuronx.toml", "config/neuronx.toml"];

/// Runtime settings. Layers apply in order: built-in defaults, the config file, `NEURONX_*`
/// environment variables, then explicit overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub policy: PolicyConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://neuronx.db".to_string(), max_connections: 5, timeout_secs: 30 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), port: 8080, graceful_shutdown_secs: 15 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

/// Where the decision policy document lives. No path means the built-in policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

/// Values supplied by the caller, usually from command-line flags. Highest precedence.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub policy_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration values have the wrong shape: {0}")]
    Shape(#[source] toml::de::Error),
    #[error("configuration validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut layers = Table::new();

        match locate_config_file(options.config_path.as_deref()) {
            Some(path) => merge_layer(&mut layers, file_layer(&path)?),
            None if options.require_file => {
                let expected = options
                    .config_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => {}
        }
        merge_layer(&mut layers, env_layer()?);
        merge_layer(&mut layers, options.overrides.into_layer());

        let config: AppConfig = Value::Table(layers).try_into().map_err(ConfigError::Shape)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the configured policy document, or the built-in policy when none is set.
    pub fn load_policy(&self) -> Result<DecisionPolicy, ConfigError> {
        match &self.policy.path {
            Some(path) => Ok(DecisionPolicy::load_from_path(path)?),
            None => Ok(DecisionPolicy::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.database.url.trim();
        let level = self.logging.level.trim().to_ascii_lowercase();
        let rules = [
            (
                url.starts_with("sqlite:") || url == ":memory:",
                "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
            ),
            (self.database.max_connections > 0, "database.max_connections must be greater than zero"),
            ((1..=300).contains(&self.database.timeout_secs), "database.timeout_secs must be in range 1..=300"),
            (!self.server.bind_address.trim().is_empty(), "server.bind_address must not be empty"),
            (self.server.port > 0, "server.port must be greater than zero"),
            (
                self.server.graceful_shutdown_secs > 0,
                "server.graceful_shutdown_secs must be greater than zero",
            ),
            (
                matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error"),
                "logging.level must be one of trace|debug|info|warn|error",
            ),
        ];
        if let Some((_, message)) = rules.iter().find(|(holds, _)| !holds) {
            return Err(ConfigError::Validation((*message).to_string()));
        }

        match &self.policy.path {
            Some(path) if !path.is_file() => Err(ConfigError::Validation(format!(
                "policy.path `{}` does not point to a readable file; unset it to use the built-in policy",
                path.display()
            ))),
            _ => Ok(()),
        }
    }
}

impl ConfigOverrides {
    fn into_layer(self) -> Table {
        let mut layer = Table::new();
        if let Some(url) = self.database_url {
            set_value(&mut layer, "database", "url", Value::String(url));
        }
        if let Some(level) = self.log_level {
            set_value(&mut layer, "logging", "level", Value::String(level));
        }
        if let Some(path) = self.policy_path {
            set_value(&mut layer, "policy", "path", path_value(&path));
        }
        layer
    }
}

#[derive(Clone, Copy)]
enum EnvKind {
    Text,
    Port,
    Count,
    Seconds,
    Format,
}

/// Environment variables and the config field each one sets. Earlier keys in a binding win.
const ENV_BINDINGS: [(&[&str], &str, &str, EnvKind); 9] = [
    (&["NEURONX_DATABASE_URL"], "database", "url", EnvKind::Text),
    (&["NEURONX_DATABASE_MAX_CONNECTIONS"], "database", "max_connections", EnvKind::Count),
    (&["NEURONX_DATABASE_TIMEOUT_SECS"], "database", "timeout_secs", EnvKind::Seconds),
    (&["NEURONX_SERVER_BIND_ADDRESS"], "server", "bind_address", EnvKind::Text),
    (&["NEURONX_SERVER_PORT"], "server", "port", EnvKind::Port),
    (&["NEURONX_SERVER_GRACEFUL_SHUTDOWN_SECS"], "server", "graceful_shutdown_secs", EnvKind::Seconds),
    (&["NEURONX_LOGGING_LEVEL", "NEURONX_LOG_LEVEL"], "logging", "level", EnvKind::Text),
    (&["NEURONX_LOGGING_FORMAT", "NEURONX_LOG_FORMAT"], "logging", "format", EnvKind::Format),
    (&["NEURONX_POLICY_PATH"], "policy", "path", EnvKind::Text),
];

fn env_layer() -> Result<Table, ConfigError> {
    let mut layer = Table::new();
    for (keys, section, field, kind) in ENV_BINDINGS {
        let Some((key, raw)) = keys.iter().find_map(|key| read_env(key).map(|raw| (*key, raw)))
        else {
            continue;
        };
        let invalid = || ConfigError::InvalidEnvOverride { key: key.to_string(), value: raw.clone() };
        let value = match kind {
            EnvKind::Text => Value::String(raw.clone()),
            EnvKind::Port => Value::Integer(raw.trim().parse::<u16>().map_err(|_| invalid())?.into()),
            EnvKind::Count => Value::Integer(raw.trim().parse::<u32>().map_err(|_| invalid())?.into()),
            EnvKind::Seconds => {
                let seconds = raw.trim().parse::<u64>().map_err(|_| invalid())?;
                Value::Integer(i64::try_from(seconds).map_err(|_| invalid())?)
            }
            EnvKind::Format => Value::String(raw.parse::<LogFormat>()?.as_str().to_string()),
        };
        set_value(&mut layer, section, field, value);
    }
    Ok(layer)
}

fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).find(|path| path.exists()),
    }
}

fn file_layer(path: &Path) -> Result<Table, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let expanded = interpolate_env_vars(&raw)?;
    toml::from_str::<Table>(&expanded)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` references. Unset variables are an error, not an empty string.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let end = tail.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &tail[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &tail[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn merge_layer(base: &mut Table, upper: Table) {
    for (key, value) in upper {
        match value {
            Value::Table(nested) => {
                if let Some(Value::Table(existing)) = base.get_mut(&key) {
                    merge_layer(existing, nested);
                } else {
                    base.insert(key, Value::Table(nested));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

fn set_value(layer: &mut Table, section: &str, field: &str, value: Value) {
    let entry = layer.entry(section.to_string()).or_insert_with(|| Value::Table(Table::new()));
    if let Value::Table(table) = entry {
        table.insert(field.to_string(), value);
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::decision::policy::EnforcementMode;

    /// Holds the process-wide env lock and unsets the listed variables on drop.
    struct ScopedEnv {
        keys: Vec<String>,
        _guard: MutexGuard<'static, ()>,
    }

    impl ScopedEnv {
        fn set(vars: &[(&str, &str)]) -> Self {
            static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
            let guard = LOCK
                .get_or_init(|| Mutex::new(()))
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (key, value) in vars {
                env::set_var(key, value);
            }
            Self { keys: vars.iter().map(|(key, _)| key.to_string()).collect(), _guard: guard }
        }
    }

    impl Drop for ScopedEnv {
        fn drop(&mut self) {
            for key in &self.keys {
                env::remove_var(key);
            }
        }
    }

    fn with_policy_path(path: impl Into<std::path::PathBuf>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides { policy_path: Some(path.into()), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        }
    }

    #[test]
    fn file_values_expand_environment_references() {
        let _env = ScopedEnv::set(&[("TEST_NEURONX_DB_URL", "sqlite://interpolated.db")]);
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("neuronx.toml");
        fs::write(&path, "[database]\nurl = \"${TEST_NEURONX_DB_URL}\"\n").expect("write config");

        let config = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .expect("config loads");

        assert_eq!(config.database.url, "sqlite://interpolated.db");
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn unset_interpolation_variable_is_reported() {
        let _env = ScopedEnv::set(&[]);
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("neuronx.toml");
        fs::write(&path, "[server]\nbind_address = \"${NEURONX_TEST_UNSET_HOST}\"\n")
            .expect("write config");

        let error = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .expect_err("missing variable");
        assert!(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "NEURONX_TEST_UNSET_HOST")
        );
    }

    #[test]
    fn short_logging_aliases_apply() {
        let _env = ScopedEnv::set(&[("NEURONX_LOG_LEVEL", "warn"), ("NEURONX_LOG_FORMAT", "JSON")]);

        let config = AppConfig::load(LoadOptions::default()).expect("config loads");

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn layers_apply_defaults_then_file_then_env_then_overrides() {
        let _env = ScopedEnv::set(&[
            ("NEURONX_DATABASE_URL", "sqlite://from-env.db"),
            ("NEURONX_SERVER_PORT", "9090"),
        ]);
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("neuronx.toml");
        fs::write(
            &path,
            r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 7070
graceful_shutdown_secs = 5

[logging]
level = "warn"
"#,
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(path),
            overrides: ConfigOverrides {
                database_url: Some("sqlite://from-override.db".to_string()),
                log_level: Some("debug".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("config loads");

        assert_eq!(config.database.url, "sqlite://from-override.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.graceful_shutdown_secs, 5);
        assert_eq!(config.server.bind_address, "127.0.0.1");
    }

    #[test]
    fn required_file_must_exist() {
        let _env = ScopedEnv::set(&[]);
        let error = AppConfig::load(LoadOptions {
            config_path: Some("/definitely/not/here/neuronx.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        })
        .expect_err("file is required");
        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn non_sqlite_database_url_is_rejected() {
        let _env = ScopedEnv::set(&[("NEURONX_DATABASE_URL", "postgres://nope")]);

        let error = AppConfig::load(LoadOptions::default()).expect_err("postgres is unsupported");
        assert!(matches!(error, ConfigError::Validation(ref message) if message.contains("database.url")));
    }

    #[test]
    fn unparseable_numeric_env_value_names_the_variable() {
        let _env = ScopedEnv::set(&[("NEURONX_SERVER_PORT", "eighty")]);

        let error = AppConfig::load(LoadOptions::default()).expect_err("port must be numeric");
        assert!(
            matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "NEURONX_SERVER_PORT")
        );
    }

    #[test]
    fn wrongly_typed_file_value_is_reported() {
        let _env = ScopedEnv::set(&[]);
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("neuronx.toml");
        fs::write(&path, "[database]\ntimeout_secs = \"soon\"\n").expect("write config");

        let error = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .expect_err("timeout must be an integer");
        assert!(matches!(error, ConfigError::Shape(_)));
    }

    #[test]
    fn policy_document_keeps_defaults_for_unspecified_sections() {
        let _env = ScopedEnv::set(&[]);
        let dir = TempDir::new().expect("temp dir");
        let policy_path = dir.path().join("policy.toml");
        fs::write(&policy_path, "version = \"tenant-overrides-3\"\nenforcement_mode = \"monitor_only\"\n")
            .expect("write policy");

        let config = AppConfig::load(with_policy_path(policy_path)).expect("config loads");
        let policy = config.load_policy().expect("policy loads");

        assert_eq!(policy.version, "tenant-overrides-3");
        assert_eq!(policy.enforcement_mode, EnforcementMode::MonitorOnly);
        assert_eq!(policy.retry.max_retries, 5);
    }

    #[test]
    fn missing_policy_file_fails_validation() {
        let _env = ScopedEnv::set(&[]);

        let error = AppConfig::load(with_policy_path("/definitely/not/here/policy.toml"))
            .expect_err("policy file is missing");
        assert!(matches!(error, ConfigError::Validation(ref message) if message.contains("policy.path")));
    }

    #[test]
    fn builtin_policy_is_used_without_path() {
        let policy = AppConfig::default().load_policy().expect("builtin policy");
        assert_eq!(policy.version, "builtin-1");
    }
}
