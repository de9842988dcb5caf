//! Configuration for lockstep, read from `lockstep.toml`.
//!
//! Settings are layered: file, then environment, then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [gate]
//! phase_timeout_secs = 30   # 0 waits forever
//!
//! [store]
//! name = "lockstep"
//! # path = "lockstep.db"
//! isolation = "read-uncommitted"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LogFormat;
use crate::store::Isolation;

/// Default config file name inside the project directory.
pub const CONFIG_FILE_NAME: &str = "lockstep.toml";

/// Overrides `[gate] phase_timeout_secs`.
pub const ENV_PHASE_TIMEOUT: &str = "LOCKSTEP_PHASE_TIMEOUT_SECS";

/// Overrides `[store] path`.
pub const ENV_DB_PATH: &str = "LOCKSTEP_DB_PATH";

/// Settings for the phase gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSection {
    /// Seconds an actor may wait for its turn; 0 waits forever
    #[serde(default = "default_phase_timeout_secs")]
    pub phase_timeout_secs: u64,
}

fn default_phase_timeout_secs() -> u64 {
    30
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            phase_timeout_secs: default_phase_timeout_secs(),
        }
    }
}

/// Settings for the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Prefix of the shared-cache in-memory database name
    #[serde(default = "default_store_name")]
    pub name: String,
    /// Database file; in-memory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Isolation used when a run does not pick one
    #[serde(default)]
    pub isolation: Isolation,
}

fn default_store_name() -> String {
    "lockstep".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            name: default_store_name(),
            path: None,
            isolation: Isolation::default(),
        }
    }
}

/// Settings for log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter directive, e.g. "info" or "lockstep=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Contents of `lockstep.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockstepToml {
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl LockstepToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse lockstep.toml")
    }

    /// Load `lockstep.toml` from `dir`, or defaults if the file doesn't exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize lockstep.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Phase timeout in seconds, with fallback to environment variable.
    pub fn phase_timeout_secs(&self) -> u64 {
        std::env::var(ENV_PHASE_TIMEOUT)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.gate.phase_timeout_secs)
    }

    /// Store path, with fallback to environment variable.
    pub fn store_path(&self) -> Option<PathBuf> {
        std::env::var(ENV_DB_PATH)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| self.store.path.clone())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.store.name.is_empty() {
            warnings.push("Store name must not be empty".to_string());
        } else if !self
            .store
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            warnings.push(format!(
                "Invalid store name '{}': use letters, digits, '-' or '_'",
                self.store.name
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging level '{}': should be a filter directive such as 'info' or 'lockstep=debug'",
                self.logging.level
            ));
        }

        if let Ok(value) = std::env::var(ENV_PHASE_TIMEOUT)
            && value.trim().parse::<u64>().is_err()
        {
            warnings.push(format!(
                "Ignoring {}='{}': expected a number of seconds",
                ENV_PHASE_TIMEOUT, value
            ));
        }

        warnings
    }
}

/// Resolved configuration for one invocation.
///
/// Merges `lockstep.toml`, environment variables and CLI flags.
#[derive(Debug, Clone)]
pub struct LockstepConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Config file in effect (may not exist)
    pub config_file: PathBuf,
    /// Parsed lockstep.toml
    pub toml: LockstepToml,
    /// CLI override: verbose mode
    pub verbose: bool,
}

impl LockstepConfig {
    /// Load configuration for `project_dir`.
    ///
    /// An explicit `config_file` must exist; the default location may not.
    pub fn resolve(project_dir: &Path, config_file: Option<&Path>, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let (config_file, toml) = match config_file {
            Some(path) => (path.to_path_buf(), LockstepToml::load(path)?),
            None => (
                project_dir.join(CONFIG_FILE_NAME),
                LockstepToml::load_or_default(&project_dir)?,
            ),
        };

        Ok(Self {
            project_dir,
            config_file,
            toml,
            verbose,
        })
    }

    /// Bound on a single wait for a turn (env → file → default).
    pub fn phase_timeout(&self) -> Option<Duration> {
        match self.toml.phase_timeout_secs() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Store settings with environment overrides applied.
    ///
    /// A relative store path is resolved against the project directory.
    pub fn store_settings(&self) -> StoreSection {
        let path = self.toml.store_path().map(|p| {
            if p.is_relative() {
                self.project_dir.join(p)
            } else {
                p
            }
        });
        StoreSection {
            path,
            ..self.toml.store.clone()
        }
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() -> (Option<String>, Option<String>) {
        let saved = (
            std::env::var(ENV_PHASE_TIMEOUT).ok(),
            std::env::var(ENV_DB_PATH).ok(),
        );
        unsafe {
            std::env::remove_var(ENV_PHASE_TIMEOUT);
            std::env::remove_var(ENV_DB_PATH);
        }
        saved
    }

    fn restore_env(saved: (Option<String>, Option<String>)) {
        unsafe {
            match saved.0 {
                Some(v) => std::env::set_var(ENV_PHASE_TIMEOUT, v),
                None => std::env::remove_var(ENV_PHASE_TIMEOUT),
            }
            match saved.1 {
                Some(v) => std::env::set_var(ENV_DB_PATH, v),
                None => std::env::remove_var(ENV_DB_PATH),
            }
        }
    }

    #[test]
    fn test_parse_empty() {
        let toml = LockstepToml::parse("").unwrap();
        assert_eq!(toml.gate.phase_timeout_secs, 30);
        assert_eq!(toml.store.name, "lockstep");
        assert_eq!(toml.store.path, None);
        assert_eq!(toml.store.isolation, Isolation::ReadUncommitted);
        assert_eq!(toml.logging.level, "info");
        assert_eq!(toml.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_all_sections() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let content = r#"
[gate]
phase_timeout_secs = 5

[store]
name = "anomalies"
path = "runs.db"
isolation = "serializable"

[logging]
level = "lockstep=debug"
format = "json"
"#;
        let toml = LockstepToml::parse(content).unwrap();
        assert_eq!(toml.gate.phase_timeout_secs, 5);
        assert_eq!(toml.store.name, "anomalies");
        assert_eq!(toml.store.path, Some(PathBuf::from("runs.db")));
        assert_eq!(toml.store.isolation, Isolation::Serializable);
        assert_eq!(toml.logging.format, LogFormat::Json);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_isolation() {
        let content = r#"
[store]
isolation = "snapshot"
"#;
        assert!(LockstepToml::parse(content).is_err());
    }

    #[test]
    fn test_validate_bad_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        let content = r#"
[store]
name = "no spaces?"

[logging]
level = "lockstep=loud"
"#;
        let toml = LockstepToml::parse(content).unwrap();
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("Invalid store name"));
        assert!(warnings[1].contains("Invalid logging level"));

        restore_env(saved);
    }

    #[test]
    fn test_env_overrides_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        let toml = LockstepToml::parse("[gate]\nphase_timeout_secs = 9\n").unwrap();
        assert_eq!(toml.phase_timeout_secs(), 9);

        unsafe { std::env::set_var(ENV_PHASE_TIMEOUT, "2") };
        assert_eq!(toml.phase_timeout_secs(), 2);

        unsafe { std::env::set_var(ENV_PHASE_TIMEOUT, "soon") };
        assert_eq!(toml.phase_timeout_secs(), 9);
        assert_eq!(toml.validate().len(), 1);

        unsafe { std::env::set_var(ENV_DB_PATH, "/tmp/override.db") };
        assert_eq!(toml.store_path(), Some(PathBuf::from("/tmp/override.db")));

        restore_env(saved);
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut toml = LockstepToml::default();
        toml.gate.phase_timeout_secs = 0;
        toml.store.isolation = Isolation::RepeatableRead;
        toml.save(&path).unwrap();

        let loaded = LockstepToml::load(&path).unwrap();
        assert_eq!(loaded.gate.phase_timeout_secs, 0);
        assert_eq!(loaded.store.isolation, Isolation::RepeatableRead);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = LockstepToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.gate.phase_timeout_secs, 30);
    }

    #[test]
    fn test_resolve_uses_project_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[gate]\nphase_timeout_secs = 0\n\n[store]\npath = \"data/lockstep.db\"\n",
        )
        .unwrap();

        let config = LockstepConfig::resolve(dir.path(), None, true).unwrap();
        assert!(config.verbose);
        assert_eq!(config.phase_timeout(), None);
        let store = config.store_settings();
        assert_eq!(
            store.path,
            Some(config.project_dir.join("data").join("lockstep.db"))
        );
        assert_eq!(store.name, "lockstep");

        restore_env(saved);
    }

    #[test]
    fn test_resolve_explicit_file_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("other.toml");
        let err = LockstepConfig::resolve(dir.path(), Some(&missing), false).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_default_timeout() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        let dir = tempdir().unwrap();
        let config = LockstepConfig::resolve(dir.path(), None, false).unwrap();
        assert_eq!(config.phase_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.store_settings().path, None);

        restore_env(saved);
    }
}
