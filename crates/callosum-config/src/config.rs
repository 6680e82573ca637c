// crates/callosum-config/src/config.rs
// ============================================================================
// Module: Callosum Configuration
// Description: Loads callosum.toml plus CALLOSUM_-prefixed env overrides.
// Purpose: Single source of truth for the hook surface's runtime knobs.
// Dependencies: callosum-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with a fixed file-size ceiling;
//! every field has a default so a minimal (or missing) file still produces a
//! usable config. Environment variables prefixed `CALLOSUM_` override
//! individual fields after the file is parsed, matching the resolution order
//! most command-line tools in this ecosystem use: defaults, then file, then
//! environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use callosum_core::core::InstanceId;
use callosum_core::gate::DuplicatePolicy;
use serde::Deserialize;

use crate::error::ConfigError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "callosum.toml";
/// Environment variable used to override the config path.
const CONFIG_ENV_VAR: &str = "CALLOSUM_CONFIG";
/// Maximum configuration file size, in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Default advisory lock lifetime, in milliseconds.
const DEFAULT_LOCK_EXPIRY_MS: u64 = 300_000;
/// Default duplicate-detection window, in milliseconds.
const DEFAULT_RECENT_WINDOW_MS: u64 = 3_600_000;
/// Default remote-transport request timeout, in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

const fn default_lock_expiry_ms() -> u64 {
    DEFAULT_LOCK_EXPIRY_MS
}

const fn default_recent_window_ms() -> u64 {
    DEFAULT_RECENT_WINDOW_MS
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".callosum")
}

// ============================================================================
// SECTION: Mode
// ============================================================================

/// Where the gate's coordination state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// A file-backed coordination store under `state_dir`, local to this
    /// process or this machine.
    Local,
    /// An RPC client of a `callosum-server` instance at `server_url`.
    Remote,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Local
    }
}

// ============================================================================
// SECTION: Duplicate Policy (wire form)
// ============================================================================

/// Config-file spelling of [`DuplicatePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum DuplicatePolicyConfig {
    /// See [`DuplicatePolicy::IncludeSelf`].
    IncludeSelf,
    /// See [`DuplicatePolicy::OthersOnly`].
    OthersOnly,
}

impl Default for DuplicatePolicyConfig {
    fn default() -> Self {
        Self::IncludeSelf
    }
}

impl From<DuplicatePolicyConfig> for DuplicatePolicy {
    fn from(value: DuplicatePolicyConfig) -> Self {
        match value {
            DuplicatePolicyConfig::IncludeSelf => Self::IncludeSelf,
            DuplicatePolicyConfig::OthersOnly => Self::OthersOnly,
        }
    }
}

// ============================================================================
// SECTION: Callosum Config
// ============================================================================

/// Runtime configuration for a Callosum gate instance.
#[derive(Debug, Clone, Deserialize)]
pub struct CallosumConfig {
    /// Directory holding the local file-backed store's state. Unused in
    /// remote mode.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Advisory lock lifetime, in milliseconds.
    #[serde(default = "default_lock_expiry_ms")]
    pub lock_expiry_ms: u64,
    /// Duplicate-detection and conflict window, in milliseconds.
    #[serde(default = "default_recent_window_ms")]
    pub recent_window_ms: u64,
    /// Identifier for this concurrent session. Required; no default, since
    /// a shared default would silently merge distinct sessions' activity.
    pub instance_id: String,
    /// Where coordination state lives.
    #[serde(default)]
    pub mode: Mode,
    /// Base URL of a `callosum-server` instance. Required when `mode` is
    /// `remote`.
    #[serde(default)]
    pub server_url: Option<String>,
    /// Remote-transport request timeout, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Self-duplicate detection policy for the decision procedure.
    #[serde(default, rename = "duplicate_policy")]
    duplicate_policy: DuplicatePolicyConfig,
    /// Path to the rule file, relative to the config file's directory if
    /// relative.
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
}

impl CallosumConfig {
    /// Loads configuration from `path`, or the default search (`$CALLOSUM_CONFIG`,
    /// then `./callosum.toml`) when `path` is `None`, then applies
    /// `CALLOSUM_`-prefixed environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, is not valid
    /// TOML, exceeds the size ceiling, or fails cross-field validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let mut config = match resolved {
            Some(resolved) => Self::load_file(&resolved)?,
            None => toml::from_str("instance_id = \"\"")
                .map_err(|source| ConfigError::Toml { path: DEFAULT_CONFIG_NAME.to_string(), source: Box::new(source) })?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let metadata = fs::metadata(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "{} exceeds the {MAX_CONFIG_FILE_SIZE}-byte config size limit",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        toml::from_str(&content)
            .map_err(|source| ConfigError::Toml { path: path.display().to_string(), source: Box::new(source) })
    }

    /// Overwrites fields with `CALLOSUM_*` environment variables, when set.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("CALLOSUM_STATE_DIR") {
            self.state_dir = PathBuf::from(value);
        }
        if let Ok(value) = env::var("CALLOSUM_INSTANCE_ID") {
            self.instance_id = value;
        }
        if let Ok(value) = env::var("CALLOSUM_LOCK_EXPIRY_MS") {
            if let Ok(parsed) = value.parse() {
                self.lock_expiry_ms = parsed;
            }
        }
        if let Ok(value) = env::var("CALLOSUM_RECENT_WINDOW_MS") {
            if let Ok(parsed) = value.parse() {
                self.recent_window_ms = parsed;
            }
        }
        if let Ok(value) = env::var("CALLOSUM_SERVER_URL") {
            self.server_url = Some(value);
        }
        if let Ok(value) = env::var("CALLOSUM_MODE") {
            match value.to_lowercase().as_str() {
                "local" => self.mode = Mode::Local,
                "remote" => self.mode = Mode::Remote,
                _ => {}
            }
        }
    }

    /// Validates cross-field invariants not expressible through defaults
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `instance_id` is empty or
    /// `mode` is `remote` without a `server_url`.
    fn validate(&self) -> Result<(), ConfigError> {
        InstanceId::new(self.instance_id.clone())
            .map_err(|_err| ConfigError::Invalid("instance_id must not be empty".to_string()))?;
        if self.mode == Mode::Remote && self.server_url.is_none() {
            return Err(ConfigError::Invalid("mode = \"remote\" requires server_url".to_string()));
        }
        Ok(())
    }

    /// Returns the configured self-duplicate detection policy.
    #[must_use]
    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy.into()
    }
}

/// Resolves the config path: explicit `path`, else `$CALLOSUM_CONFIG`, else
/// `./callosum.toml` if it exists, else `None` (defaults apply).
fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path.to_path_buf());
    }
    if let Ok(value) = env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(value));
    }
    let default_path = PathBuf::from(DEFAULT_CONFIG_NAME);
    default_path.exists().then_some(default_path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::CallosumConfig;
    use super::Mode;

    fn write_toml(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn defaults_fill_in_every_field_but_instance_id() {
        let file = write_toml("instance_id = \"agent-1\"\n");
        let config = CallosumConfig::load(Some(file.path())).expect("loads");
        assert_eq!(config.lock_expiry_ms, 300_000);
        assert_eq!(config.recent_window_ms, 3_600_000);
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.mode, Mode::Local);
    }

    #[test]
    fn empty_instance_id_is_rejected() {
        let file = write_toml("instance_id = \"\"\n");
        let result = CallosumConfig::load(Some(file.path()));
        assert!(result.is_err());
    }

    #[test]
    fn remote_mode_without_server_url_is_rejected() {
        let file = write_toml("instance_id = \"agent-1\"\nmode = \"remote\"\n");
        let result = CallosumConfig::load(Some(file.path()));
        assert!(result.is_err());
    }

    #[test]
    fn remote_mode_with_server_url_loads() {
        let file = write_toml(
            "instance_id = \"agent-1\"\nmode = \"remote\"\nserver_url = \"http://localhost:8080\"\n",
        );
        let config = CallosumConfig::load(Some(file.path())).expect("loads");
        assert_eq!(config.mode, Mode::Remote);
    }
}
