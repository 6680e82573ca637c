// crates/callosum-config/src/error.rs
// ============================================================================
// Module: Callosum Config Error
// Description: Failure modes for config and rule-file loading.
// Purpose: Fail closed on malformed input while staying specific about why.
// Dependencies: thiserror
// ============================================================================

use thiserror::Error;

use callosum_core::classifier::ClassifierCompileError;

/// Error loading or validating configuration or a rule file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config or rule file could not be read from disk.
    #[error("reading {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file was not valid TOML.
    #[error("parsing {path} as TOML: {source}")]
    Toml {
        /// Path that failed to parse.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// The rule file was not valid JSON.
    #[error("parsing {path} as JSON: {source}")]
    Json {
        /// Path that failed to parse.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A loaded rule list failed to compile (out-of-range tier, invalid
    /// command pattern).
    #[error(transparent)]
    Rules(#[from] ClassifierCompileError),
    /// A required field was missing or a value failed cross-field checks.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
