// crates/callosum-core/src/core/identifiers.rs
// ============================================================================
// Module: Callosum Identifiers
// Description: Canonical opaque identifiers used across the action gate.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! Callosum. Identifiers are opaque and serialize as strings. Validation is
//! handled at the type's constructor rather than deferred to call sites.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Error
// ============================================================================

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// The identifier was empty.
    #[error("{kind} must not be empty")]
    Empty {
        /// The identifier kind that failed validation.
        kind: &'static str,
    },
    /// A context key was missing its `namespace:identifier` separator.
    ///
    /// Non-fatal: [`ContextKey::new`] only rejects empty strings, so a key
    /// without a separator is still a valid opaque token. This variant
    /// exists for [`ContextKey::namespace`] callers who want to detect the
    /// advisory convention's absence.
    #[error("context key has no namespace separator: {0}")]
    NoNamespace(String),
}

// ============================================================================
// SECTION: Instance Identifier
// ============================================================================

/// Identifier for a concurrent session of the same logical agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Creates a new instance identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Empty`] when `id` is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentifierError::Empty { kind: "instance id" });
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Context Key
// ============================================================================

/// Canonical identifier of the external resource a tool call affects.
///
/// Treated as an opaque equality-comparable token. The `namespace:identifier`
/// form is advisory, not enforced: only emptiness is validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a new context key.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Empty`] when `key` is empty.
    pub fn new(key: impl Into<String>) -> Result<Self, IdentifierError> {
        let key = key.into();
        if key.is_empty() {
            return Err(IdentifierError::Empty { kind: "context key" });
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the advisory namespace prefix, if present.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::NoNamespace`] when the key contains no
    /// `:` separator.
    pub fn namespace(&self) -> Result<&str, IdentifierError> {
        self.0
            .split_once(':')
            .map(|(namespace, _)| namespace)
            .ok_or_else(|| IdentifierError::NoNamespace(self.0.clone()))
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Rule Name
// ============================================================================

/// Name of the classifier rule that produced a decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleName(String);

impl RuleName {
    /// Creates a new rule name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the rule name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
