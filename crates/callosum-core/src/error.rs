// crates/callosum-core/src/error.rs
// ============================================================================
// Module: Callosum Core Error
// Description: Top-level error type for classifier compilation and identifier
// construction, surfaced to callers who load rules from configuration.
// Purpose: Give downstream crates one error type to match on instead of
// reaching into classifier/identifier submodules.
// Dependencies: crate::{classifier, core}, thiserror
// ============================================================================

use thiserror::Error;

use crate::classifier::ClassifierCompileError;
use crate::core::IdentifierError;

/// Error raised while compiling a rule list or constructing the identifiers
/// it references.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// A rule failed to compile.
    #[error(transparent)]
    Compile(#[from] ClassifierCompileError),
    /// An identifier referenced by a rule or call failed validation.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}
