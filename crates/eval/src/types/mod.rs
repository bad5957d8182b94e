//! Runtime types of the engine: values, contexts, messages and results.
//!
//! These are distinct from the edc-core metadata types: metadata is fixed
//! per form version, everything here is produced per validation call.

pub mod context;
pub mod outcome;
pub mod result;
pub mod value;

pub use context::ValueContext;
pub use outcome::{FieldOutcome, Message, MessageKind};
pub use result::{CompletionStats, FieldAnnotation, QueryCandidate, ValidationResult};
pub use value::Value;

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors raised while preparing engine inputs.
///
/// Nothing in a validation pass returns these: rule failures are logged and
/// skipped, and invalid data is reported through [`ValidationResult`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// Field values must arrive as a JSON object keyed by field id.
    #[error("value context must be a JSON object, got {found}")]
    InvalidContext { found: &'static str },
}
