//! Command contract.

use crate::validation::ValidationResult;

/// An intent to change the system, checked structurally before any
/// aggregate is loaded.
pub trait Command: Send + Sync {
    /// Command name used in logs, metrics and notification keys.
    fn name(&self) -> &'static str;

    /// Checks that every required field is present and well formed.
    fn validate(&self) -> ValidationResult;

    fn is_valid(&self) -> bool {
        self.validate().is_valid()
    }
}
