//! Rule checks that report every violation instead of stopping at the first.

use common::DomainNotification;
use serde::{Deserialize, Serialize};

/// One broken rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    /// Stable identifier of the rule, e.g. `"VoucherExpired"`.
    pub code: String,
    pub message: String,
}

/// Outcome of evaluating a set of rules. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    failures: Vec<ValidationFailure>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure unless `condition` holds.
    pub fn ensure(
        &mut self,
        condition: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> &mut Self {
        if !condition {
            self.failures.push(ValidationFailure {
                code: code.into(),
                message: message.into(),
            });
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    pub fn has_failure(&self, code: &str) -> bool {
        self.failures.iter().any(|f| f.code == code)
    }

    /// One notification per failure, keyed by the failure code.
    pub fn to_notifications(&self) -> Vec<DomainNotification> {
        self.failures
            .iter()
            .map(|f| DomainNotification::new(f.code.clone(), f.message.clone()))
            .collect()
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<&str> = self.failures.iter().map(|f| f.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}
