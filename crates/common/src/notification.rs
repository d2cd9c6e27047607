//! User-facing notifications raised while handling commands.

use serde::{Deserialize, Serialize};

/// A message meant for whoever issued a command.
///
/// Notifications report recoverable problems (bad input, a missing order, an
/// unusable voucher). They are data, not errors: a handler that raises one
/// still returns normally, with a `false` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainNotification {
    /// What the notification is about, e.g. `"order"` or a validation code.
    pub key: String,

    /// Human readable description.
    pub message: String,
}

impl DomainNotification {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DomainNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.key, self.message)
    }
}
