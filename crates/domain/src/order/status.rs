//! Order lifecycle.

use serde::{Deserialize, Serialize};

/// The status of an order.
///
/// ```text
/// Draft ──► Started ──► Paid ──► Delivered
///   ▲          │
///   └──────────┘ (stock or payment rejected)
/// ```
/// `Canceled` is reachable only through explicit cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Customer is still building the order.
    #[default]
    Draft,

    /// Customer confirmed; stock and payment are being processed.
    Started,

    /// Payment accepted.
    Paid,

    Delivered,

    Canceled,
}

impl OrderStatus {
    /// Returns true if items and vouchers can be changed in this status.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    pub fn can_start(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    pub fn can_finalize(&self) -> bool {
        matches!(self, OrderStatus::Started)
    }

    pub fn can_revert_to_draft(&self) -> bool {
        matches!(self, OrderStatus::Started)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "Draft",
            OrderStatus::Started => "Started",
            OrderStatus::Paid => "Paid",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Canceled => "Canceled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_draft() {
        assert_eq!(OrderStatus::default(), OrderStatus::Draft);
    }

    #[test]
    fn only_draft_allows_item_changes() {
        assert!(OrderStatus::Draft.can_modify_items());
        assert!(!OrderStatus::Started.can_modify_items());
        assert!(!OrderStatus::Paid.can_modify_items());
        assert!(!OrderStatus::Canceled.can_modify_items());
    }

    #[test]
    fn started_can_finalize_or_revert() {
        assert!(OrderStatus::Started.can_finalize());
        assert!(OrderStatus::Started.can_revert_to_draft());
        assert!(!OrderStatus::Draft.can_finalize());
        assert!(!OrderStatus::Paid.can_revert_to_draft());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(!OrderStatus::Paid.is_terminal());
    }

    #[test]
    fn display() {
        assert_eq!(OrderStatus::Started.to_string(), "Started");
    }
}
