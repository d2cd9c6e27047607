//! Discount vouchers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::ValidationResult;

use super::Money;

/// How a voucher reduces an order's subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum VoucherDiscount {
    /// Percentage of the subtotal, 0 to 100.
    Percentage(u32),

    /// Flat amount off the subtotal.
    FixedAmount(Money),
}

impl VoucherDiscount {
    /// Discount this shape yields on `subtotal`, never more than the subtotal.
    pub fn amount_for(&self, subtotal: Money) -> Money {
        let raw = match *self {
            VoucherDiscount::Percentage(percent) => subtotal.percent(percent),
            VoucherDiscount::FixedAmount(amount) => amount,
        };
        raw.min(subtotal).max(Money::zero())
    }
}

/// A discount token identified by its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    id: Uuid,
    code: String,
    discount: VoucherDiscount,
    remaining_quantity: u32,
    active: bool,
    used: bool,
    valid_until: DateTime<Utc>,
    created_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
}

impl Voucher {
    /// Creates an active, unused voucher.
    ///
    /// # Panics
    ///
    /// Panics if `code` is blank, if a percentage exceeds 100 or if a fixed
    /// amount is negative. Callers are expected to have validated these.
    pub fn new(
        code: impl Into<String>,
        discount: VoucherDiscount,
        remaining_quantity: u32,
        valid_until: DateTime<Utc>,
    ) -> Self {
        let code = code.into();
        assert!(!code.trim().is_empty(), "voucher code must not be empty");
        match discount {
            VoucherDiscount::Percentage(p) => {
                assert!(p <= 100, "voucher percentage must be within 0..=100, got {p}")
            }
            VoucherDiscount::FixedAmount(amount) => assert!(
                amount >= Money::zero(),
                "voucher fixed amount must not be negative, got {amount}"
            ),
        }

        Self {
            id: Uuid::new_v4(),
            code,
            discount,
            remaining_quantity,
            active: true,
            used: false,
            valid_until,
            created_at: Utc::now(),
            used_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn discount(&self) -> VoucherDiscount {
        self.discount
    }

    pub fn remaining_quantity(&self) -> u32 {
        self.remaining_quantity
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn used_at(&self) -> Option<DateTime<Utc>> {
        self.used_at
    }

    /// Consumes one use. Taking the last one marks the voucher used.
    pub fn redeem(&mut self, at: DateTime<Utc>) {
        self.remaining_quantity = self.remaining_quantity.saturating_sub(1);
        if self.remaining_quantity == 0 {
            self.used = true;
            self.used_at = Some(at);
        }
    }

    /// Checks every applicability rule against the current time.
    pub fn validate_applicable(&self) -> ValidationResult {
        self.validate_applicable_at(Utc::now())
    }

    /// Checks every applicability rule as of `now`.
    pub fn validate_applicable_at(&self, now: DateTime<Utc>) -> ValidationResult {
        let mut result = ValidationResult::new();
        result
            .ensure(
                self.valid_until >= now,
                "VoucherExpired",
                "This voucher has expired.",
            )
            .ensure(
                self.active,
                "VoucherInactive",
                "This voucher is no longer valid.",
            )
            .ensure(
                !self.used,
                "VoucherAlreadyUsed",
                "This voucher has already been used.",
            )
            .ensure(
                self.remaining_quantity > 0,
                "VoucherUnavailable",
                "This voucher is no longer available.",
            );
        result
    }
}
