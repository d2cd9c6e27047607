//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

/// Smallest quantity a single order row may hold.
pub const MIN_ITEM_QUANTITY: u32 = 1;

/// Largest quantity a single order row may hold.
pub const MAX_ITEM_QUANTITY: u32 = 15;

/// Largest unit price an item may carry, in cents ($1,000,000.00).
///
/// Keeps every order total far inside the range of [`Money`].
pub const MAX_UNIT_PRICE: Money = Money(100_000_000);

/// Returns true if `quantity` is allowed for a single order row.
pub fn is_valid_item_quantity(quantity: u32) -> bool {
    (MIN_ITEM_QUANTITY..=MAX_ITEM_QUANTITY).contains(&quantity)
}

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Money amount in cents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `self * quantity`, or `None` on overflow.
    pub fn checked_times(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    /// `self + other`, or `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// `self * quantity`, clamped to the representable range.
    pub fn saturating_times(&self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(quantity)))
    }

    /// `percent`% of this amount, rounded half away from zero to the cent.
    pub fn percent(&self, percent: u32) -> Money {
        let scaled = i128::from(self.0) * i128::from(percent);
        let rounded = if scaled >= 0 {
            (scaled + 50) / 100
        } else {
            (scaled - 50) / 100
        };
        Money(rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }

    /// Subtracts `other`, never going below zero.
    pub fn saturating_sub(&self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// Saturates at the bounds of `i64` instead of overflowing.
impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// A row of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            quantity,
            unit_price,
        }
    }

    /// `unit_price * quantity`, saturating.
    pub fn line_total(&self) -> Money {
        self.unit_price.saturating_times(self.quantity)
    }

    /// `unit_price * quantity`, or `None` if it does not fit.
    pub fn checked_line_total(&self) -> Option<Money> {
        self.unit_price.checked_times(self.quantity)
    }

    /// The part of the row the inventory context cares about.
    pub fn to_line(&self) -> OrderLine {
        OrderLine {
            product_id: self.product_id.clone(),
            quantity: self.quantity,
        }
    }
}

/// Product and quantity, as exchanged with the inventory context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Payment card details supplied when a customer confirms an order.
///
/// Only ever travels inside the payment-initiation integration event; it is
/// never part of a persisted domain event.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInfo {
    pub holder_name: String,
    pub number: String,
    /// `MM/YY`
    pub expiration: String,
    pub cvv: String,
}

impl CardInfo {
    pub fn new(
        holder_name: impl Into<String>,
        number: impl Into<String>,
        expiration: impl Into<String>,
        cvv: impl Into<String>,
    ) -> Self {
        Self {
            holder_name: holder_name.into(),
            number: number.into(),
            expiration: expiration.into(),
            cvv: cvv.into(),
        }
    }

    /// The card number with everything but the last four digits hidden.
    pub fn masked_number(&self) -> String {
        let digits: Vec<char> = self.number.chars().filter(char::is_ascii_digit).collect();
        let visible: String = digits[digits.len().saturating_sub(4)..].iter().collect();
        format!("****{visible}")
    }
}

impl std::fmt::Debug for CardInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardInfo")
            .field("holder_name", &self.holder_name)
            .field("number", &self.masked_number())
            .field("expiration", &self.expiration)
            .field("cvv", &"***")
            .finish()
    }
}
