//! Order commands.

use common::{AggregateId, CustomerId};

use crate::command::Command;
use crate::validation::ValidationResult;

use super::{CardInfo, MAX_UNIT_PRICE, Money, OrderItem, ProductId, is_valid_item_quantity};

/// Adds a product to the customer's draft, starting one if needed.
#[derive(Debug, Clone)]
pub struct AddItem {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl AddItem {
    pub fn new(
        customer_id: CustomerId,
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            customer_id,
            product_id: product_id.into(),
            name: name.into(),
            quantity,
            unit_price,
        }
    }

    pub fn to_item(&self) -> OrderItem {
        OrderItem::new(
            self.product_id.clone(),
            self.name.clone(),
            self.quantity,
            self.unit_price,
        )
    }
}

impl Command for AddItem {
    fn name(&self) -> &'static str {
        "AddItem"
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_customer(&mut result, self.customer_id);
        check_product(&mut result, &self.product_id);
        result
            .ensure(
                !self.name.trim().is_empty(),
                "NameRequired",
                "Product name is required.",
            )
            .ensure(
                is_valid_item_quantity(self.quantity),
                "QuantityOutOfRange",
                "Quantity must be between 1 and 15.",
            )
            .ensure(
                self.unit_price.is_positive(),
                "PriceRequired",
                "Unit price must be greater than zero.",
            )
            .ensure(
                self.unit_price <= MAX_UNIT_PRICE,
                "PriceTooHigh",
                "Unit price must not exceed $1,000,000.00.",
            );
        result
    }
}

/// Changes the quantity of a row in the customer's draft.
#[derive(Debug, Clone)]
pub struct UpdateItem {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl UpdateItem {
    pub fn new(customer_id: CustomerId, product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            customer_id,
            product_id: product_id.into(),
            quantity,
        }
    }
}

impl Command for UpdateItem {
    fn name(&self) -> &'static str {
        "UpdateItem"
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_customer(&mut result, self.customer_id);
        check_product(&mut result, &self.product_id);
        result.ensure(
            is_valid_item_quantity(self.quantity),
            "QuantityOutOfRange",
            "Quantity must be between 1 and 15.",
        );
        result
    }
}

#[derive(Debug, Clone)]
pub struct RemoveItem {
    pub customer_id: CustomerId,
    pub product_id: ProductId,
}

impl RemoveItem {
    pub fn new(customer_id: CustomerId, product_id: impl Into<ProductId>) -> Self {
        Self {
            customer_id,
            product_id: product_id.into(),
        }
    }
}

impl Command for RemoveItem {
    fn name(&self) -> &'static str {
        "RemoveItem"
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_customer(&mut result, self.customer_id);
        check_product(&mut result, &self.product_id);
        result
    }
}

#[derive(Debug, Clone)]
pub struct ApplyVoucher {
    pub customer_id: CustomerId,
    pub code: String,
}

impl ApplyVoucher {
    pub fn new(customer_id: CustomerId, code: impl Into<String>) -> Self {
        Self {
            customer_id,
            code: code.into(),
        }
    }
}

impl Command for ApplyVoucher {
    fn name(&self) -> &'static str {
        "ApplyVoucher"
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_customer(&mut result, self.customer_id);
        result.ensure(
            !self.code.trim().is_empty(),
            "VoucherCodeRequired",
            "Voucher code is required.",
        );
        result
    }
}

/// Confirms the customer's draft and hands over the card to charge.
#[derive(Debug, Clone)]
pub struct StartOrder {
    pub customer_id: CustomerId,
    pub card: CardInfo,
}

impl StartOrder {
    pub fn new(customer_id: CustomerId, card: CardInfo) -> Self {
        Self { customer_id, card }
    }
}

impl Command for StartOrder {
    fn name(&self) -> &'static str {
        "StartOrder"
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_customer(&mut result, self.customer_id);
        result
            .ensure(
                !self.card.holder_name.trim().is_empty(),
                "CardHolderRequired",
                "Card holder name is required.",
            )
            .ensure(
                is_valid_card_number(&self.card.number),
                "CardNumberInvalid",
                "Card number is invalid.",
            )
            .ensure(
                is_valid_expiration(&self.card.expiration),
                "CardExpirationInvalid",
                "Card expiration must be in MM/YY format.",
            )
            .ensure(
                is_valid_cvv(&self.card.cvv),
                "CardCvvInvalid",
                "CVV must have 3 or 4 digits.",
            );
        result
    }
}

/// Marks a started order as paid.
#[derive(Debug, Clone)]
pub struct FinalizeOrder {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
}

impl FinalizeOrder {
    pub fn new(order_id: AggregateId, customer_id: CustomerId) -> Self {
        Self {
            order_id,
            customer_id,
        }
    }
}

impl Command for FinalizeOrder {
    fn name(&self) -> &'static str {
        "FinalizeOrder"
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_order(&mut result, self.order_id);
        result
    }
}

/// Returns a started order to draft after stock was rejected.
#[derive(Debug, Clone)]
pub struct CancelProcessing {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
}

impl CancelProcessing {
    pub fn new(order_id: AggregateId, customer_id: CustomerId) -> Self {
        Self {
            order_id,
            customer_id,
        }
    }
}

impl Command for CancelProcessing {
    fn name(&self) -> &'static str {
        "CancelProcessing"
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_order(&mut result, self.order_id);
        result
    }
}

/// Returns a started order to draft after payment was rejected and asks
/// inventory to credit the debited stock back.
#[derive(Debug, Clone)]
pub struct CancelProcessingAndReverseStock {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
}

impl CancelProcessingAndReverseStock {
    pub fn new(order_id: AggregateId, customer_id: CustomerId) -> Self {
        Self {
            order_id,
            customer_id,
        }
    }
}

impl Command for CancelProcessingAndReverseStock {
    fn name(&self) -> &'static str {
        "CancelProcessingAndReverseStock"
    }

    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_order(&mut result, self.order_id);
        result
    }
}

/// Every command the order handler accepts.
#[derive(Debug, Clone)]
pub enum OrderCommand {
    AddItem(AddItem),
    UpdateItem(UpdateItem),
    RemoveItem(RemoveItem),
    ApplyVoucher(ApplyVoucher),
    StartOrder(StartOrder),
    FinalizeOrder(FinalizeOrder),
    CancelProcessing(CancelProcessing),
    CancelProcessingAndReverseStock(CancelProcessingAndReverseStock),
}

impl OrderCommand {
    fn inner(&self) -> &dyn Command {
        match self {
            OrderCommand::AddItem(c) => c,
            OrderCommand::UpdateItem(c) => c,
            OrderCommand::RemoveItem(c) => c,
            OrderCommand::ApplyVoucher(c) => c,
            OrderCommand::StartOrder(c) => c,
            OrderCommand::FinalizeOrder(c) => c,
            OrderCommand::CancelProcessing(c) => c,
            OrderCommand::CancelProcessingAndReverseStock(c) => c,
        }
    }
}

impl Command for OrderCommand {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn validate(&self) -> ValidationResult {
        self.inner().validate()
    }
}

macro_rules! impl_from_command {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for OrderCommand {
                fn from(command: $variant) -> Self {
                    OrderCommand::$variant(command)
                }
            }
        )*
    };
}

impl_from_command!(
    AddItem,
    UpdateItem,
    RemoveItem,
    ApplyVoucher,
    StartOrder,
    FinalizeOrder,
    CancelProcessing,
    CancelProcessingAndReverseStock,
);

fn check_customer(result: &mut ValidationResult, customer_id: CustomerId) {
    result.ensure(
        !customer_id.is_nil(),
        "CustomerRequired",
        "Customer id is required.",
    );
}

fn check_product(result: &mut ValidationResult, product_id: &ProductId) {
    result.ensure(
        !product_id.is_blank(),
        "ProductRequired",
        "Product id is required.",
    );
}

fn check_order(result: &mut ValidationResult, order_id: AggregateId) {
    result.ensure(!order_id.is_nil(), "OrderRequired", "Order id is required.");
}

/// 13 to 19 digits (spaces and dashes allowed) passing the Luhn checksum.
fn is_valid_card_number(number: &str) -> bool {
    let mut digits = Vec::with_capacity(19);
    for c in number.chars() {
        match c {
            '0'..='9' => digits.push(c as u32 - '0' as u32),
            ' ' | '-' => {}
            _ => return false,
        }
    }

    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn is_valid_expiration(expiration: &str) -> bool {
    let Some((month, year)) = expiration.split_once('/') else {
        return false;
    };
    let two_digits = |s: &str| s.len() == 2 && s.chars().all(|c| c.is_ascii_digit());
    if !two_digits(month) || !two_digits(year) {
        return false;
    }
    matches!(month.parse::<u32>(), Ok(1..=12))
}

fn is_valid_cvv(cvv: &str) -> bool {
    (3..=4).contains(&cvv.len()) && cvv.chars().all(|c| c.is_ascii_digit())
}
