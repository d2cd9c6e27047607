//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{AggregateId, CustomerId};
use domain::{CardInfo, Money};

use crate::error::SagaError;

/// Result of a successful payment charge.
#[derive(Debug, Clone)]
pub struct PaymentResult {
    /// The transaction ID assigned by the payment service.
    pub transaction_id: String,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges `amount` for an order to the given card.
    ///
    /// A refused charge is [`SagaError::PaymentDeclined`].
    async fn charge(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        amount: Money,
        card: &CardInfo,
    ) -> Result<PaymentResult, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, (AggregateId, CustomerId, Money)>,
    next_id: u32,
    decline_all: bool,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent charge decline.
    pub fn set_decline_all(&self, decline: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .decline_all = decline;
    }

    pub fn payment_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .len()
    }

    /// Sum of every successful charge.
    pub fn total_charged(&self) -> Money {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .values()
            .map(|(_, _, amount)| *amount)
            .sum()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        amount: Money,
        card: &CardInfo,
    ) -> Result<PaymentResult, SagaError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.decline_all {
            tracing::debug!(%order_id, card = ?card, "charge declined");
            return Err(SagaError::PaymentDeclined(
                "card issuer refused the charge".to_string(),
            ));
        }

        state.next_id += 1;
        let transaction_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(transaction_id.clone(), (order_id, customer_id, amount));

        Ok(PaymentResult { transaction_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> CardInfo {
        CardInfo::new("Ada Lovelace", "4111111111111111", "12/30", "123")
    }

    #[tokio::test]
    async fn charge_records_payment() {
        let service = InMemoryPaymentService::new();

        let result = service
            .charge(
                AggregateId::new(),
                CustomerId::new(),
                Money::from_cents(2700),
                &card(),
            )
            .await
            .unwrap();

        assert_eq!(result.transaction_id, "PAY-0001");
        assert_eq!(service.payment_count(), 1);
        assert_eq!(service.total_charged().cents(), 2700);
    }

    #[tokio::test]
    async fn declined_charge_records_nothing() {
        let service = InMemoryPaymentService::new();
        service.set_decline_all(true);

        let result = service
            .charge(
                AggregateId::new(),
                CustomerId::new(),
                Money::from_cents(100),
                &card(),
            )
            .await;

        assert!(matches!(result, Err(SagaError::PaymentDeclined(_))));
        assert_eq!(service.payment_count(), 0);
    }
}
