//! Stand-in for the inventory and payment contexts.
//!
//! Consumes the order context's requests from a single queue, so for any
//! order the stock debit is settled before the charge is attempted, and
//! answers with the integration events those contexts would publish.

use std::collections::HashSet;
use std::sync::Arc;

use common::AggregateId;
use domain::{EventPublisher, IntegrationEvent};

use crate::error::SagaError;
use crate::services::{InventoryService, PaymentService};

pub struct CollaboratorStage<I, P>
where
    I: InventoryService,
    P: PaymentService,
{
    inventory: I,
    payment: P,
    publisher: Arc<dyn EventPublisher>,
    /// Orders whose stock is debited and whose payment is still pending.
    debited: HashSet<AggregateId>,
}

impl<I, P> CollaboratorStage<I, P>
where
    I: InventoryService,
    P: PaymentService,
{
    pub fn new(inventory: I, payment: P, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            inventory,
            payment,
            publisher,
            debited: HashSet::new(),
        }
    }

    #[tracing::instrument(skip(self, event), fields(event = event.name(), order_id = %event.order_id()))]
    pub async fn handle(&mut self, event: IntegrationEvent) -> Result<(), SagaError> {
        match event {
            IntegrationEvent::StockReservationRequested {
                order_id,
                customer_id,
                items,
                ..
            } => match self.inventory.debit_order(order_id, &items).await {
                Ok(()) => {
                    self.debited.insert(order_id);
                }
                Err(e) => {
                    tracing::info!(error = %e, "stock reservation rejected");
                    self.publisher
                        .publish(IntegrationEvent::stock_reservation_rejected(
                            order_id,
                            customer_id,
                        ))
                        .await?;
                }
            },

            IntegrationEvent::OrderStarted {
                order_id,
                customer_id,
                total_value,
                card,
                ..
            } => {
                if !self.debited.remove(&order_id) {
                    tracing::debug!("stock not debited, payment skipped");
                    return Ok(());
                }

                let outcome = match self
                    .payment
                    .charge(order_id, customer_id, total_value, &card)
                    .await
                {
                    Ok(result) => {
                        tracing::info!(transaction_id = %result.transaction_id, %total_value, "payment accepted");
                        IntegrationEvent::payment_accepted(order_id, customer_id)
                    }
                    Err(SagaError::PaymentDeclined(reason)) => {
                        tracing::info!(%reason, "payment rejected");
                        IntegrationEvent::payment_rejected(order_id, customer_id)
                    }
                    Err(e) => return Err(e),
                };
                self.publisher.publish(outcome).await?;
            }

            IntegrationEvent::StockReversalRequested {
                order_id, items, ..
            } => {
                self.inventory.credit_order(order_id, &items).await?;
            }

            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::CustomerId;
    use domain::{CardInfo, Money, OrderLine, ProductId, RecordingPublisher};

    use super::*;
    use crate::services::{InMemoryInventoryService, InMemoryPaymentService};

    struct Setup {
        stage: CollaboratorStage<InMemoryInventoryService, InMemoryPaymentService>,
        inventory: InMemoryInventoryService,
        payment: InMemoryPaymentService,
        publisher: RecordingPublisher,
    }

    fn setup() -> Setup {
        let inventory = InMemoryInventoryService::with_stock([("SKU-1", 5)]);
        let payment = InMemoryPaymentService::new();
        let publisher = RecordingPublisher::new();
        let stage = CollaboratorStage::new(
            inventory.clone(),
            payment.clone(),
            Arc::new(publisher.clone()),
        );
        Setup {
            stage,
            inventory,
            payment,
            publisher,
        }
    }

    fn lines(quantity: u32) -> Vec<OrderLine> {
        vec![OrderLine {
            product_id: ProductId::new("SKU-1"),
            quantity,
        }]
    }

    fn reservation(order_id: AggregateId, customer_id: CustomerId, quantity: u32) -> IntegrationEvent {
        IntegrationEvent::StockReservationRequested {
            order_id,
            customer_id,
            items: lines(quantity),
            occurred_at: Utc::now(),
        }
    }

    fn started(order_id: AggregateId, customer_id: CustomerId) -> IntegrationEvent {
        IntegrationEvent::OrderStarted {
            order_id,
            customer_id,
            items: lines(2),
            total_value: Money::from_cents(2000),
            card: CardInfo::new("Ada Lovelace", "4111111111111111", "12/30", "123"),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn debited_order_gets_charged() {
        let mut s = setup();
        let (order_id, customer_id) = (AggregateId::new(), CustomerId::new());

        s.stage.handle(reservation(order_id, customer_id, 2)).await.unwrap();
        s.stage.handle(started(order_id, customer_id)).await.unwrap();

        assert_eq!(s.inventory.stock_of(&ProductId::new("SKU-1")), 3);
        assert_eq!(s.payment.payment_count(), 1);
        assert_eq!(s.publisher.names(), vec!["PaymentAccepted"]);
    }

    #[tokio::test]
    async fn rejected_stock_skips_payment() {
        let mut s = setup();
        let (order_id, customer_id) = (AggregateId::new(), CustomerId::new());

        s.stage.handle(reservation(order_id, customer_id, 9)).await.unwrap();
        s.stage.handle(started(order_id, customer_id)).await.unwrap();

        assert_eq!(s.publisher.names(), vec!["StockReservationRejected"]);
        assert_eq!(s.payment.payment_count(), 0);
        assert_eq!(s.inventory.stock_of(&ProductId::new("SKU-1")), 5);
    }

    #[tokio::test]
    async fn declined_payment_is_published_and_reversal_credits() {
        let mut s = setup();
        s.payment.set_decline_all(true);
        let (order_id, customer_id) = (AggregateId::new(), CustomerId::new());

        s.stage.handle(reservation(order_id, customer_id, 2)).await.unwrap();
        s.stage.handle(started(order_id, customer_id)).await.unwrap();
        assert_eq!(s.publisher.names(), vec!["PaymentRejected"]);
        assert_eq!(s.inventory.stock_of(&ProductId::new("SKU-1")), 3);

        s.stage
            .handle(IntegrationEvent::StockReversalRequested {
                order_id,
                customer_id,
                items: lines(2),
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(s.inventory.stock_of(&ProductId::new("SKU-1")), 5);
    }
}
