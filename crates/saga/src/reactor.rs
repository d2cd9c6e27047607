//! Translates external outcomes into follow-up order commands.

use std::sync::Arc;

use domain::{
    CancelProcessing, CancelProcessingAndReverseStock, Command, CommandSender, FinalizeOrder,
    IntegrationEvent, OrderCommand,
};

use crate::error::SagaError;

/// Stateless reactor driving an order towards payment or back to draft.
///
/// | inbound                    | outbound                          |
/// |----------------------------|-----------------------------------|
/// | `StockReservationRejected` | `CancelProcessing`                |
/// | `PaymentAccepted`          | `FinalizeOrder`                   |
/// | `PaymentRejected`          | `CancelProcessingAndReverseStock` |
///
/// Everything else is informational and ignored.
pub struct OrderEventReactor {
    commands: Arc<dyn CommandSender>,
}

impl OrderEventReactor {
    pub fn new(commands: Arc<dyn CommandSender>) -> Self {
        Self { commands }
    }

    /// The command an event calls for, if any.
    pub fn react(event: &IntegrationEvent) -> Option<OrderCommand> {
        match *event {
            IntegrationEvent::StockReservationRejected {
                order_id,
                customer_id,
                ..
            } => Some(CancelProcessing::new(order_id, customer_id).into()),
            IntegrationEvent::PaymentAccepted {
                order_id,
                customer_id,
                ..
            } => Some(FinalizeOrder::new(order_id, customer_id).into()),
            IntegrationEvent::PaymentRejected {
                order_id,
                customer_id,
                ..
            } => Some(CancelProcessingAndReverseStock::new(order_id, customer_id).into()),
            _ => None,
        }
    }

    /// Sends the command `event` calls for. Returns whether one was sent.
    #[tracing::instrument(skip(self, event), fields(event = event.name(), order_id = %event.order_id()))]
    pub async fn handle(&self, event: &IntegrationEvent) -> Result<bool, SagaError> {
        let Some(command) = Self::react(event) else {
            tracing::trace!("informational event ignored");
            return Ok(false);
        };

        metrics::counter!("saga_reactions_total", "event" => event.name()).increment(1);
        tracing::info!(command = command.name(), "reacting to event");
        self.commands.send(command).await?;
        Ok(true)
    }
}
