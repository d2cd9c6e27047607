//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::AggregateId;
use domain::{OrderLine, ProductId};

use crate::error::SagaError;

/// Stock operations the order flow relies on.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Debits every line of an order, all or nothing.
    async fn debit_order(&self, order_id: AggregateId, items: &[OrderLine]) -> Result<(), SagaError>;

    /// Credits previously debited lines back.
    async fn credit_order(&self, order_id: AggregateId, items: &[OrderLine])
    -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<ProductId, u32>,
    debits: u32,
    credits: u32,
    reject_all: bool,
}

/// In-memory stock ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger holding the given stock levels.
    pub fn with_stock<P: Into<ProductId>>(stock: impl IntoIterator<Item = (P, u32)>) -> Self {
        let service = Self::new();
        for (product_id, quantity) in stock {
            service.set_stock(product_id, quantity);
        }
        service
    }

    pub fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u32) {
        self.write().stock.insert(product_id.into(), quantity);
    }

    pub fn stock_of(&self, product_id: &ProductId) -> u32 {
        self.read().stock.get(product_id).copied().unwrap_or(0)
    }

    /// Makes every debit fail regardless of stock.
    pub fn set_reject_all(&self, reject: bool) {
        self.write().reject_all = reject;
    }

    /// Number of successful order debits.
    pub fn debit_count(&self) -> u32 {
        self.read().debits
    }

    /// Number of order credits.
    pub fn credit_count(&self) -> u32 {
        self.read().credits
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryInventoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryInventoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn debit_order(&self, order_id: AggregateId, items: &[OrderLine]) -> Result<(), SagaError> {
        let mut state = self.write();

        if state.reject_all {
            return Err(SagaError::InventoryService(
                "stock reservations are disabled".to_string(),
            ));
        }

        for line in items {
            let available = state.stock.get(&line.product_id).copied().unwrap_or(0);
            if available < line.quantity {
                return Err(SagaError::InsufficientStock {
                    product_id: line.product_id.to_string(),
                    requested: line.quantity,
                    available,
                });
            }
        }

        for line in items {
            if let Some(level) = state.stock.get_mut(&line.product_id) {
                *level -= line.quantity;
            }
        }
        state.debits += 1;
        tracing::debug!(%order_id, lines = items.len(), "stock debited");
        Ok(())
    }

    async fn credit_order(
        &self,
        order_id: AggregateId,
        items: &[OrderLine],
    ) -> Result<(), SagaError> {
        let mut state = self.write();
        for line in items {
            *state.stock.entry(line.product_id.clone()).or_insert(0) += line.quantity;
        }
        state.credits += 1;
        tracing::debug!(%order_id, lines = items.len(), "stock credited");
        Ok(())
    }
}
