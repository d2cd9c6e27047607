//! Order fulfillment worker.
//!
//! Wires the order command handler and the fulfillment pipeline together
//! over the in-memory event store and runs a scripted checkout.

pub mod checkout;
pub mod config;

pub use checkout::{CheckoutError, CheckoutSummary};
pub use config::{Config, LogFormat};
