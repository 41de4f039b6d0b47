//! Settlement services.
//!
//! The services are composed bottom-up by constructor injection:
//!
//! - [`processor::PaymentProcessor`] runs the per-payment state machine.
//! - [`payments::PaymentService`] creates, lists and deletes payments and
//!   exposes them through the [`payments::PaymentExecutor`] seam.
//! - [`wallet_allocation::WalletAllocationService`] ranks wallets and sweeps
//!   them, behind the [`wallet_allocation::WalletAllocator`] seam.
//! - [`orchestrator::SubscriptionPaymentOrchestrator`] splits an invoice
//!   between card and wallets and drives the subscription status.
//!
//! Every call runs to completion on the caller's task; nothing is spawned.

pub mod orchestrator;
pub mod payments;
pub mod processor;
pub mod wallet_allocation;
