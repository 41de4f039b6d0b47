use super::invoice::{Invoice, InvoiceLineItem};
use super::money::{Amount, Currency};
use super::payment::{Payment, PaymentAttempt, PaymentFilter, PaymentStatus};
use super::subscription::{Subscription, SubscriptionStatus};
use super::wallet::{Wallet, WalletOperation, WalletTransaction};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fails with `Conflict` when the ID or idempotency key is already taken.
    async fn create(&self, payment: Payment) -> Result<()>;
    async fn get(&self, payment_id: &str) -> Result<Option<Payment>>;
    async fn update(&self, payment: &Payment) -> Result<()>;
    /// Compare-and-set on the status: moves the stored payment from
    /// `expected` to `next` and returns it, or fails with
    /// `InvalidOperation` when another writer got there first.
    async fn transition_status(
        &self,
        payment_id: &str,
        expected: PaymentStatus,
        next: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment>;
    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>>;
    /// Soft delete.
    async fn delete(&self, payment_id: &str) -> Result<()>;
    async fn create_attempt(&self, attempt: PaymentAttempt) -> Result<()>;
    async fn update_attempt(&self, attempt: &PaymentAttempt) -> Result<()>;
    async fn get_latest_attempt(&self, payment_id: &str) -> Result<Option<PaymentAttempt>>;
    async fn list_attempts(&self, payment_id: &str) -> Result<Vec<PaymentAttempt>>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn get(&self, invoice_id: &str) -> Result<Option<Invoice>>;
    async fn update(&self, invoice: &Invoice) -> Result<()>;
    async fn line_items(&self, invoice_id: &str) -> Result<Vec<InvoiceLineItem>>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn wallets_by_customer(&self, customer_id: &str) -> Result<Vec<Wallet>>;
    async fn get_wallet(&self, wallet_id: &str) -> Result<Option<Wallet>>;
    /// The only way a wallet balance goes down. The balance check, the
    /// debit, the journal entry and the write of `payment` (linked to the
    /// new journal entry) through `payments` commit together: if the
    /// payment write fails the wallet is left untouched.
    async fn debit_wallet_for_payment(
        &self,
        operation: WalletOperation,
        payment: Payment,
        payments: &dyn PaymentRepository,
    ) -> Result<(WalletTransaction, Payment)>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get(&self, subscription_id: &str) -> Result<Option<Subscription>>;
    /// Writes `status` only if the stored version still equals
    /// `expected_version`, otherwise fails with `Conflict`. Returns the
    /// updated subscription with its bumped version.
    async fn compare_and_set_status(
        &self,
        subscription_id: &str,
        expected_version: u64,
        status: SubscriptionStatus,
    ) -> Result<Subscription>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConnection {
    pub id: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub customer_id: String,
    pub payment_method_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub invoice_id: String,
    pub payment_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeReceipt {
    pub gateway_payment_id: String,
}

/// External card/ACH processor. Only "attempt charge, get outcome" is needed.
#[async_trait]
pub trait CardGateway: Send + Sync {
    async fn connection(&self) -> Result<Option<GatewayConnection>>;
    async fn default_payment_method(&self, customer_id: &str) -> Result<Option<String>>;
    /// A declined charge is an `Err(Gateway)`.
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt>;
}

pub type PaymentRepositoryRef = Arc<dyn PaymentRepository>;
pub type InvoiceRepositoryRef = Arc<dyn InvoiceRepository>;
pub type WalletRepositoryRef = Arc<dyn WalletRepository>;
pub type SubscriptionRepositoryRef = Arc<dyn SubscriptionRepository>;
pub type CardGatewayRef = Arc<dyn CardGateway>;
