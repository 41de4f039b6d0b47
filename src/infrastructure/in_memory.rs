use crate::domain::invoice::{Invoice, InvoiceLineItem};
use crate::domain::payment::{
    EntityStatus, Payment, PaymentAttempt, PaymentFilter, PaymentStatus,
};
use crate::domain::ports::{
    InvoiceRepository, PaymentRepository, SubscriptionRepository, WalletRepository,
};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::domain::wallet::{Wallet, WalletOperation, WalletTransaction};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct PaymentTables {
    payments: HashMap<String, Payment>,
    attempts: HashMap<String, Vec<PaymentAttempt>>,
}

/// A thread-safe in-memory payment store with attempt history.
///
/// Payments and attempts share one lock so a payment and its attempts are
/// always observed together.
#[derive(Default, Clone)]
pub struct InMemoryPaymentRepository {
    tables: Arc<RwLock<PaymentTables>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn create(&self, payment: Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.payments.contains_key(&payment.id) {
            return Err(SettlementError::Conflict(format!(
                "payment {} already exists",
                payment.id
            )));
        }
        if tables
            .payments
            .values()
            .any(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Err(SettlementError::Conflict(format!(
                "a payment with idempotency key {} already exists",
                payment.idempotency_key
            )));
        }
        tables.payments.insert(payment.id.clone(), payment);
        Ok(())
    }

    async fn get(&self, payment_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .get(payment_id)
            .filter(|p| !p.is_deleted())
            .cloned())
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.payments.get_mut(&payment.id) {
            Some(stored) => {
                *stored = payment.clone();
                Ok(())
            }
            None => Err(SettlementError::not_found("payment", &payment.id)),
        }
    }

    async fn transition_status(
        &self,
        payment_id: &str,
        expected: PaymentStatus,
        next: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .payments
            .get_mut(payment_id)
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| SettlementError::not_found("payment", payment_id))?;
        stored.transition(expected, next, at)?;
        Ok(stored.clone())
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(payments)
    }

    async fn delete(&self, payment_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.payments.get_mut(payment_id) {
            Some(stored) => {
                stored.entity_status = EntityStatus::Deleted;
                stored.updated_at = Utc::now();
                Ok(())
            }
            None => Err(SettlementError::not_found("payment", payment_id)),
        }
    }

    async fn create_attempt(&self, attempt: PaymentAttempt) -> Result<()> {
        let mut tables = self.tables.write().await;
        let attempts = tables.attempts.entry(attempt.payment_id.clone()).or_default();
        if attempts
            .iter()
            .any(|a| a.attempt_number >= attempt.attempt_number)
        {
            return Err(SettlementError::Conflict(format!(
                "attempt {} of payment {} is not newer than the recorded attempts",
                attempt.attempt_number, attempt.payment_id
            )));
        }
        attempts.push(attempt);
        Ok(())
    }

    async fn update_attempt(&self, attempt: &PaymentAttempt) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .attempts
            .get_mut(&attempt.payment_id)
            .and_then(|attempts| attempts.iter_mut().find(|a| a.id == attempt.id));
        match stored {
            Some(stored) => {
                *stored = attempt.clone();
                Ok(())
            }
            None => Err(SettlementError::not_found("payment attempt", &attempt.id)),
        }
    }

    async fn get_latest_attempt(&self, payment_id: &str) -> Result<Option<PaymentAttempt>> {
        let tables = self.tables.read().await;
        Ok(tables
            .attempts
            .get(payment_id)
            .and_then(|attempts| attempts.iter().max_by_key(|a| a.attempt_number))
            .cloned())
    }

    async fn list_attempts(&self, payment_id: &str) -> Result<Vec<PaymentAttempt>> {
        let tables = self.tables.read().await;
        let mut attempts = tables.attempts.get(payment_id).cloned().unwrap_or_default();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }
}

/// A thread-safe in-memory invoice store with line items.
#[derive(Default, Clone)]
pub struct InMemoryInvoiceRepository {
    invoices: Arc<RwLock<HashMap<String, Invoice>>>,
    line_items: Arc<RwLock<HashMap<String, Vec<InvoiceLineItem>>>>,
}

impl InMemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an invoice and its line items.
    pub async fn insert(&self, invoice: Invoice, line_items: Vec<InvoiceLineItem>) {
        self.line_items
            .write()
            .await
            .insert(invoice.id.clone(), line_items);
        self.invoices.write().await.insert(invoice.id.clone(), invoice);
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn get(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        let invoices = self.invoices.read().await;
        Ok(invoices.get(invoice_id).cloned())
    }

    async fn update(&self, invoice: &Invoice) -> Result<()> {
        let mut invoices = self.invoices.write().await;
        match invoices.get_mut(&invoice.id) {
            Some(stored) => {
                *stored = invoice.clone();
                Ok(())
            }
            None => Err(SettlementError::not_found("invoice", &invoice.id)),
        }
    }

    async fn line_items(&self, invoice_id: &str) -> Result<Vec<InvoiceLineItem>> {
        let line_items = self.line_items.read().await;
        Ok(line_items.get(invoice_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct WalletTables {
    wallets: HashMap<String, Wallet>,
    transactions: Vec<WalletTransaction>,
}

/// A thread-safe in-memory wallet ledger.
#[derive(Default, Clone)]
pub struct InMemoryWalletRepository {
    tables: Arc<RwLock<WalletTables>>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, wallet: Wallet) {
        self.tables
            .write()
            .await
            .wallets
            .insert(wallet.id.clone(), wallet);
    }

    pub async fn transactions(&self, wallet_id: &str) -> Vec<WalletTransaction> {
        let tables = self.tables.read().await;
        tables
            .transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn wallets_by_customer(&self, customer_id: &str) -> Result<Vec<Wallet>> {
        let tables = self.tables.read().await;
        let mut wallets: Vec<Wallet> = tables
            .wallets
            .values()
            .filter(|w| w.customer_id == customer_id)
            .cloned()
            .collect();
        wallets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(wallets)
    }

    async fn get_wallet(&self, wallet_id: &str) -> Result<Option<Wallet>> {
        let tables = self.tables.read().await;
        Ok(tables.wallets.get(wallet_id).cloned())
    }

    async fn debit_wallet_for_payment(
        &self,
        operation: WalletOperation,
        mut payment: Payment,
        payments: &dyn PaymentRepository,
    ) -> Result<(WalletTransaction, Payment)> {
        // Held across the payment write so no other debit can interleave.
        let mut tables = self.tables.write().await;
        let wallet = tables
            .wallets
            .get(&operation.wallet_id)
            .ok_or_else(|| SettlementError::not_found("wallet", &operation.wallet_id))?;

        let amount = operation.amount.value();
        if wallet.balance < amount {
            return Err(SettlementError::InvalidOperation(format!(
                "wallet {} balance {} is less than debit amount {}",
                wallet.id, wallet.balance, amount
            )));
        }
        let balance_after = wallet.balance - amount;

        let transaction = WalletTransaction {
            id: format!("wtx_{}", Uuid::new_v4().simple()),
            wallet_id: wallet.id.clone(),
            amount,
            balance_after,
            reference_type: operation.reference_type.to_string(),
            reference_id: operation.reference_id,
            reason: operation.reason.to_string(),
            metadata: operation.metadata,
            created_at: Utc::now(),
        };
        payment.link_wallet_transaction(&transaction.id);
        payments.update(&payment).await?;

        if let Some(wallet) = tables.wallets.get_mut(&operation.wallet_id) {
            wallet.balance = balance_after;
        }
        tables.transactions.push(transaction.clone());
        Ok((transaction, payment))
    }
}

/// A thread-safe in-memory subscription store with versioned status writes.
#[derive(Default, Clone)]
pub struct InMemorySubscriptionRepository {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.id.clone(), subscription);
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn get(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(subscription_id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        subscription_id: &str,
        expected_version: u64,
        status: SubscriptionStatus,
    ) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let stored = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| SettlementError::not_found("subscription", subscription_id))?;
        if stored.version != expected_version {
            return Err(SettlementError::Conflict(format!(
                "subscription {} is at version {}, expected {}",
                subscription_id, stored.version, expected_version
            )));
        }
        stored.status = status;
        stored.version += 1;
        Ok(stored.clone())
    }
}
