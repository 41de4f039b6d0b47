use crate::domain::invoice::Invoice;
use crate::domain::payment::{
    Metadata, Payment, PaymentAttempt, PaymentDestinationType, PaymentFilter, PaymentMethodType,
    PaymentStatus,
};
use crate::domain::ports::{
    CardGatewayRef, ChargeRequest, InvoiceRepositoryRef, PaymentRepositoryRef, WalletRepositoryRef,
};
use crate::domain::wallet::{WalletOperation, WalletStatus};
use crate::error::{Result, SettlementError};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

/// A best-effort side effect that failed without changing the payment's
/// outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementWarning {
    AttemptNotRecorded {
        payment_id: String,
        reason: String,
    },
    ReconciliationFailed {
        payment_id: String,
        destination_id: String,
        reason: String,
    },
}

impl fmt::Display for SettlementWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementWarning::AttemptNotRecorded { payment_id, reason } => {
                write!(f, "attempt history for payment {payment_id} not recorded: {reason}")
            }
            SettlementWarning::ReconciliationFailed {
                payment_id,
                destination_id,
                reason,
            } => write!(
                f,
                "reconciliation of {destination_id} after payment {payment_id} failed: {reason}"
            ),
        }
    }
}

/// The terminal payment together with the dispatch failure, if any.
///
/// A failed dispatch still yields a persisted `Failed` payment, so the
/// failure travels next to it instead of replacing it.
#[derive(Debug)]
pub struct ProcessedPayment {
    pub payment: Payment,
    pub failure: Option<SettlementError>,
    pub warnings: Vec<SettlementWarning>,
}

impl ProcessedPayment {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.payment.status == PaymentStatus::Succeeded
    }
}

/// How far a successful dispatch already went.
enum Completion {
    /// Funds moved; the terminal status still has to be written.
    Dispatched,
    /// Funds moved and the succeeded payment was written with them.
    Persisted,
}

/// Executes `Pending -> Processing -> Succeeded | Failed` for one payment.
pub struct PaymentProcessor {
    payments: PaymentRepositoryRef,
    invoices: InvoiceRepositoryRef,
    wallets: WalletRepositoryRef,
    card_gateway: Option<CardGatewayRef>,
}

impl PaymentProcessor {
    pub fn new(
        payments: PaymentRepositoryRef,
        invoices: InvoiceRepositoryRef,
        wallets: WalletRepositoryRef,
    ) -> Self {
        Self {
            payments,
            invoices,
            wallets,
            card_gateway: None,
        }
    }

    /// Card payments are charged through `gateway` instead of failing as
    /// not implemented.
    pub fn with_card_gateway(mut self, gateway: CardGatewayRef) -> Self {
        self.card_gateway = Some(gateway);
        self
    }

    pub async fn process_payment(&self, payment_id: &str) -> Result<ProcessedPayment> {
        let started = Utc::now();
        // The claim is a compare-and-set: of two concurrent callers only one
        // gets past it.
        let mut payment = self
            .payments
            .transition_status(
                payment_id,
                PaymentStatus::Pending,
                PaymentStatus::Processing,
                started,
            )
            .await?;

        info!(
            payment_id = %payment.id,
            method = %payment.payment_method_type,
            amount = %payment.amount,
            currency = %payment.currency,
            "processor: processing payment"
        );

        let mut warnings = Vec::new();

        let attempt = if payment.track_attempts {
            match self.start_attempt(&payment.id, started).await {
                Ok(attempt) => Some(attempt),
                Err(err) => {
                    error!(payment_id = %payment.id, error = %err, "processor: failed to create payment attempt");
                    warnings.push(SettlementWarning::AttemptNotRecorded {
                        payment_id: payment.id.clone(),
                        reason: err.to_string(),
                    });
                    None
                }
            }
        } else {
            None
        };

        let outcome = self.dispatch(&mut payment).await;
        let finished = Utc::now();

        if let Some(mut attempt) = attempt {
            attempt.status = match &outcome {
                Ok(_) => PaymentStatus::Succeeded,
                Err(_) => PaymentStatus::Failed,
            };
            attempt.error_message = outcome.as_ref().err().map(|err| err.to_string());
            attempt.updated_at = finished;
            if let Err(err) = self.payments.update_attempt(&attempt).await {
                error!(
                    payment_id = %payment.id,
                    attempt_number = attempt.attempt_number,
                    error = %err,
                    "processor: failed to update payment attempt"
                );
                warnings.push(SettlementWarning::AttemptNotRecorded {
                    payment_id: payment.id.clone(),
                    reason: err.to_string(),
                });
            }
        }

        let recorded = match &outcome {
            Ok(Completion::Persisted) => Ok(()),
            Ok(Completion::Dispatched) => {
                payment.mark_succeeded(finished);
                self.payments.update(&payment).await
            }
            Err(err) => {
                payment.mark_failed(err.to_string(), finished);
                self.payments.update(&payment).await
            }
        };

        if let Err(err) = recorded {
            error!(payment_id = %payment.id, error = %err, "processor: failed to persist terminal payment status");
            return match outcome {
                Ok(_) => Err(SettlementError::Unrecorded {
                    payment_id: payment.id,
                    reason: err.to_string(),
                }),
                Err(_) => Err(err),
            };
        }

        let failure = match outcome {
            Ok(_) => {
                info!(payment_id = %payment.id, "processor: payment succeeded");
                if let Err(err) = self.reconcile_destination(&payment).await {
                    warn!(
                        payment_id = %payment.id,
                        destination_id = %payment.destination_id,
                        error = %err,
                        "processor: destination reconciliation failed"
                    );
                    warnings.push(SettlementWarning::ReconciliationFailed {
                        payment_id: payment.id.clone(),
                        destination_id: payment.destination_id.clone(),
                        reason: err.to_string(),
                    });
                }
                None
            }
            Err(err) => {
                warn!(payment_id = %payment.id, error = %err, "processor: payment failed");
                Some(err)
            }
        };

        Ok(ProcessedPayment {
            payment,
            failure,
            warnings,
        })
    }

    /// Numbers the attempt from the latest stored one so numbering survives
    /// restarts.
    async fn start_attempt(
        &self,
        payment_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<PaymentAttempt> {
        let latest = self.payments.get_latest_attempt(payment_id).await?;
        let attempt = PaymentAttempt::next_after(payment_id, latest.as_ref(), now);
        self.payments.create_attempt(attempt.clone()).await?;
        debug!(payment_id, attempt_number = attempt.attempt_number, "processor: attempt started");
        Ok(attempt)
    }

    async fn dispatch(&self, payment: &mut Payment) -> Result<Completion> {
        match payment.payment_method_type {
            PaymentMethodType::Offline => Ok(Completion::Dispatched),
            PaymentMethodType::Credits => self.process_credits(payment).await,
            PaymentMethodType::Card => match &self.card_gateway {
                Some(gateway) => {
                    self.process_card(gateway, payment).await?;
                    Ok(Completion::Dispatched)
                }
                None => Err(SettlementError::NotImplemented("card")),
            },
            PaymentMethodType::Ach => Err(SettlementError::NotImplemented("ACH")),
        }
    }

    /// Debits the wallet and records the payment as succeeded in one step,
    /// leaving `payment` untouched when either fails.
    async fn process_credits(&self, payment: &mut Payment) -> Result<Completion> {
        let wallet = self
            .wallets
            .get_wallet(&payment.payment_method_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("wallet", &payment.payment_method_id))?;

        if wallet.status != WalletStatus::Active {
            return Err(SettlementError::InvalidOperation(format!(
                "wallet {} is not active",
                wallet.id
            )));
        }
        if wallet.currency != payment.currency {
            return Err(SettlementError::Validation(format!(
                "wallet {} currency {} does not match payment currency {}",
                wallet.id, wallet.currency, payment.currency
            )));
        }
        if wallet.balance < payment.amount.value() {
            return Err(SettlementError::InvalidOperation(format!(
                "insufficient balance in wallet {}: {} available, {} required",
                wallet.id,
                wallet.balance,
                payment.amount
            )));
        }

        let mut metadata = Metadata::new();
        metadata.insert("invoice_id".to_string(), payment.destination_id.clone());
        metadata.insert(
            "payment_method".to_string(),
            PaymentMethodType::Credits.to_string(),
        );
        metadata.insert("wallet_type".to_string(), wallet.wallet_type.to_string());

        let mut settled = payment.clone();
        settled
            .metadata
            .insert("wallet_id".to_string(), wallet.id.clone());
        settled
            .metadata
            .insert("wallet_type".to_string(), wallet.wallet_type.to_string());
        settled.mark_succeeded(Utc::now());

        let (transaction, settled) = self
            .wallets
            .debit_wallet_for_payment(
                WalletOperation {
                    wallet_id: wallet.id.clone(),
                    amount: payment.amount,
                    reference_type: "payment",
                    reference_id: payment.id.clone(),
                    reason: "invoice_payment",
                    description: format!("payment for invoice {}", payment.destination_id),
                    metadata,
                },
                settled,
                self.payments.as_ref(),
            )
            .await?;
        *payment = settled;

        debug!(
            payment_id = %payment.id,
            wallet_id = %wallet.id,
            balance_after = %transaction.balance_after,
            "processor: wallet debited"
        );
        Ok(Completion::Persisted)
    }

    async fn process_card(&self, gateway: &CardGatewayRef, payment: &mut Payment) -> Result<()> {
        if gateway.connection().await?.is_none() {
            return Err(SettlementError::Configuration(
                "no card gateway connection configured".to_string(),
            ));
        }

        let customer_id = match payment.metadata.get("customer_id") {
            Some(customer_id) => customer_id.clone(),
            None => self.destination_invoice(payment).await?.customer_id,
        };

        let payment_method_id = if payment.payment_method_id.is_empty() {
            gateway
                .default_payment_method(&customer_id)
                .await?
                .ok_or_else(|| {
                    SettlementError::Validation(format!(
                        "customer {customer_id} has no card payment method"
                    ))
                })?
        } else {
            payment.payment_method_id.clone()
        };

        let receipt = gateway
            .charge(ChargeRequest {
                customer_id,
                payment_method_id: payment_method_id.clone(),
                amount: payment.amount,
                currency: payment.currency.clone(),
                invoice_id: payment.destination_id.clone(),
                payment_id: payment.id.clone(),
            })
            .await?;

        payment.payment_method_id = payment_method_id;
        payment.gateway_payment_id = Some(receipt.gateway_payment_id);
        Ok(())
    }

    async fn destination_invoice(&self, payment: &Payment) -> Result<Invoice> {
        self.invoices
            .get(&payment.destination_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("invoice", &payment.destination_id))
    }

    async fn reconcile_destination(&self, payment: &Payment) -> Result<()> {
        match payment.destination_type {
            PaymentDestinationType::Invoice => {
                let mut invoice = self.destination_invoice(payment).await?;
                let settled = self
                    .payments
                    .list(&PaymentFilter::succeeded_for_invoice(&invoice.id))
                    .await?;
                invoice.apply_settled_payments(&settled, Utc::now())?;
                self.invoices.update(&invoice).await?;
                info!(
                    invoice_id = %invoice.id,
                    amount_paid = %invoice.amount_paid,
                    amount_remaining = %invoice.amount_remaining,
                    payment_status = %invoice.payment_status,
                    "processor: invoice reconciled"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::invoice::{InvoiceLineItem, InvoiceStatus};
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payment::EntityStatus;
    use crate::domain::ports::{InvoiceRepository, PaymentRepository, WalletRepository};
    use crate::domain::wallet::{Wallet, WalletConfig, WalletType};
    use crate::error::ErrorKind;
    use crate::infrastructure::in_memory::{
        InMemoryInvoiceRepository, InMemoryPaymentRepository, InMemoryWalletRepository,
    };
    use async_trait::async_trait;
    use chrono::DateTime;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        payments: InMemoryPaymentRepository,
        invoices: InMemoryInvoiceRepository,
        wallets: InMemoryWalletRepository,
        processor: PaymentProcessor,
    }

    async fn fixture(amount_due: Decimal) -> Fixture {
        let payments = InMemoryPaymentRepository::new();
        let invoices = InMemoryInvoiceRepository::new();
        let wallets = InMemoryWalletRepository::new();
        invoices
            .insert(
                Invoice {
                    id: "inv_1".to_string(),
                    customer_id: "cus_1".to_string(),
                    subscription_id: None,
                    currency: Currency::new("USD").unwrap(),
                    amount_due,
                    amount_paid: Decimal::ZERO,
                    amount_remaining: amount_due,
                    status: InvoiceStatus::Finalized,
                    payment_status: PaymentStatus::Pending,
                    external_sync: None,
                    paid_at: None,
                    finalized_at: None,
                },
                Vec::<InvoiceLineItem>::new(),
            )
            .await;
        let processor = PaymentProcessor::new(
            Arc::new(payments.clone()),
            Arc::new(invoices.clone()),
            Arc::new(wallets.clone()),
        );
        Fixture {
            payments,
            invoices,
            wallets,
            processor,
        }
    }

    impl Fixture {
        fn processor_over(&self, payments: SlowPayments) -> PaymentProcessor {
            PaymentProcessor::new(
                Arc::new(payments),
                Arc::new(self.invoices.clone()),
                Arc::new(self.wallets.clone()),
            )
        }
    }

    /// Yields before every call so concurrent callers interleave, and can
    /// refuse to store succeeded payments.
    struct SlowPayments {
        inner: InMemoryPaymentRepository,
        refuse_succeeded: bool,
    }

    #[async_trait]
    impl PaymentRepository for SlowPayments {
        async fn create(&self, payment: Payment) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.create(payment).await
        }

        async fn get(&self, payment_id: &str) -> Result<Option<Payment>> {
            tokio::task::yield_now().await;
            self.inner.get(payment_id).await
        }

        async fn update(&self, payment: &Payment) -> Result<()> {
            tokio::task::yield_now().await;
            if self.refuse_succeeded && payment.status == PaymentStatus::Succeeded {
                return Err(SettlementError::Storage("disk full".to_string()));
            }
            self.inner.update(payment).await
        }

        async fn transition_status(
            &self,
            payment_id: &str,
            expected: PaymentStatus,
            next: PaymentStatus,
            at: DateTime<Utc>,
        ) -> Result<Payment> {
            tokio::task::yield_now().await;
            self.inner
                .transition_status(payment_id, expected, next, at)
                .await
        }

        async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
            tokio::task::yield_now().await;
            self.inner.list(filter).await
        }

        async fn delete(&self, payment_id: &str) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.delete(payment_id).await
        }

        async fn create_attempt(&self, attempt: PaymentAttempt) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.create_attempt(attempt).await
        }

        async fn update_attempt(&self, attempt: &PaymentAttempt) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.update_attempt(attempt).await
        }

        async fn get_latest_attempt(&self, payment_id: &str) -> Result<Option<PaymentAttempt>> {
            tokio::task::yield_now().await;
            self.inner.get_latest_attempt(payment_id).await
        }

        async fn list_attempts(&self, payment_id: &str) -> Result<Vec<PaymentAttempt>> {
            tokio::task::yield_now().await;
            self.inner.list_attempts(payment_id).await
        }
    }

    fn prepaid_wallet(balance: Decimal) -> Wallet {
        Wallet {
            id: "wal_1".to_string(),
            customer_id: "cus_1".to_string(),
            currency: Currency::new("USD").unwrap(),
            balance,
            status: WalletStatus::Active,
            wallet_type: WalletType::PrePaid,
            config: WalletConfig::default(),
        }
    }

    fn pending(id: &str, method: PaymentMethodType, method_id: &str, amount: Decimal) -> Payment {
        let now = Utc::now();
        Payment {
            id: id.to_string(),
            idempotency_key: format!("key_{id}"),
            destination_type: PaymentDestinationType::Invoice,
            destination_id: "inv_1".to_string(),
            payment_method_type: method,
            payment_method_id: method_id.to_string(),
            amount: Amount::new(amount).unwrap(),
            currency: Currency::new("USD").unwrap(),
            status: PaymentStatus::Pending,
            track_attempts: true,
            metadata: Metadata::new(),
            gateway_payment_id: None,
            error_message: None,
            succeeded_at: None,
            failed_at: None,
            entity_status: EntityStatus::Published,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_offline_payment_reconciles_invoice() {
        let f = fixture(dec!(100)).await;
        f.payments
            .create(pending("pay_1", PaymentMethodType::Offline, "", dec!(100)))
            .await
            .unwrap();

        let processed = f.processor.process_payment("pay_1").await.unwrap();
        assert!(processed.is_success());
        assert!(processed.warnings.is_empty());
        assert!(processed.payment.succeeded_at.is_some());

        let invoice = f.invoices.get("inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.amount_remaining, dec!(0));
        assert!(invoice.is_paid());

        let attempts = f.payments.list_attempts("pay_1").await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_credits_payment_debits_wallet() {
        let f = fixture(dec!(100)).await;
        f.wallets
            .insert(Wallet {
                id: "wal_1".to_string(),
                customer_id: "cus_1".to_string(),
                currency: Currency::new("USD").unwrap(),
                balance: dec!(150),
                status: WalletStatus::Active,
                wallet_type: WalletType::Promotional,
                config: WalletConfig::default(),
            })
            .await;
        f.payments
            .create(pending("pay_1", PaymentMethodType::Credits, "wal_1", dec!(40)))
            .await
            .unwrap();

        let processed = f.processor.process_payment("pay_1").await.unwrap();
        assert!(processed.is_success());
        assert_eq!(
            processed.payment.metadata.get("wallet_type").map(String::as_str),
            Some("promotional")
        );

        let transactions = f.wallets.transactions("wal_1").await;
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].reference_id, "pay_1");
        assert_eq!(transactions[0].reason, "invoice_payment");
        assert_eq!(transactions[0].balance_after, dec!(110));

        let invoice = f.invoices.get("inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.amount_remaining, dec!(60));
        assert_eq!(invoice.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_insufficient_wallet_fails_payment() {
        let f = fixture(dec!(100)).await;
        f.wallets
            .insert(Wallet {
                id: "wal_1".to_string(),
                customer_id: "cus_1".to_string(),
                currency: Currency::new("USD").unwrap(),
                balance: dec!(10),
                status: WalletStatus::Active,
                wallet_type: WalletType::PrePaid,
                config: WalletConfig::default(),
            })
            .await;
        f.payments
            .create(pending("pay_1", PaymentMethodType::Credits, "wal_1", dec!(40)))
            .await
            .unwrap();

        let processed = f.processor.process_payment("pay_1").await.unwrap();
        assert!(!processed.is_success());
        assert_eq!(processed.payment.status, PaymentStatus::Failed);
        assert!(processed.payment.error_message.is_some());
        assert_eq!(
            processed.failure.map(|e| e.kind()),
            Some(ErrorKind::InvalidOperation)
        );

        let stored = f.payments.get("pay_1").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert!(f.wallets.transactions("wal_1").await.is_empty());
    }

    #[tokio::test]
    async fn test_card_without_gateway_is_not_implemented() {
        let f = fixture(dec!(100)).await;
        f.payments
            .create(pending("pay_1", PaymentMethodType::Card, "pm_1", dec!(100)))
            .await
            .unwrap();

        let processed = f.processor.process_payment("pay_1").await.unwrap();
        assert!(matches!(
            processed.failure,
            Some(SettlementError::NotImplemented("card"))
        ));
        assert_eq!(processed.payment.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_payment_is_rejected() {
        let f = fixture(dec!(100)).await;
        f.payments
            .create(pending("pay_1", PaymentMethodType::Ach, "ba_1", dec!(100)))
            .await
            .unwrap();
        let first = f.processor.process_payment("pay_1").await.unwrap();
        assert_eq!(first.payment.status, PaymentStatus::Failed);

        let err = f.processor.process_payment("pay_1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert!(err.to_string().contains("failed"));

        let stored = f.payments.get("pay_1").await.unwrap().unwrap();
        assert_eq!(stored, first.payment);
    }

    #[tokio::test]
    async fn test_missing_payment() {
        let f = fixture(dec!(100)).await;
        let err = f.processor.process_payment("pay_missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_untracked_payment_has_no_attempts() {
        let f = fixture(dec!(100)).await;
        let mut payment = pending("pay_1", PaymentMethodType::Offline, "", dec!(10));
        payment.track_attempts = false;
        f.payments.create(payment).await.unwrap();

        f.processor.process_payment("pay_1").await.unwrap();
        assert!(f.payments.list_attempts("pay_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_processing_debits_once() {
        let f = fixture(dec!(100)).await;
        f.wallets.insert(prepaid_wallet(dec!(150))).await;
        f.payments
            .create(pending("pay_1", PaymentMethodType::Credits, "wal_1", dec!(40)))
            .await
            .unwrap();
        let processor = f.processor_over(SlowPayments {
            inner: f.payments.clone(),
            refuse_succeeded: false,
        });

        let (first, second) = tokio::join!(
            processor.process_payment("pay_1"),
            processor.process_payment("pay_1")
        );
        let results = [first, second];
        let succeeded = results
            .iter()
            .filter(|r| r.as_ref().is_ok_and(|p| p.is_success()))
            .count();
        assert_eq!(succeeded, 1);
        let rejected: Vec<ErrorKind> = results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .map(|e| e.kind())
            .collect();
        assert_eq!(rejected, vec![ErrorKind::InvalidOperation]);

        let wallet = f.wallets.get_wallet("wal_1").await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(110));
        assert_eq!(f.wallets.transactions("wal_1").await.len(), 1);
        assert_eq!(f.payments.list_attempts("pay_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wallet_kept_when_success_cannot_be_stored() {
        let f = fixture(dec!(100)).await;
        f.wallets.insert(prepaid_wallet(dec!(150))).await;
        f.payments
            .create(pending("pay_1", PaymentMethodType::Credits, "wal_1", dec!(40)))
            .await
            .unwrap();
        let processor = f.processor_over(SlowPayments {
            inner: f.payments.clone(),
            refuse_succeeded: true,
        });

        let processed = processor.process_payment("pay_1").await.unwrap();
        assert_eq!(processed.payment.status, PaymentStatus::Failed);
        assert_eq!(
            processed.failure.map(|e| e.kind()),
            Some(ErrorKind::System)
        );
        assert!(!processed.payment.metadata.contains_key("wallet_transaction_id"));

        let stored = f.payments.get("pay_1").await.unwrap().unwrap();
        assert_ne!(stored.status, PaymentStatus::Succeeded);
        let wallet = f.wallets.get_wallet("wal_1").await.unwrap().unwrap();
        assert_eq!(wallet.balance, dec!(150));
        assert!(f.wallets.transactions("wal_1").await.is_empty());

        let invoice = f.invoices.get("inv_1").await.unwrap().unwrap();
        assert_eq!(invoice.amount_remaining, dec!(100));
    }

    #[tokio::test]
    async fn test_offline_success_that_cannot_be_stored_is_unrecorded() {
        let f = fixture(dec!(100)).await;
        f.payments
            .create(pending("pay_1", PaymentMethodType::Offline, "", dec!(100)))
            .await
            .unwrap();
        let processor = f.processor_over(SlowPayments {
            inner: f.payments.clone(),
            refuse_succeeded: true,
        });

        let err = processor.process_payment("pay_1").await.unwrap_err();
        assert!(matches!(err, SettlementError::Unrecorded { .. }));
        let stored = f.payments.get("pay_1").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Processing);
    }
}
