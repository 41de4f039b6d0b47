use super::processor::{PaymentProcessor, ProcessedPayment, SettlementWarning};
use super::wallet_allocation::rank_wallets;
use crate::config::SettlementConfig;
use crate::domain::invoice::{Invoice, InvoiceStatus};
use crate::domain::money::{Amount, Currency};
use crate::domain::payment::{
    EntityStatus, Metadata, Payment, PaymentDestinationType, PaymentFilter, PaymentMethodType,
    PaymentStatus, idempotency_key,
};
use crate::domain::ports::{InvoiceRepositoryRef, PaymentRepositoryRef, WalletRepositoryRef};
use crate::domain::wallet::Wallet;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePaymentRequest {
    /// Generated from the charge fields when absent.
    pub idempotency_key: Option<String>,
    pub destination_type: PaymentDestinationType,
    pub destination_id: String,
    pub payment_method_type: PaymentMethodType,
    /// For credits, an empty ID lets the service pick a wallet.
    pub payment_method_id: String,
    pub amount: Decimal,
    pub currency: String,
    /// Falls back to the configured default.
    pub track_attempts: Option<bool>,
    pub metadata: Metadata,
    /// Run the processor right after the payment is stored.
    pub process_payment: bool,
}

impl CreatePaymentRequest {
    /// A request against an invoice with every optional field left empty.
    pub fn for_invoice(
        invoice_id: impl Into<String>,
        method: PaymentMethodType,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key: None,
            destination_type: PaymentDestinationType::Invoice,
            destination_id: invoice_id.into(),
            payment_method_type: method,
            payment_method_id: String::new(),
            amount,
            currency: currency.into(),
            track_attempts: None,
            metadata: Metadata::new(),
            process_payment: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub idempotency_key: String,
    pub destination_type: PaymentDestinationType,
    pub destination_id: String,
    pub payment_method_type: PaymentMethodType,
    pub payment_method_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub track_attempts: bool,
    pub metadata: Metadata,
    pub gateway_payment_id: Option<String>,
    pub error_message: Option<String>,
    pub succeeded_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<SettlementWarning>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            idempotency_key: payment.idempotency_key,
            destination_type: payment.destination_type,
            destination_id: payment.destination_id,
            payment_method_type: payment.payment_method_type,
            payment_method_id: payment.payment_method_id,
            amount: payment.amount.value(),
            currency: payment.currency.to_string(),
            status: payment.status,
            track_attempts: payment.track_attempts,
            metadata: payment.metadata,
            gateway_payment_id: payment.gateway_payment_id,
            error_message: payment.error_message,
            succeeded_at: payment.succeeded_at,
            failed_at: payment.failed_at,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
            warnings: Vec::new(),
        }
    }
}

/// Creates and runs payments. The seam the wallet sweep and the
/// orchestrator settle through.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentExecutor: Send + Sync {
    /// With `process_payment` set, a dispatch failure is returned as
    /// `PaymentFailed` carrying the ID of the stored `Failed` payment.
    async fn create_payment(&self, request: CreatePaymentRequest) -> Result<PaymentResponse>;
    async fn process_payment(&self, payment_id: &str) -> Result<ProcessedPayment>;
}

pub type PaymentExecutorRef = Arc<dyn PaymentExecutor>;

pub struct PaymentService {
    payments: PaymentRepositoryRef,
    invoices: InvoiceRepositoryRef,
    wallets: WalletRepositoryRef,
    processor: PaymentProcessor,
    config: SettlementConfig,
}

impl PaymentService {
    pub fn new(
        payments: PaymentRepositoryRef,
        invoices: InvoiceRepositoryRef,
        wallets: WalletRepositoryRef,
        processor: PaymentProcessor,
        config: SettlementConfig,
    ) -> Self {
        Self {
            payments,
            invoices,
            wallets,
            processor,
            config,
        }
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<PaymentResponse> {
        require_id(payment_id)?;
        self.payments
            .get(payment_id)
            .await?
            .map(PaymentResponse::from)
            .ok_or_else(|| SettlementError::not_found("payment", payment_id))
    }

    pub async fn list_payments(&self, filter: &PaymentFilter) -> Result<Vec<PaymentResponse>> {
        let payments = self.payments.list(filter).await?;
        Ok(payments.into_iter().map(PaymentResponse::from).collect())
    }

    /// Soft delete; the payment stays in storage as history.
    pub async fn delete_payment(&self, payment_id: &str) -> Result<()> {
        require_id(payment_id)?;
        self.payments.delete(payment_id).await?;
        info!(payment_id, "payments: payment deleted");
        Ok(())
    }

    async fn payable_invoice(&self, invoice_id: &str, currency: &Currency) -> Result<Invoice> {
        let invoice = self
            .invoices
            .get(invoice_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("invoice", invoice_id))?;

        if invoice.is_paid() {
            return Err(SettlementError::Validation(format!(
                "invoice {invoice_id} is already paid"
            )));
        }
        if invoice.status == InvoiceStatus::Voided {
            return Err(SettlementError::Validation(format!(
                "invoice {invoice_id} is voided"
            )));
        }
        if invoice.currency != *currency {
            return Err(SettlementError::Validation(format!(
                "payment currency {} does not match invoice currency {}",
                currency, invoice.currency
            )));
        }
        Ok(invoice)
    }

    /// The first ranked wallet that can cover `amount` on its own.
    async fn select_wallet(
        &self,
        customer_id: &str,
        currency: &Currency,
        amount: Amount,
    ) -> Result<Wallet> {
        let wallets = self.wallets.wallets_by_customer(customer_id).await?;
        let ranked = rank_wallets(wallets, currency, self.config.wallet_strategy);
        if ranked.is_empty() {
            return Err(SettlementError::not_found(
                "wallet",
                format!("customer {customer_id} has no usable {currency} wallet"),
            ));
        }
        ranked
            .into_iter()
            .find(|w| w.balance >= amount.value())
            .ok_or_else(|| {
                SettlementError::InvalidOperation(format!(
                    "no wallet of customer {customer_id} holds {amount} {currency}"
                ))
            })
    }
}

#[async_trait]
impl PaymentExecutor for PaymentService {
    async fn create_payment(&self, request: CreatePaymentRequest) -> Result<PaymentResponse> {
        let amount = Amount::new(request.amount)?;
        let currency = Currency::new(request.currency.as_str())?;

        let invoice = match request.destination_type {
            PaymentDestinationType::Invoice => {
                self.payable_invoice(&request.destination_id, &currency)
                    .await?
            }
        };

        let mut metadata = request.metadata;
        let mut payment_method_id = request.payment_method_id.trim().to_string();
        if request.payment_method_type == PaymentMethodType::Credits && payment_method_id.is_empty()
        {
            let wallet = self
                .select_wallet(&invoice.customer_id, &currency, amount)
                .await?;
            metadata.insert("wallet_id".to_string(), wallet.id.clone());
            metadata.insert("wallet_type".to_string(), wallet.wallet_type.to_string());
            payment_method_id = wallet.id;
        }

        let now = Utc::now();
        let idempotency_key = match request.idempotency_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => key,
            None => idempotency_key(
                &request.destination_id,
                &payment_method_id,
                amount,
                &currency,
                now,
                self.config.idempotency_bucket_secs,
            ),
        };

        let payment = Payment {
            id: Payment::new_id(),
            idempotency_key,
            destination_type: request.destination_type,
            destination_id: request.destination_id,
            payment_method_type: request.payment_method_type,
            payment_method_id,
            amount,
            currency,
            status: PaymentStatus::Pending,
            track_attempts: request
                .track_attempts
                .unwrap_or(self.config.track_attempts),
            metadata,
            gateway_payment_id: None,
            error_message: None,
            succeeded_at: None,
            failed_at: None,
            entity_status: EntityStatus::Published,
            created_at: now,
            updated_at: now,
        };
        payment.validate()?;
        self.payments.create(payment.clone()).await?;

        info!(
            payment_id = %payment.id,
            invoice_id = %payment.destination_id,
            method = %payment.payment_method_type,
            amount = %payment.amount,
            "payments: payment created"
        );

        if !request.process_payment {
            return Ok(payment.into());
        }

        let processed = self.processor.process_payment(&payment.id).await?;
        if let Some(failure) = processed.failure {
            warn!(payment_id = %payment.id, error = %failure, "payments: immediate processing failed");
            return Err(SettlementError::PaymentFailed {
                payment_id: payment.id,
                source: Box::new(failure),
            });
        }
        let mut response = PaymentResponse::from(processed.payment);
        response.warnings = processed.warnings;
        Ok(response)
    }

    async fn process_payment(&self, payment_id: &str) -> Result<ProcessedPayment> {
        require_id(payment_id)?;
        self.processor.process_payment(payment_id).await
    }
}

fn require_id(payment_id: &str) -> Result<()> {
    if payment_id.trim().is_empty() {
        return Err(SettlementError::Validation(
            "payment id is required".to_string(),
        ));
    }
    Ok(())
}
