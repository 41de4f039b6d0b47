use super::money::{Amount, Currency};
use crate::error::SettlementError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type Metadata = BTreeMap<String, String>;

/// Lifecycle of a payment. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Failed)
    }

    /// Forward-only transitions: pending -> processing -> succeeded | failed.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Processing)
                | (PaymentStatus::Processing, PaymentStatus::Succeeded)
                | (PaymentStatus::Processing, PaymentStatus::Failed)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Offline,
    Credits,
    Card,
    Ach,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodType::Offline => "offline",
            PaymentMethodType::Credits => "credits",
            PaymentMethodType::Card => "card",
            PaymentMethodType::Ach => "ach",
        }
    }
}

impl fmt::Display for PaymentMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDestinationType {
    Invoice,
}

/// Soft-delete marker. Payments are financial history and are never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Published,
    Deleted,
}

/// One settlement intent against a single destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub idempotency_key: String,
    pub destination_type: PaymentDestinationType,
    pub destination_id: String,
    pub payment_method_type: PaymentMethodType,
    /// Wallet ID for credits, gateway payment-method ID for card/ACH, empty for offline.
    pub payment_method_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub track_attempts: bool,
    pub metadata: Metadata,
    pub gateway_payment_id: Option<String>,
    pub error_message: Option<String>,
    pub succeeded_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub entity_status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new_id() -> String {
        format!("pay_{}", Uuid::new_v4().simple())
    }

    /// Method-specific rules on the payment-method reference.
    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.destination_id.trim().is_empty() {
            return Err(SettlementError::Validation(
                "destination id is required".to_string(),
            ));
        }
        match self.payment_method_type {
            PaymentMethodType::Offline if !self.payment_method_id.is_empty() => {
                Err(SettlementError::Validation(
                    "payment method id is not allowed for offline payments".to_string(),
                ))
            }
            PaymentMethodType::Credits | PaymentMethodType::Ach
                if self.payment_method_id.is_empty() =>
            {
                Err(SettlementError::Validation(format!(
                    "payment method id is required for {} payments",
                    self.payment_method_type
                )))
            }
            // Card payments resolve the gateway default at charge time.
            _ => Ok(()),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.entity_status == EntityStatus::Deleted
    }

    /// Moves `expected` to `next`, refusing when the payment has moved on or
    /// the step is not a forward transition.
    pub fn transition(
        &mut self,
        expected: PaymentStatus,
        next: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        if self.status != expected || !expected.can_transition_to(next) {
            return Err(SettlementError::InvalidOperation(format!(
                "payment {} is {}, only {} payments can move to {}",
                self.id, self.status, expected, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Records the journal entry a credits debit produced.
    pub(crate) fn link_wallet_transaction(&mut self, transaction_id: &str) {
        self.metadata.insert(
            "wallet_transaction_id".to_string(),
            transaction_id.to_string(),
        );
    }

    pub(crate) fn mark_succeeded(&mut self, now: DateTime<Utc>) {
        self.status = PaymentStatus::Succeeded;
        self.succeeded_at = Some(now);
        self.error_message = None;
        self.updated_at = now;
    }

    pub(crate) fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) {
        self.status = PaymentStatus::Failed;
        self.failed_at = Some(now);
        self.error_message = Some(reason);
        self.updated_at = now;
    }
}

/// Append-only audit record of one processing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: String,
    pub payment_id: String,
    pub attempt_number: u32,
    pub status: PaymentStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    /// Starts the attempt following `latest`, or attempt 1 when there is none.
    pub fn next_after(
        payment_id: &str,
        latest: Option<&PaymentAttempt>,
        now: DateTime<Utc>,
    ) -> Self {
        let attempt_number = latest.map_or(1, |a| a.attempt_number + 1);
        Self {
            id: format!("attempt_{}", Uuid::new_v4().simple()),
            payment_id: payment_id.to_string(),
            attempt_number,
            status: PaymentStatus::Processing,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentFilter {
    pub destination_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub payment_method_type: Option<PaymentMethodType>,
}

impl PaymentFilter {
    pub fn succeeded_for_invoice(invoice_id: &str) -> Self {
        Self {
            destination_id: Some(invoice_id.to_string()),
            status: Some(PaymentStatus::Succeeded),
            payment_method_type: None,
        }
    }

    pub fn matches(&self, payment: &Payment) -> bool {
        !payment.is_deleted()
            && self
                .destination_id
                .as_ref()
                .is_none_or(|id| *id == payment.destination_id)
            && self.status.is_none_or(|s| s == payment.status)
            && self
                .payment_method_type
                .is_none_or(|t| t == payment.payment_method_type)
    }
}

/// Deterministic key for one logical charge.
///
/// Folds the destination, payment method, amount, currency and a timestamp
/// bucket into a SHA-256 digest, so resubmitting the same charge inside one
/// bucket yields the same key.
pub fn idempotency_key(
    destination_id: &str,
    payment_method_id: &str,
    amount: Amount,
    currency: &Currency,
    at: DateTime<Utc>,
    bucket_secs: i64,
) -> String {
    let bucket = at.timestamp().div_euclid(bucket_secs.max(1));
    let mut hasher = Sha256::new();
    hasher.update(b"payment\0");
    hasher.update(destination_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(payment_method_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(amount.value().normalize().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(currency.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(bucket.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// One leg of an orchestrated settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentMethodUsed {
    pub method_type: PaymentMethodType,
    /// The payment ID recorded for this leg.
    pub reference_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
}

/// Aggregate outcome of one orchestrated settlement attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentResult {
    pub success: bool,
    pub amount_paid: Decimal,
    pub remaining_amount: Decimal,
    pub methods_used: Vec<PaymentMethodUsed>,
}

impl PaymentResult {
    pub fn starting_at(remaining: Decimal) -> Self {
        Self {
            success: false,
            amount_paid: Decimal::ZERO,
            remaining_amount: remaining,
            methods_used: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, leg: PaymentMethodUsed) {
        if leg.status == PaymentStatus::Succeeded {
            self.amount_paid += leg.amount;
            self.remaining_amount -= leg.amount;
        }
        self.methods_used.push(leg);
    }

    pub fn wallet_amount(&self) -> Decimal {
        self.methods_used
            .iter()
            .filter(|m| m.method_type == PaymentMethodType::Credits)
            .filter(|m| m.status == PaymentStatus::Succeeded)
            .map(|m| m.amount)
            .sum()
    }
}
