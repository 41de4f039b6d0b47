use super::invoice::Invoice;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Incomplete,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    SendInvoice,
    ChargeAutomatically,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentBehavior {
    DefaultActive,
    DefaultIncomplete,
    AllowIncomplete,
    ErrorIfIncomplete,
}

impl fmt::Display for PaymentBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            PaymentBehavior::DefaultActive => "default_active",
            PaymentBehavior::DefaultIncomplete => "default_incomplete",
            PaymentBehavior::AllowIncomplete => "allow_incomplete",
            PaymentBehavior::ErrorIfIncomplete => "error_if_incomplete",
        };
        f.write_str(value)
    }
}

/// What triggered the settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceFlowType {
    SubscriptionCreation,
    Renewal,
    Manual,
    Cancel,
}

impl fmt::Display for InvoiceFlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            InvoiceFlowType::SubscriptionCreation => "subscription_creation",
            InvoiceFlowType::Renewal => "renewal",
            InvoiceFlowType::Manual => "manual",
            InvoiceFlowType::Cancel => "cancel",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer_id: String,
    /// Customer that is actually billed, when it differs from `customer_id`
    /// (parent or consolidated billing).
    #[serde(default)]
    pub invoicing_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub collection_method: CollectionMethod,
    /// Stored gateway payment method, preferred over the gateway default.
    #[serde(default)]
    pub gateway_payment_method_id: Option<String>,
    /// Bumped on every status write, checked by compare-and-swap.
    #[serde(default)]
    pub version: u64,
}

/// The customer whose wallets and card are used to settle `subscription`.
pub fn resolve_invoicing_customer(subscription: &Subscription) -> &str {
    subscription
        .invoicing_customer_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .unwrap_or(&subscription.customer_id)
}

/// Whether the wallet leg may still run after the card leg failed.
pub fn should_allow_partial_wallet_payment(
    behavior: PaymentBehavior,
    flow_type: InvoiceFlowType,
    invoice: &Invoice,
) -> bool {
    if invoice.is_synced_externally() {
        return false;
    }
    match flow_type {
        InvoiceFlowType::SubscriptionCreation => behavior == PaymentBehavior::DefaultActive,
        InvoiceFlowType::Renewal | InvoiceFlowType::Manual | InvoiceFlowType::Cancel => true,
    }
}
