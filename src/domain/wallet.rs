use super::invoice::PriceType;
use super::money::{Amount, Currency};
use super::payment::Metadata;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    Promotional,
    PrePaid,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Promotional => "promotional",
            WalletType::PrePaid => "pre_paid",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry of a wallet's price-type allow-list. `All` lifts the restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletPriceType {
    All,
    Fixed,
    Usage,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub allowed_price_types: Vec<WalletPriceType>,
}

impl WalletConfig {
    /// The price types this wallet may fund, or `None` when unrestricted
    /// (empty list or `ALL`).
    pub fn allowed_price_types(&self) -> Option<Vec<PriceType>> {
        if self.allowed_price_types.is_empty()
            || self.allowed_price_types.contains(&WalletPriceType::All)
        {
            return None;
        }
        let types = self
            .allowed_price_types
            .iter()
            .filter_map(|t| match t {
                WalletPriceType::Fixed => Some(PriceType::Fixed),
                WalletPriceType::Usage => Some(PriceType::Usage),
                WalletPriceType::All => None,
            })
            .collect();
        Some(types)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub customer_id: String,
    pub currency: Currency,
    pub balance: Decimal,
    pub status: WalletStatus,
    pub wallet_type: WalletType,
    #[serde(default)]
    pub config: WalletConfig,
}

impl Wallet {
    pub fn is_usable_for(&self, currency: &Currency) -> bool {
        self.status == WalletStatus::Active
            && self.currency == *currency
            && self.balance > Decimal::ZERO
    }
}

/// Input of the wallet debit primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletOperation {
    pub wallet_id: String,
    pub amount: Amount,
    pub reference_type: &'static str,
    pub reference_id: String,
    pub reason: &'static str,
    pub description: String,
    pub metadata: Metadata,
}

/// Journal entry written by every debit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference_type: String,
    pub reference_id: String,
    pub reason: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}
