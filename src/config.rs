use crate::application::wallet_allocation::WalletPaymentStrategy;
use clap::{ArgAction, Args};

/// Engine settings, read from flags with environment fallbacks.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct SettlementConfig {
    /// Maximum number of wallets one credits sweep may draw from
    #[arg(long, env = "SETTLEMENT_MAX_WALLETS", default_value_t = 5)]
    pub max_wallets: usize,

    /// Order in which eligible wallets are drawn down
    #[arg(
        long,
        env = "SETTLEMENT_WALLET_STRATEGY",
        value_enum,
        default_value_t = WalletPaymentStrategy::PromotionalFirst
    )]
    pub wallet_strategy: WalletPaymentStrategy,

    /// Keep an attempt history for payments created by the engine
    #[arg(
        long,
        env = "SETTLEMENT_TRACK_ATTEMPTS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub track_attempts: bool,

    /// Width in seconds of the timestamp bucket folded into idempotency keys
    #[arg(long, env = "SETTLEMENT_IDEMPOTENCY_BUCKET_SECS", default_value_t = 60)]
    pub idempotency_bucket_secs: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_wallets: 5,
            wallet_strategy: WalletPaymentStrategy::PromotionalFirst,
            track_attempts: true,
            idempotency_bucket_secs: 60,
        }
    }
}
