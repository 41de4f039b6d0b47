use super::payments::{CreatePaymentRequest, PaymentExecutorRef};
use crate::config::SettlementConfig;
use crate::domain::invoice::{Invoice, InvoiceLineItem, PriceTypeBreakdown};
use crate::domain::money::Currency;
use crate::domain::payment::{Metadata, PaymentMethodType, PaymentMethodUsed, PaymentStatus};
use crate::domain::ports::{InvoiceRepositoryRef, WalletRepositoryRef};
use crate::domain::wallet::{Wallet, WalletType};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Order in which a customer's wallets are drawn down.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum WalletPaymentStrategy {
    #[default]
    PromotionalFirst,
    PrepaidFirst,
    /// Smallest balances first, so small wallets are emptied instead of
    /// leaving dust behind.
    BalanceOptimized,
}

impl WalletPaymentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletPaymentStrategy::PromotionalFirst => "promotional_first",
            WalletPaymentStrategy::PrepaidFirst => "prepaid_first",
            WalletPaymentStrategy::BalanceOptimized => "balance_optimized",
        }
    }

    /// Unknown and empty names resolve to `PromotionalFirst`.
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "prepaid_first" => WalletPaymentStrategy::PrepaidFirst,
            "balance_optimized" => WalletPaymentStrategy::BalanceOptimized,
            _ => WalletPaymentStrategy::PromotionalFirst,
        }
    }
}

impl fmt::Display for WalletPaymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps the wallets usable for `currency` and orders them by `strategy`.
/// Within a wallet type, smaller balances come first.
pub fn rank_wallets(
    wallets: Vec<Wallet>,
    currency: &Currency,
    strategy: WalletPaymentStrategy,
) -> Vec<Wallet> {
    let mut eligible: Vec<Wallet> = wallets
        .into_iter()
        .filter(|w| w.is_usable_for(currency))
        .collect();

    let type_rank = |wallet: &Wallet, first: WalletType| u8::from(wallet.wallet_type != first);
    eligible.sort_by(|a, b| {
        let by_type = match strategy {
            WalletPaymentStrategy::PromotionalFirst => type_rank(a, WalletType::Promotional)
                .cmp(&type_rank(b, WalletType::Promotional)),
            WalletPaymentStrategy::PrepaidFirst => {
                type_rank(a, WalletType::PrePaid).cmp(&type_rank(b, WalletType::PrePaid))
            }
            WalletPaymentStrategy::BalanceOptimized => Ordering::Equal,
        };
        by_type
            .then_with(|| a.balance.cmp(&b.balance))
            .then_with(|| a.id.cmp(&b.id))
    });
    eligible
}

fn breakdown_for(line_items: &[InvoiceLineItem], remaining: Decimal) -> PriceTypeBreakdown {
    if line_items.is_empty() {
        PriceTypeBreakdown::unrestricted(remaining)
    } else {
        PriceTypeBreakdown::from_line_items(line_items, remaining)
    }
}

/// How much of an invoice the customer's wallets can cover, without
/// touching any balance.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditAnalysis {
    /// Sum of the ranked wallets' balances.
    pub available_credits: Decimal,
    /// Portion of the remaining amount the wallets are allowed to pay once
    /// price-type restrictions are applied.
    pub wallet_payable: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletPaymentOptions {
    pub strategy: WalletPaymentStrategy,
    /// Zero means every eligible wallet.
    pub max_wallets: usize,
    /// Merged into each credits payment's metadata.
    pub metadata: Metadata,
    /// Whose wallets to draw; the invoice customer when absent.
    pub customer_id: Option<String>,
    /// Upper bound of the sweep; the invoice's remaining amount when absent.
    pub max_amount: Option<Decimal>,
}

impl Default for WalletPaymentOptions {
    fn default() -> Self {
        Self {
            strategy: WalletPaymentStrategy::PromotionalFirst,
            max_wallets: 0,
            metadata: Metadata::new(),
            customer_id: None,
            max_amount: None,
        }
    }
}

impl WalletPaymentOptions {
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self {
            strategy: config.wallet_strategy,
            max_wallets: config.max_wallets,
            ..Self::default()
        }
    }
}

/// Result of one multi-wallet sweep.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WalletSweep {
    pub amount_paid: Decimal,
    /// One entry per credits payment the sweep created, failed ones included.
    pub payments: Vec<PaymentMethodUsed>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletAllocator: Send + Sync {
    async fn get_wallets_for_payment(
        &self,
        customer_id: &str,
        currency: &Currency,
        strategy: WalletPaymentStrategy,
    ) -> Result<Vec<Wallet>>;

    async fn analyze_credits(&self, invoice: &Invoice, customer_id: &str)
    -> Result<CreditAnalysis>;

    /// Pays the invoice from wallets, one credits payment per wallet. A wallet
    /// that fails is logged and skipped; running short is not an error.
    async fn process_invoice_payment_with_wallets(
        &self,
        invoice: &Invoice,
        options: WalletPaymentOptions,
    ) -> Result<WalletSweep>;
}

pub type WalletAllocatorRef = Arc<dyn WalletAllocator>;

pub struct WalletAllocationService {
    wallets: WalletRepositoryRef,
    invoices: InvoiceRepositoryRef,
    executor: PaymentExecutorRef,
    config: SettlementConfig,
}

impl WalletAllocationService {
    pub fn new(
        wallets: WalletRepositoryRef,
        invoices: InvoiceRepositoryRef,
        executor: PaymentExecutorRef,
        config: SettlementConfig,
    ) -> Self {
        Self {
            wallets,
            invoices,
            executor,
            config,
        }
    }

    fn wallet_limit(max_wallets: usize, available: usize) -> usize {
        if max_wallets == 0 {
            available
        } else {
            max_wallets.min(available)
        }
    }
}

#[async_trait]
impl WalletAllocator for WalletAllocationService {
    async fn get_wallets_for_payment(
        &self,
        customer_id: &str,
        currency: &Currency,
        strategy: WalletPaymentStrategy,
    ) -> Result<Vec<Wallet>> {
        let wallets = self.wallets.wallets_by_customer(customer_id).await?;
        Ok(rank_wallets(wallets, currency, strategy))
    }

    async fn analyze_credits(
        &self,
        invoice: &Invoice,
        customer_id: &str,
    ) -> Result<CreditAnalysis> {
        let remaining = invoice.amount_remaining.max(Decimal::ZERO);
        let mut wallets = self
            .get_wallets_for_payment(customer_id, &invoice.currency, self.config.wallet_strategy)
            .await?;
        wallets.truncate(Self::wallet_limit(self.config.max_wallets, wallets.len()));

        let available_credits: Decimal = wallets.iter().map(|w| w.balance).sum();
        let line_items = self.invoices.line_items(&invoice.id).await?;
        let mut budget = breakdown_for(&line_items, remaining);

        let mut credits_left = available_credits.min(remaining);
        let mut wallet_payable = Decimal::ZERO;
        for wallet in &wallets {
            if credits_left.is_zero() {
                break;
            }
            let allowed = wallet.config.allowed_price_types();
            let taken = budget.consume(allowed.as_deref(), wallet.balance.min(credits_left));
            wallet_payable += taken;
            credits_left -= taken;
        }

        info!(
            invoice_id = %invoice.id,
            customer_id,
            available_credits = %available_credits,
            wallet_payable = %wallet_payable,
            wallets = wallets.len(),
            "wallets: credits analyzed"
        );

        Ok(CreditAnalysis {
            available_credits,
            wallet_payable,
        })
    }

    async fn process_invoice_payment_with_wallets(
        &self,
        invoice: &Invoice,
        options: WalletPaymentOptions,
    ) -> Result<WalletSweep> {
        let remaining = invoice.amount_remaining.max(Decimal::ZERO);
        let target = options
            .max_amount
            .map_or(remaining, |max| max.min(remaining));
        if target <= Decimal::ZERO {
            return Ok(WalletSweep::default());
        }

        let customer_id = options
            .customer_id
            .as_deref()
            .unwrap_or(&invoice.customer_id);
        let wallets = self
            .get_wallets_for_payment(customer_id, &invoice.currency, options.strategy)
            .await?;
        if wallets.is_empty() {
            info!(
                invoice_id = %invoice.id,
                customer_id,
                currency = %invoice.currency,
                "wallets: no suitable wallets for payment"
            );
            return Ok(WalletSweep::default());
        }

        let line_items = self.invoices.line_items(&invoice.id).await?;
        let mut budget = breakdown_for(&line_items, remaining);
        let limit = Self::wallet_limit(options.max_wallets, wallets.len());

        let mut left = target;
        let mut sweep = WalletSweep::default();
        for wallet in wallets.into_iter().take(limit) {
            if left.is_zero() {
                break;
            }

            let allowed = wallet.config.allowed_price_types();
            let mut claimed = budget.clone();
            let amount = claimed.consume(allowed.as_deref(), left.min(wallet.balance));
            if amount.is_zero() {
                debug!(wallet_id = %wallet.id, "wallets: nothing this wallet may pay, skipping");
                continue;
            }

            let mut metadata = Metadata::new();
            metadata.insert("wallet_type".to_string(), wallet.wallet_type.to_string());
            metadata.insert("wallet_id".to_string(), wallet.id.clone());
            metadata.extend(options.metadata.clone());

            let mut request = CreatePaymentRequest::for_invoice(
                invoice.id.clone(),
                PaymentMethodType::Credits,
                amount,
                invoice.currency.as_str(),
            );
            request.payment_method_id = wallet.id.clone();
            request.metadata = metadata;
            request.process_payment = true;

            match self.executor.create_payment(request).await {
                Ok(response) if response.status == PaymentStatus::Succeeded => {
                    left -= amount;
                    budget = claimed;
                    sweep.payments.push(PaymentMethodUsed {
                        method_type: PaymentMethodType::Credits,
                        reference_id: response.id,
                        amount,
                        status: PaymentStatus::Succeeded,
                    });
                }
                Ok(response) => {
                    warn!(
                        payment_id = %response.id,
                        wallet_id = %wallet.id,
                        status = %response.status,
                        "wallets: credits payment did not settle"
                    );
                    sweep.payments.push(PaymentMethodUsed {
                        method_type: PaymentMethodType::Credits,
                        reference_id: response.id,
                        amount,
                        status: response.status,
                    });
                }
                Err(SettlementError::PaymentFailed { payment_id, source }) => {
                    error!(
                        payment_id = %payment_id,
                        invoice_id = %invoice.id,
                        wallet_id = %wallet.id,
                        wallet_type = %wallet.wallet_type,
                        error = %source,
                        "wallets: credits payment failed"
                    );
                    sweep.payments.push(PaymentMethodUsed {
                        method_type: PaymentMethodType::Credits,
                        reference_id: payment_id,
                        amount,
                        status: PaymentStatus::Failed,
                    });
                }
                Err(err) => {
                    error!(
                        invoice_id = %invoice.id,
                        wallet_id = %wallet.id,
                        wallet_type = %wallet.wallet_type,
                        error = %err,
                        "wallets: failed to create credits payment"
                    );
                }
            }
        }

        sweep.amount_paid = target - left;
        if sweep.amount_paid.is_zero() {
            info!(invoice_id = %invoice.id, amount = %target, "wallets: no payments processed using wallets");
        } else {
            info!(
                invoice_id = %invoice.id,
                amount_paid = %sweep.amount_paid,
                remaining_amount = %(remaining - sweep.amount_paid),
                "wallets: payment processed using wallets"
            );
        }
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::payments::{MockPaymentExecutor, PaymentResponse};
    use crate::domain::invoice::{InvoiceStatus, PriceType};
    use crate::domain::payment::PaymentDestinationType;
    use crate::domain::wallet::{WalletConfig, WalletPriceType, WalletStatus};
    use crate::infrastructure::in_memory::{InMemoryInvoiceRepository, InMemoryWalletRepository};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn wallet(id: &str, wallet_type: WalletType, balance: Decimal) -> Wallet {
        Wallet {
            id: id.to_string(),
            customer_id: "cus_1".to_string(),
            currency: Currency::new("USD").unwrap(),
            balance,
            status: WalletStatus::Active,
            wallet_type,
            config: WalletConfig::default(),
        }
    }

    fn invoice(remaining: Decimal) -> Invoice {
        Invoice {
            id: "inv_1".to_string(),
            customer_id: "cus_1".to_string(),
            subscription_id: None,
            currency: Currency::new("USD").unwrap(),
            amount_due: remaining,
            amount_paid: Decimal::ZERO,
            amount_remaining: remaining,
            status: InvoiceStatus::Finalized,
            payment_status: PaymentStatus::Pending,
            external_sync: None,
            paid_at: None,
            finalized_at: None,
        }
    }

    fn response(id: &str, request: &CreatePaymentRequest, status: PaymentStatus) -> PaymentResponse {
        let now = Utc::now();
        PaymentResponse {
            id: id.to_string(),
            idempotency_key: format!("key_{id}"),
            destination_type: PaymentDestinationType::Invoice,
            destination_id: request.destination_id.clone(),
            payment_method_type: request.payment_method_type,
            payment_method_id: request.payment_method_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            status,
            track_attempts: true,
            metadata: request.metadata.clone(),
            gateway_payment_id: None,
            error_message: None,
            succeeded_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
            warnings: Vec::new(),
        }
    }

    async fn service_with(
        wallets: Vec<Wallet>,
        line_items: Vec<InvoiceLineItem>,
        executor: MockPaymentExecutor,
    ) -> WalletAllocationService {
        let wallet_repo = InMemoryWalletRepository::new();
        for w in wallets {
            wallet_repo.insert(w).await;
        }
        let invoices = InMemoryInvoiceRepository::new();
        invoices.insert(invoice(dec!(100)), line_items).await;
        WalletAllocationService::new(
            Arc::new(wallet_repo),
            Arc::new(invoices),
            Arc::new(executor),
            SettlementConfig::default(),
        )
    }

    #[test]
    fn test_rank_wallets_by_strategy() {
        let usd = Currency::new("USD").unwrap();
        let mut inactive = wallet("wal_off", WalletType::Promotional, dec!(1));
        inactive.status = WalletStatus::Inactive;
        let mut euro = wallet("wal_eur", WalletType::Promotional, dec!(1));
        euro.currency = Currency::new("EUR").unwrap();
        let wallets = vec![
            wallet("wal_pre_big", WalletType::PrePaid, dec!(90)),
            wallet("wal_promo", WalletType::Promotional, dec!(50)),
            wallet("wal_pre_small", WalletType::PrePaid, dec!(10)),
            wallet("wal_empty", WalletType::PrePaid, dec!(0)),
            inactive,
            euro,
        ];
        let ids = |ranked: Vec<Wallet>| ranked.into_iter().map(|w| w.id).collect::<Vec<_>>();

        assert_eq!(
            ids(rank_wallets(wallets.clone(), &usd, WalletPaymentStrategy::PromotionalFirst)),
            ["wal_promo", "wal_pre_small", "wal_pre_big"]
        );
        assert_eq!(
            ids(rank_wallets(wallets.clone(), &usd, WalletPaymentStrategy::PrepaidFirst)),
            ["wal_pre_small", "wal_pre_big", "wal_promo"]
        );
        assert_eq!(
            ids(rank_wallets(wallets, &usd, WalletPaymentStrategy::BalanceOptimized)),
            ["wal_pre_small", "wal_promo", "wal_pre_big"]
        );
    }

    #[test]
    fn test_unknown_strategy_defaults() {
        assert_eq!(
            WalletPaymentStrategy::from_name(""),
            WalletPaymentStrategy::PromotionalFirst
        );
        assert_eq!(
            WalletPaymentStrategy::from_name("richest_first"),
            WalletPaymentStrategy::PromotionalFirst
        );
        assert_eq!(
            WalletPaymentStrategy::from_name("prepaid_first"),
            WalletPaymentStrategy::PrepaidFirst
        );
    }

    #[tokio::test]
    async fn test_analysis_honors_price_type_restrictions() {
        let mut usage_only = wallet("wal_usage", WalletType::Promotional, dec!(150));
        usage_only.config = WalletConfig {
            allowed_price_types: vec![WalletPriceType::Usage],
        };
        let line_items = vec![
            InvoiceLineItem {
                id: "li_fixed".to_string(),
                price_type: PriceType::Fixed,
                amount: dec!(60),
            },
            InvoiceLineItem {
                id: "li_usage".to_string(),
                price_type: PriceType::Usage,
                amount: dec!(40),
            },
        ];
        let service =
            service_with(vec![usage_only], line_items, MockPaymentExecutor::new()).await;

        let analysis = service
            .analyze_credits(&invoice(dec!(100)), "cus_1")
            .await
            .unwrap();
        assert_eq!(analysis.available_credits, dec!(150));
        assert_eq!(analysis.wallet_payable, dec!(40));
    }

    #[tokio::test]
    async fn test_partly_paid_invoice_keeps_usage_share() {
        let mut usage_only = wallet("wal_usage", WalletType::Promotional, dec!(150));
        usage_only.config = WalletConfig {
            allowed_price_types: vec![WalletPriceType::Usage],
        };
        let line_items = vec![
            InvoiceLineItem {
                id: "li_fixed".to_string(),
                price_type: PriceType::Fixed,
                amount: dec!(60),
            },
            InvoiceLineItem {
                id: "li_usage".to_string(),
                price_type: PriceType::Usage,
                amount: dec!(40),
            },
        ];
        let service =
            service_with(vec![usage_only], line_items, MockPaymentExecutor::new()).await;

        let mut half_paid = invoice(dec!(100));
        half_paid.amount_paid = dec!(50);
        half_paid.amount_remaining = dec!(50);
        let analysis = service.analyze_credits(&half_paid, "cus_1").await.unwrap();
        assert_eq!(analysis.wallet_payable, dec!(20));
    }

    #[tokio::test]
    async fn test_analysis_does_not_double_count() {
        let wallets = vec![
            wallet("wal_a", WalletType::Promotional, dec!(70)),
            wallet("wal_b", WalletType::PrePaid, dec!(70)),
        ];
        let service = service_with(wallets, Vec::new(), MockPaymentExecutor::new()).await;
        let analysis = service
            .analyze_credits(&invoice(dec!(100)), "cus_1")
            .await
            .unwrap();
        assert_eq!(analysis.available_credits, dec!(140));
        assert_eq!(analysis.wallet_payable, dec!(100));
    }

    #[tokio::test]
    async fn test_sweep_skips_failed_wallet() {
        let wallets = vec![
            wallet("wal_promo", WalletType::Promotional, dec!(30)),
            wallet("wal_pre", WalletType::PrePaid, dec!(200)),
        ];
        let mut executor = MockPaymentExecutor::new();
        executor
            .expect_create_payment()
            .times(2)
            .returning(|request| {
                if request.payment_method_id == "wal_promo" {
                    Err(SettlementError::PaymentFailed {
                        payment_id: "pay_promo".to_string(),
                        source: Box::new(SettlementError::InvalidOperation(
                            "wallet frozen".to_string(),
                        )),
                    })
                } else {
                    assert_eq!(request.amount, dec!(100));
                    assert!(request.process_payment);
                    Ok(response("pay_pre", &request, PaymentStatus::Succeeded))
                }
            });
        let service = service_with(wallets, Vec::new(), executor).await;

        let sweep = service
            .process_invoice_payment_with_wallets(&invoice(dec!(100)), WalletPaymentOptions::default())
            .await
            .unwrap();
        assert_eq!(sweep.amount_paid, dec!(100));
        assert_eq!(sweep.payments.len(), 2);
        assert_eq!(sweep.payments[0].status, PaymentStatus::Failed);
        assert_eq!(sweep.payments[1].reference_id, "pay_pre");
    }

    #[tokio::test]
    async fn test_sweep_respects_max_wallets_and_amount() {
        let wallets = vec![
            wallet("wal_a", WalletType::Promotional, dec!(10)),
            wallet("wal_b", WalletType::Promotional, dec!(20)),
            wallet("wal_c", WalletType::Promotional, dec!(30)),
        ];
        let mut executor = MockPaymentExecutor::new();
        executor
            .expect_create_payment()
            .times(2)
            .returning(|request| Ok(response("pay", &request, PaymentStatus::Succeeded)));
        let service = service_with(wallets, Vec::new(), executor).await;

        let options = WalletPaymentOptions {
            max_wallets: 2,
            max_amount: Some(dec!(25)),
            ..WalletPaymentOptions::default()
        };
        let sweep = service
            .process_invoice_payment_with_wallets(&invoice(dec!(100)), options)
            .await
            .unwrap();
        assert_eq!(sweep.amount_paid, dec!(25));
        let amounts: Vec<Decimal> = sweep.payments.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![dec!(10), dec!(15)]);
    }

    #[tokio::test]
    async fn test_sweep_without_wallets_pays_nothing() {
        let mut executor = MockPaymentExecutor::new();
        executor.expect_create_payment().never();
        let service = service_with(Vec::new(), Vec::new(), executor).await;
        let sweep = service
            .process_invoice_payment_with_wallets(&invoice(dec!(100)), WalletPaymentOptions::default())
            .await
            .unwrap();
        assert_eq!(sweep, WalletSweep::default());
    }
}
