#![allow(dead_code)]

use rust_decimal::Decimal;
use settlement_engine::application::orchestrator::SubscriptionPaymentOrchestrator;
use settlement_engine::application::payments::PaymentService;
use settlement_engine::application::processor::PaymentProcessor;
use settlement_engine::application::wallet_allocation::WalletAllocationService;
use settlement_engine::config::SettlementConfig;
use settlement_engine::domain::invoice::{Invoice, InvoiceLineItem, InvoiceStatus, PriceType};
use settlement_engine::domain::money::Currency;
use settlement_engine::domain::payment::PaymentStatus;
use settlement_engine::domain::subscription::{
    CollectionMethod, Subscription, SubscriptionStatus,
};
use settlement_engine::domain::wallet::{
    Wallet, WalletConfig, WalletPriceType, WalletStatus, WalletType,
};
use settlement_engine::infrastructure::card::SimulatedCardGateway;
use settlement_engine::infrastructure::in_memory::{
    InMemoryInvoiceRepository, InMemoryPaymentRepository, InMemorySubscriptionRepository,
    InMemoryWalletRepository,
};
use std::sync::Arc;

pub const CUSTOMER: &str = "cus_1";
pub const SUBSCRIPTION: &str = "sub_1";
pub const INVOICE: &str = "inv_1";

/// In-memory stores wired into the full service stack.
pub struct Harness {
    pub payments: InMemoryPaymentRepository,
    pub invoices: InMemoryInvoiceRepository,
    pub wallets: InMemoryWalletRepository,
    pub subscriptions: InMemorySubscriptionRepository,
    pub gateway: SimulatedCardGateway,
    pub service: Arc<PaymentService>,
    pub orchestrator: SubscriptionPaymentOrchestrator,
}

impl Harness {
    pub fn new(gateway: Option<SimulatedCardGateway>) -> Self {
        Self::with_config(gateway, SettlementConfig::default())
    }

    pub fn with_config(gateway: Option<SimulatedCardGateway>, config: SettlementConfig) -> Self {
        let payments = InMemoryPaymentRepository::new();
        let invoices = InMemoryInvoiceRepository::new();
        let wallets = InMemoryWalletRepository::new();
        let subscriptions = InMemorySubscriptionRepository::new();

        let mut processor = PaymentProcessor::new(
            Arc::new(payments.clone()),
            Arc::new(invoices.clone()),
            Arc::new(wallets.clone()),
        );
        if let Some(gateway) = &gateway {
            processor = processor.with_card_gateway(Arc::new(gateway.clone()));
        }
        let service = Arc::new(PaymentService::new(
            Arc::new(payments.clone()),
            Arc::new(invoices.clone()),
            Arc::new(wallets.clone()),
            processor,
            config.clone(),
        ));
        let allocator = Arc::new(WalletAllocationService::new(
            Arc::new(wallets.clone()),
            Arc::new(invoices.clone()),
            service.clone(),
            config.clone(),
        ));
        let mut orchestrator = SubscriptionPaymentOrchestrator::new(
            service.clone(),
            allocator,
            Arc::new(subscriptions.clone()),
            config,
        );
        if let Some(gateway) = &gateway {
            orchestrator = orchestrator.with_card_gateway(Arc::new(gateway.clone()));
        }

        Self {
            payments,
            invoices,
            wallets,
            subscriptions,
            gateway: gateway.unwrap_or_default(),
            service,
            orchestrator,
        }
    }

    pub async fn seed(
        &self,
        subscription: Subscription,
        invoice: Invoice,
        line_items: Vec<InvoiceLineItem>,
        wallets: Vec<Wallet>,
    ) {
        self.subscriptions.insert(subscription).await;
        self.invoices.insert(invoice, line_items).await;
        for wallet in wallets {
            self.wallets.insert(wallet).await;
        }
    }
}

/// A connected gateway that approves `pm_ok` and declines `pm_bad`, with
/// `pm_ok` as the customer's default.
pub fn gateway() -> SimulatedCardGateway {
    SimulatedCardGateway::new()
        .with_connection("stripe")
        .with_default_method(CUSTOMER, "pm_ok")
        .declining("pm_bad")
}

pub fn subscription(status: SubscriptionStatus) -> Subscription {
    Subscription {
        id: SUBSCRIPTION.to_string(),
        customer_id: CUSTOMER.to_string(),
        invoicing_customer_id: None,
        status,
        collection_method: CollectionMethod::ChargeAutomatically,
        gateway_payment_method_id: None,
        version: 0,
    }
}

pub fn invoice(amount_due: Decimal) -> Invoice {
    Invoice {
        id: INVOICE.to_string(),
        customer_id: CUSTOMER.to_string(),
        subscription_id: Some(SUBSCRIPTION.to_string()),
        currency: Currency::new("USD").unwrap(),
        amount_due,
        amount_paid: Decimal::ZERO,
        amount_remaining: amount_due,
        status: InvoiceStatus::Finalized,
        payment_status: PaymentStatus::Pending,
        external_sync: None,
        paid_at: None,
        finalized_at: None,
    }
}

pub fn line_item(id: &str, price_type: PriceType, amount: Decimal) -> InvoiceLineItem {
    InvoiceLineItem {
        id: id.to_string(),
        price_type,
        amount,
    }
}

pub fn wallet(id: &str, wallet_type: WalletType, balance: Decimal) -> Wallet {
    Wallet {
        id: id.to_string(),
        customer_id: CUSTOMER.to_string(),
        currency: Currency::new("USD").unwrap(),
        balance,
        status: WalletStatus::Active,
        wallet_type,
        config: WalletConfig::default(),
    }
}

pub fn restricted_wallet(id: &str, balance: Decimal, allowed: &[WalletPriceType]) -> Wallet {
    Wallet {
        config: WalletConfig {
            allowed_price_types: allowed.to_vec(),
        },
        ..wallet(id, WalletType::PrePaid, balance)
    }
}
