use crate::application::orchestrator::{
    BehaviorOutcome, SettlementOrchestrator, SubscriptionPaymentOrchestrator,
};
use crate::application::payments::{PaymentResponse, PaymentService};
use crate::application::processor::PaymentProcessor;
use crate::application::wallet_allocation::{WalletAllocationService, WalletPaymentStrategy};
use crate::config::SettlementConfig;
use crate::domain::invoice::{Invoice, InvoiceLineItem};
use crate::domain::payment::PaymentFilter;
use crate::domain::ports::{
    CardGatewayRef, InvoiceRepositoryRef, PaymentRepositoryRef, SubscriptionRepositoryRef,
    WalletRepositoryRef,
};
use crate::domain::subscription::{InvoiceFlowType, PaymentBehavior, Subscription};
use crate::domain::wallet::Wallet;
use crate::error::{Result, SettlementError};
use crate::infrastructure::card::SimulatedCardGateway;
use crate::infrastructure::in_memory::{
    InMemoryInvoiceRepository, InMemorySubscriptionRepository, InMemoryWalletRepository,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use tracing::info;

/// Simulated card gateway settings. Its presence alone means a gateway is
/// wired in; `provider` decides whether it has a connection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardGatewaySpec {
    #[serde(default)]
    pub provider: Option<String>,
    /// Customer ID to default payment method ID.
    #[serde(default)]
    pub default_methods: BTreeMap<String, String>,
    #[serde(default)]
    pub declined_methods: Vec<String>,
}

impl CardGatewaySpec {
    pub fn build(&self) -> SimulatedCardGateway {
        let mut gateway = SimulatedCardGateway::new();
        if let Some(provider) = &self.provider {
            gateway = gateway.with_connection(provider.clone());
        }
        for (customer_id, method) in &self.default_methods {
            gateway = gateway.with_default_method(customer_id.clone(), method.clone());
        }
        for method in &self.declined_methods {
            gateway = gateway.declining(method.clone());
        }
        gateway
    }
}

/// One settlement run: the state to seed and the policy to apply.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub subscription: Subscription,
    pub invoice: Invoice,
    #[serde(default)]
    pub line_items: Vec<InvoiceLineItem>,
    #[serde(default)]
    pub wallets: Vec<Wallet>,
    pub behavior: PaymentBehavior,
    pub flow_type: InvoiceFlowType,
    #[serde(default)]
    pub card_gateway: Option<CardGatewaySpec>,
    /// Overrides the configured strategy; unknown names mean promotional_first.
    #[serde(default)]
    pub wallet_strategy: Option<String>,
}

/// What a scenario run left behind.
#[derive(Debug)]
pub struct ScenarioReport {
    /// `Err` holds the orchestration's hard error; the ledger is still valid.
    pub outcome: Result<BehaviorOutcome>,
    /// Every payment recorded against the invoice.
    pub ledger: Vec<PaymentResponse>,
    pub invoice: Invoice,
    pub subscription: Subscription,
}

impl Scenario {
    pub fn from_reader<R: Read>(source: R) -> Result<Self> {
        let scenario: Scenario = serde_json::from_reader(source)?;
        if scenario.invoice.subscription_id.as_deref() != Some(scenario.subscription.id.as_str())
        {
            return Err(SettlementError::Validation(format!(
                "invoice {} does not belong to subscription {}",
                scenario.invoice.id, scenario.subscription.id
            )));
        }
        Ok(scenario)
    }

    /// Seeds in-memory invoices, wallets and subscriptions, settles the
    /// invoice through `payments`, and reports the result.
    pub async fn run(
        self,
        mut config: SettlementConfig,
        payments: PaymentRepositoryRef,
    ) -> Result<ScenarioReport> {
        if let Some(name) = &self.wallet_strategy {
            config.wallet_strategy = WalletPaymentStrategy::from_name(name);
        }

        let invoice_store = InMemoryInvoiceRepository::new();
        invoice_store
            .insert(self.invoice.clone(), self.line_items.clone())
            .await;
        let wallet_store = InMemoryWalletRepository::new();
        for wallet in self.wallets {
            wallet_store.insert(wallet).await;
        }
        let subscription_store = InMemorySubscriptionRepository::new();
        subscription_store.insert(self.subscription.clone()).await;

        let invoices: InvoiceRepositoryRef = Arc::new(invoice_store);
        let wallets: WalletRepositoryRef = Arc::new(wallet_store);
        let subscriptions: SubscriptionRepositoryRef = Arc::new(subscription_store);
        let gateway: Option<CardGatewayRef> = self
            .card_gateway
            .as_ref()
            .map(|spec| Arc::new(spec.build()) as CardGatewayRef);

        let mut processor =
            PaymentProcessor::new(payments.clone(), invoices.clone(), wallets.clone());
        if let Some(gateway) = &gateway {
            processor = processor.with_card_gateway(gateway.clone());
        }
        let service = Arc::new(PaymentService::new(
            payments,
            invoices.clone(),
            wallets.clone(),
            processor,
            config.clone(),
        ));
        let allocator = Arc::new(WalletAllocationService::new(
            wallets,
            invoices.clone(),
            service.clone(),
            config.clone(),
        ));
        let mut orchestrator = SubscriptionPaymentOrchestrator::new(
            service.clone(),
            allocator,
            subscriptions.clone(),
            config,
        );
        if let Some(gateway) = gateway {
            orchestrator = orchestrator.with_card_gateway(gateway);
        }

        info!(
            subscription_id = %self.subscription.id,
            invoice_id = %self.invoice.id,
            "scenario: settling invoice"
        );
        let outcome = orchestrator
            .handle_payment_behavior(
                &self.subscription,
                &self.invoice,
                self.behavior,
                self.flow_type,
            )
            .await;

        let ledger = service
            .list_payments(&PaymentFilter {
                destination_id: Some(self.invoice.id.clone()),
                ..PaymentFilter::default()
            })
            .await?;
        let invoice = invoices
            .get(&self.invoice.id)
            .await?
            .ok_or_else(|| SettlementError::not_found("invoice", &self.invoice.id))?;
        let subscription = subscriptions
            .get(&self.subscription.id)
            .await?
            .ok_or_else(|| SettlementError::not_found("subscription", &self.subscription.id))?;

        Ok(ScenarioReport {
            outcome,
            ledger,
            invoice,
            subscription,
        })
    }
}
