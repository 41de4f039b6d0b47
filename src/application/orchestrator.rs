use super::payments::{CreatePaymentRequest, PaymentExecutorRef};
use super::wallet_allocation::{WalletAllocatorRef, WalletPaymentOptions};
use crate::config::SettlementConfig;
use crate::domain::invoice::Invoice;
use crate::domain::payment::{Metadata, PaymentMethodType, PaymentMethodUsed, PaymentResult, PaymentStatus};
use crate::domain::ports::{CardGatewayRef, SubscriptionRepositoryRef};
use crate::domain::subscription::{
    CollectionMethod, InvoiceFlowType, PaymentBehavior, Subscription, SubscriptionStatus,
    resolve_invoicing_customer, should_allow_partial_wallet_payment,
};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Status writes retried after a version conflict before giving up.
const MAX_STATUS_WRITE_ATTEMPTS: usize = 3;

const PAYMENT_SOURCE: &str = "subscription_auto_payment";

/// What a `handle_payment_behavior` call did.
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorOutcome {
    /// `None` when the policy settles nothing (send_invoice).
    pub payment: Option<PaymentResult>,
    /// Subscription status once the call returns.
    pub subscription_status: SubscriptionStatus,
}

#[async_trait]
pub trait SettlementOrchestrator: Send + Sync {
    /// Applies the subscription's collection method and payment behavior to
    /// `invoice`, settling it when the policy calls for it.
    async fn handle_payment_behavior(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        behavior: PaymentBehavior,
        flow_type: InvoiceFlowType,
    ) -> Result<BehaviorOutcome>;

    /// Card first for what wallets may not cover, wallets second.
    async fn process_payment(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        behavior: PaymentBehavior,
        flow_type: InvoiceFlowType,
    ) -> Result<PaymentResult>;

    /// Wallet-only settlement; returns the amount paid.
    async fn process_credits_payment_for_invoice(
        &self,
        invoice: &Invoice,
        subscription: &Subscription,
    ) -> Result<Decimal>;
}

pub type SettlementOrchestratorRef = Arc<dyn SettlementOrchestrator>;

pub struct SubscriptionPaymentOrchestrator {
    payments: PaymentExecutorRef,
    wallets: WalletAllocatorRef,
    subscriptions: SubscriptionRepositoryRef,
    card_gateway: Option<CardGatewayRef>,
    config: SettlementConfig,
}

impl SubscriptionPaymentOrchestrator {
    pub fn new(
        payments: PaymentExecutorRef,
        wallets: WalletAllocatorRef,
        subscriptions: SubscriptionRepositoryRef,
        config: SettlementConfig,
    ) -> Self {
        Self {
            payments,
            wallets,
            subscriptions,
            card_gateway: None,
            config,
        }
    }

    pub fn with_card_gateway(mut self, gateway: CardGatewayRef) -> Self {
        self.card_gateway = Some(gateway);
        self
    }

    fn payment_metadata(subscription: &Subscription, customer_id: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("customer_id".to_string(), customer_id.to_string());
        metadata.insert("subscription_id".to_string(), subscription.id.clone());
        metadata.insert("payment_source".to_string(), PAYMENT_SOURCE.to_string());
        metadata
    }

    /// Stored subscription method first, then the gateway's customer default.
    async fn resolve_card_method(
        &self,
        gateway: &CardGatewayRef,
        subscription: &Subscription,
        customer_id: &str,
    ) -> Result<String> {
        if let Some(method) = subscription
            .gateway_payment_method_id
            .as_deref()
            .filter(|m| !m.is_empty())
        {
            debug!(subscription_id = %subscription.id, payment_method_id = method, "orchestrator: using subscription payment method");
            return Ok(method.to_string());
        }
        gateway
            .default_payment_method(customer_id)
            .await?
            .ok_or_else(|| {
                SettlementError::Validation(format!(
                    "customer {customer_id} has no payment method for automatic charging"
                ))
            })
    }

    /// Charges the card leg. `Err` means no payment was recorded; a payment
    /// that was recorded but failed comes back as a `Failed` leg.
    async fn charge_card(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        customer_id: &str,
        amount: Decimal,
    ) -> Result<PaymentMethodUsed> {
        let Some(gateway) = &self.card_gateway else {
            return Err(SettlementError::Configuration(
                "no card gateway configured".to_string(),
            ));
        };
        if gateway.connection().await?.is_none() {
            return Err(SettlementError::Configuration(
                "no card gateway connection configured".to_string(),
            ));
        }
        let payment_method_id = self
            .resolve_card_method(gateway, subscription, customer_id)
            .await?;

        let mut request = CreatePaymentRequest::for_invoice(
            invoice.id.clone(),
            PaymentMethodType::Card,
            amount,
            invoice.currency.as_str(),
        );
        request.payment_method_id = payment_method_id;
        request.metadata = Self::payment_metadata(subscription, customer_id);
        request.process_payment = true;

        match self.payments.create_payment(request).await {
            Ok(response) => Ok(PaymentMethodUsed {
                method_type: PaymentMethodType::Card,
                reference_id: response.id,
                amount,
                status: response.status,
            }),
            Err(SettlementError::PaymentFailed { payment_id, source }) => {
                warn!(
                    subscription_id = %subscription.id,
                    payment_id = %payment_id,
                    error = %source,
                    "orchestrator: card charge failed"
                );
                Ok(PaymentMethodUsed {
                    method_type: PaymentMethodType::Card,
                    reference_id: payment_id,
                    amount,
                    status: PaymentStatus::Failed,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Writes `target` through compare-and-swap, re-reading the subscription
    /// before each try. No write happens when the status already matches.
    async fn transition_subscription(
        &self,
        subscription_id: &str,
        target: SubscriptionStatus,
    ) -> Result<SubscriptionStatus> {
        for attempt in 1..=MAX_STATUS_WRITE_ATTEMPTS {
            let current = self
                .subscriptions
                .get(subscription_id)
                .await?
                .ok_or_else(|| SettlementError::not_found("subscription", subscription_id))?;

            if current.status == target {
                debug!(subscription_id, status = %target, "orchestrator: subscription already in target status");
                return Ok(target);
            }

            match self
                .subscriptions
                .compare_and_set_status(subscription_id, current.version, target)
                .await
            {
                Ok(updated) => {
                    info!(
                        subscription_id,
                        from = %current.status,
                        to = %updated.status,
                        "orchestrator: subscription status updated"
                    );
                    return Ok(updated.status);
                }
                Err(SettlementError::Conflict(reason)) => {
                    warn!(subscription_id, attempt, reason = %reason, "orchestrator: subscription changed concurrently, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(SettlementError::Conflict(format!(
            "subscription {subscription_id} kept changing, status {target} not written"
        )))
    }

    async fn current_status(&self, subscription: &Subscription) -> Result<SubscriptionStatus> {
        Ok(self
            .subscriptions
            .get(&subscription.id)
            .await?
            .map_or(subscription.status, |s| s.status))
    }

    async fn handle_send_invoice(
        &self,
        subscription: &Subscription,
        behavior: PaymentBehavior,
    ) -> Result<BehaviorOutcome> {
        let target = match behavior {
            PaymentBehavior::DefaultActive => SubscriptionStatus::Active,
            PaymentBehavior::DefaultIncomplete => SubscriptionStatus::Incomplete,
            PaymentBehavior::AllowIncomplete | PaymentBehavior::ErrorIfIncomplete => {
                return Err(SettlementError::Configuration(format!(
                    "payment behavior {behavior} is not supported for send_invoice collection"
                )));
            }
        };
        let subscription_status = self.transition_subscription(&subscription.id, target).await?;
        Ok(BehaviorOutcome {
            payment: None,
            subscription_status,
        })
    }

    async fn handle_charge_automatically(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        behavior: PaymentBehavior,
        flow_type: InvoiceFlowType,
    ) -> Result<BehaviorOutcome> {
        match behavior {
            PaymentBehavior::AllowIncomplete => {
                let result = self
                    .process_payment(subscription, invoice, behavior, flow_type)
                    .await?;
                let target = if result.success {
                    SubscriptionStatus::Active
                } else {
                    SubscriptionStatus::Incomplete
                };
                let subscription_status =
                    self.transition_subscription(&subscription.id, target).await?;
                Ok(BehaviorOutcome {
                    payment: Some(result),
                    subscription_status,
                })
            }
            PaymentBehavior::ErrorIfIncomplete => {
                let result = self
                    .process_payment(subscription, invoice, behavior, flow_type)
                    .await?;
                if result.success {
                    let subscription_status = self
                        .transition_subscription(&subscription.id, SubscriptionStatus::Active)
                        .await?;
                    return Ok(BehaviorOutcome {
                        payment: Some(result),
                        subscription_status,
                    });
                }
                if flow_type == InvoiceFlowType::SubscriptionCreation {
                    error!(
                        subscription_id = %subscription.id,
                        invoice_id = %invoice.id,
                        remaining = %result.remaining_amount,
                        "orchestrator: payment incomplete, subscription cannot be created"
                    );
                    return Err(SettlementError::PaymentIncomplete {
                        invoice_id: invoice.id.clone(),
                        remaining: result.remaining_amount,
                    });
                }
                info!(
                    subscription_id = %subscription.id,
                    invoice_id = %invoice.id,
                    flow = %flow_type,
                    "orchestrator: payment incomplete, invoice left pending for retry"
                );
                let subscription_status = self.current_status(subscription).await?;
                Ok(BehaviorOutcome {
                    payment: Some(result),
                    subscription_status,
                })
            }
            PaymentBehavior::DefaultActive => {
                let result = self
                    .process_payment(subscription, invoice, behavior, flow_type)
                    .await?;
                let subscription_status = self
                    .transition_subscription(&subscription.id, SubscriptionStatus::Active)
                    .await?;
                Ok(BehaviorOutcome {
                    payment: Some(result),
                    subscription_status,
                })
            }
            PaymentBehavior::DefaultIncomplete => Err(SettlementError::Configuration(format!(
                "payment behavior {behavior} is not supported for charge_automatically collection"
            ))),
        }
    }
}

#[async_trait]
impl SettlementOrchestrator for SubscriptionPaymentOrchestrator {
    async fn handle_payment_behavior(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        behavior: PaymentBehavior,
        flow_type: InvoiceFlowType,
    ) -> Result<BehaviorOutcome> {
        info!(
            subscription_id = %subscription.id,
            invoice_id = %invoice.id,
            behavior = %behavior,
            flow = %flow_type,
            "orchestrator: handling payment behavior"
        );

        if flow_type == InvoiceFlowType::Manual {
            let result = match self
                .process_payment(subscription, invoice, behavior, flow_type)
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    warn!(subscription_id = %subscription.id, error = %err, "orchestrator: manual payment failed");
                    PaymentResult::starting_at(invoice.amount_remaining.max(Decimal::ZERO))
                }
            };
            let subscription_status = if result.success {
                self.transition_subscription(&subscription.id, SubscriptionStatus::Active)
                    .await?
            } else {
                self.current_status(subscription).await?
            };
            return Ok(BehaviorOutcome {
                payment: Some(result),
                subscription_status,
            });
        }

        match subscription.collection_method {
            CollectionMethod::SendInvoice => self.handle_send_invoice(subscription, behavior).await,
            CollectionMethod::ChargeAutomatically => {
                self.handle_charge_automatically(subscription, invoice, behavior, flow_type)
                    .await
            }
        }
    }

    async fn process_payment(
        &self,
        subscription: &Subscription,
        invoice: &Invoice,
        behavior: PaymentBehavior,
        flow_type: InvoiceFlowType,
    ) -> Result<PaymentResult> {
        let remaining = invoice.amount_remaining.max(Decimal::ZERO);
        let mut result = PaymentResult::starting_at(remaining);
        if remaining.is_zero() {
            result.success = true;
            return Ok(result);
        }

        let customer_id = resolve_invoicing_customer(subscription);
        let wallet_payable = match self.wallets.analyze_credits(invoice, customer_id).await {
            Ok(analysis) => analysis.wallet_payable.min(remaining),
            Err(err) => {
                error!(subscription_id = %subscription.id, error = %err, "orchestrator: credit analysis failed, treating credits as unavailable");
                Decimal::ZERO
            }
        };
        let card_amount = remaining - wallet_payable;
        let wallet_amount = wallet_payable;

        info!(
            subscription_id = %subscription.id,
            invoice_id = %invoice.id,
            remaining = %remaining,
            card_amount = %card_amount,
            wallet_amount = %wallet_amount,
            "orchestrator: settlement split computed"
        );

        if card_amount > Decimal::ZERO {
            let card_paid = match self
                .charge_card(subscription, invoice, customer_id, card_amount)
                .await
            {
                Ok(leg) => {
                    let paid = leg.status == PaymentStatus::Succeeded;
                    result.record(leg);
                    paid
                }
                Err(err) => {
                    warn!(subscription_id = %subscription.id, error = %err, "orchestrator: card charge not attempted");
                    false
                }
            };

            if !card_paid && !should_allow_partial_wallet_payment(behavior, flow_type, invoice) {
                info!(
                    subscription_id = %subscription.id,
                    behavior = %behavior,
                    flow = %flow_type,
                    "orchestrator: card failed and partial wallet payment is not allowed"
                );
                result.success = false;
                return Ok(result);
            }
        }

        if wallet_amount > Decimal::ZERO {
            let options = WalletPaymentOptions {
                metadata: Self::payment_metadata(subscription, customer_id),
                customer_id: Some(customer_id.to_string()),
                max_amount: Some(wallet_amount),
                ..WalletPaymentOptions::from_config(&self.config)
            };
            match self
                .wallets
                .process_invoice_payment_with_wallets(invoice, options)
                .await
            {
                Ok(sweep) => sweep.payments.into_iter().for_each(|leg| result.record(leg)),
                Err(err) => {
                    error!(subscription_id = %subscription.id, error = %err, "orchestrator: wallet sweep failed");
                }
            }
        }

        result.success = result.remaining_amount.is_zero();
        info!(
            subscription_id = %subscription.id,
            success = result.success,
            amount_paid = %result.amount_paid,
            remaining_amount = %result.remaining_amount,
            "orchestrator: payment processing completed"
        );
        Ok(result)
    }

    async fn process_credits_payment_for_invoice(
        &self,
        invoice: &Invoice,
        subscription: &Subscription,
    ) -> Result<Decimal> {
        let customer_id = resolve_invoicing_customer(subscription);
        let options = WalletPaymentOptions {
            metadata: Self::payment_metadata(subscription, customer_id),
            customer_id: Some(customer_id.to_string()),
            ..WalletPaymentOptions::from_config(&self.config)
        };
        let sweep = self
            .wallets
            .process_invoice_payment_with_wallets(invoice, options)
            .await?;
        Ok(sweep.amount_paid)
    }
}
