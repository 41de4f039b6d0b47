use super::money::Currency;
use super::payment::{Payment, PaymentStatus};
use crate::error::SettlementError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category of an invoice line item, used by wallet price-type restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceType {
    Fixed,
    Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Finalized,
    Voided,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: String,
    pub price_type: PriceType,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub currency: Currency,
    pub amount_due: Decimal,
    pub amount_paid: Decimal,
    pub amount_remaining: Decimal,
    #[serde(default)]
    pub status: InvoiceStatus,
    /// `Pending` until fully paid, then `Succeeded`.
    pub payment_status: PaymentStatus,
    /// Set when the invoice was pushed to an external billing system, which
    /// cannot represent a card/wallet ledger split.
    #[serde(default)]
    pub external_sync: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn is_synced_externally(&self) -> bool {
        self.external_sync.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Succeeded
    }

    /// Recomputes the paid/remaining amounts from the full set of succeeded
    /// payments. Running it again over the same set yields the same invoice.
    pub fn apply_settled_payments(
        &mut self,
        payments: &[Payment],
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        let mut total_paid = Decimal::ZERO;
        for payment in payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Succeeded && !p.is_deleted())
        {
            if payment.currency != self.currency {
                return Err(SettlementError::InvalidOperation(format!(
                    "payment {} currency {} does not match invoice {} currency {}",
                    payment.id, payment.currency, self.id, self.currency
                )));
            }
            total_paid += payment.amount.value();
        }

        self.amount_paid = total_paid;
        // Overpayment is tolerated; the remaining balance never goes negative.
        self.amount_remaining = (self.amount_due - total_paid).max(Decimal::ZERO);

        if self.amount_remaining.is_zero() {
            self.payment_status = PaymentStatus::Succeeded;
            if self.paid_at.is_none() {
                self.paid_at = Some(now);
            }
            if self.status == InvoiceStatus::Draft {
                self.status = InvoiceStatus::Finalized;
                self.finalized_at = Some(now);
            }
        } else {
            self.payment_status = PaymentStatus::Pending;
        }
        Ok(())
    }
}

/// The part of an invoice's remaining balance attributable to each price type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceTypeBreakdown {
    buckets: BTreeMap<PriceType, Decimal>,
    /// Remaining balance not covered by any line item.
    unclassified: Decimal,
}

impl PriceTypeBreakdown {
    /// Buckets line items by price type and scales the buckets down to
    /// `remaining`.
    ///
    /// Earlier payments are not attributed to any price type, so a partly
    /// paid invoice keeps every bucket in proportion to its share of the
    /// line items. The last bucket absorbs the rounding remainder so the
    /// buckets always add up to `remaining`.
    pub fn from_line_items(line_items: &[InvoiceLineItem], remaining: Decimal) -> Self {
        let mut totals: BTreeMap<PriceType, Decimal> = BTreeMap::new();
        for item in line_items.iter().filter(|i| i.amount > Decimal::ZERO) {
            *totals.entry(item.price_type).or_default() += item.amount;
        }

        let remaining = remaining.max(Decimal::ZERO);
        let items_total: Decimal = totals.values().copied().sum();
        if items_total <= remaining {
            return Self {
                unclassified: remaining - items_total,
                buckets: totals,
            };
        }

        let mut budget = remaining;
        let mut buckets = BTreeMap::new();
        let last = totals.len().saturating_sub(1);
        for (index, (price_type, total)) in totals.into_iter().enumerate() {
            let share = if index == last {
                budget
            } else {
                (total * remaining / items_total).min(budget)
            };
            budget -= share;
            if share > Decimal::ZERO {
                buckets.insert(price_type, share);
            }
        }

        Self {
            buckets,
            unclassified: Decimal::ZERO,
        }
    }

    /// A breakdown where the whole amount is unclassified.
    pub fn unrestricted(amount: Decimal) -> Self {
        Self {
            buckets: BTreeMap::new(),
            unclassified: amount.max(Decimal::ZERO),
        }
    }

    pub fn amount_for(&self, price_type: PriceType) -> Decimal {
        self.buckets.get(&price_type).copied().unwrap_or_default()
    }

    pub fn total(&self) -> Decimal {
        self.buckets.values().copied().sum::<Decimal>() + self.unclassified
    }

    /// Takes up to `limit` out of the buckets a wallet may fund and returns
    /// how much was taken. `None` means unrestricted: every bucket plus the
    /// unclassified remainder.
    pub fn consume(&mut self, allowed: Option<&[PriceType]>, limit: Decimal) -> Decimal {
        let mut left = limit.max(Decimal::ZERO);
        for (price_type, amount) in self.buckets.iter_mut() {
            if left.is_zero() {
                break;
            }
            if allowed.is_some_and(|types| !types.contains(price_type)) {
                continue;
            }
            let take = (*amount).min(left);
            *amount -= take;
            left -= take;
        }
        if allowed.is_none() && !left.is_zero() {
            let take = self.unclassified.min(left);
            self.unclassified -= take;
            left -= take;
        }
        limit.max(Decimal::ZERO) - left
    }
}
