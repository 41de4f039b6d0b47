use crate::application::payments::PaymentResponse;
use crate::domain::payment::{PaymentMethodType, PaymentStatus};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct PaymentRecord<'a> {
    payment_id: &'a str,
    method_type: PaymentMethodType,
    method_id: &'a str,
    amount: Decimal,
    currency: &'a str,
    status: PaymentStatus,
}

/// Writes a payment ledger as CSV, one row per payment.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        // The header is written explicitly so an empty ledger still has one.
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        Self { writer }
    }

    /// Writes the header and every payment, then flushes.
    pub fn write_payments<'a>(
        &mut self,
        payments: impl IntoIterator<Item = &'a PaymentResponse>,
    ) -> Result<()> {
        self.writer.write_record([
            "payment_id",
            "method_type",
            "method_id",
            "amount",
            "currency",
            "status",
        ])?;
        for payment in payments {
            self.writer.serialize(PaymentRecord {
                payment_id: &payment.id,
                method_type: payment.payment_method_type,
                method_id: &payment.payment_method_id,
                amount: payment.amount.normalize(),
                currency: &payment.currency,
                status: payment.status,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
