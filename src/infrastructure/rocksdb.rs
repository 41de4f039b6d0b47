use crate::domain::payment::{
    EntityStatus, Payment, PaymentAttempt, PaymentFilter, PaymentStatus,
};
use crate::domain::ports::PaymentRepository;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing payments.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for storing payment attempts.
pub const CF_PAYMENT_ATTEMPTS: &str = "payment_attempts";

impl From<rocksdb::Error> for SettlementError {
    fn from(err: rocksdb::Error) -> Self {
        SettlementError::Storage(err.to_string())
    }
}

/// Attempt keys sort by payment, then by attempt number, so a payment's
/// attempts are contiguous and in order.
fn attempt_key(payment_id: &str, attempt_number: u32) -> Vec<u8> {
    let mut key = attempt_prefix(payment_id);
    key.extend_from_slice(&attempt_number.to_be_bytes());
    key
}

fn attempt_prefix(payment_id: &str) -> Vec<u8> {
    let mut key = payment_id.as_bytes().to_vec();
    key.push(0);
    key
}

/// A persistent payment store implementation using RocksDB.
///
/// Payments and their attempts live in separate Column Families. Writes are
/// serialized through a lock so the uniqueness checks on create hold.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbPaymentStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbPaymentStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_payments = ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default());
        let cf_attempts = ColumnFamilyDescriptor::new(CF_PAYMENT_ATTEMPTS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_payments, cf_attempts])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| SettlementError::Storage(format!("column family {name} not found")))
    }

    fn load_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, payment_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_payment(&self, payment: &Payment) -> Result<()> {
        let cf = self.cf(CF_PAYMENTS)?;
        let value = serde_json::to_vec(payment)?;
        self.db.put_cf(cf, payment.id.as_bytes(), value)?;
        Ok(())
    }

    fn all_payments(&self) -> Result<Vec<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut payments = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            payments.push(serde_json::from_slice(&value)?);
        }
        Ok(payments)
    }

    fn attempts_of(&self, payment_id: &str) -> Result<Vec<PaymentAttempt>> {
        let cf = self.cf(CF_PAYMENT_ATTEMPTS)?;
        let prefix = attempt_prefix(payment_id);
        let mut attempts = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            attempts.push(serde_json::from_slice(&value)?);
        }
        Ok(attempts)
    }

    fn latest_attempt(&self, payment_id: &str) -> Result<Option<PaymentAttempt>> {
        let cf = self.cf(CF_PAYMENT_ATTEMPTS)?;
        let prefix = attempt_prefix(payment_id);
        let upper = attempt_key(payment_id, u32::MAX);
        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(upper.as_slice(), Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                if key.starts_with(&prefix) {
                    Ok(Some(serde_json::from_slice(&value)?))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PaymentRepository for RocksDbPaymentStore {
    async fn create(&self, payment: Payment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.load_payment(&payment.id)?.is_some() {
            return Err(SettlementError::Conflict(format!(
                "payment {} already exists",
                payment.id
            )));
        }
        if self
            .all_payments()?
            .iter()
            .any(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Err(SettlementError::Conflict(format!(
                "a payment with idempotency key {} already exists",
                payment.idempotency_key
            )));
        }
        self.save_payment(&payment)
    }

    async fn get(&self, payment_id: &str) -> Result<Option<Payment>> {
        Ok(self.load_payment(payment_id)?.filter(|p| !p.is_deleted()))
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.load_payment(&payment.id)?.is_none() {
            return Err(SettlementError::not_found("payment", &payment.id));
        }
        self.save_payment(payment)
    }

    async fn transition_status(
        &self,
        payment_id: &str,
        expected: PaymentStatus,
        next: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let _guard = self.write_lock.lock().await;
        let mut payment = self
            .load_payment(payment_id)?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| SettlementError::not_found("payment", payment_id))?;
        payment.transition(expected, next, at)?;
        self.save_payment(&payment)?;
        Ok(payment)
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .all_payments()?
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(payments)
    }

    async fn delete(&self, payment_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut payment = self
            .load_payment(payment_id)?
            .ok_or_else(|| SettlementError::not_found("payment", payment_id))?;
        payment.entity_status = EntityStatus::Deleted;
        payment.updated_at = Utc::now();
        self.save_payment(&payment)
    }

    async fn create_attempt(&self, attempt: PaymentAttempt) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(latest) = self.latest_attempt(&attempt.payment_id)?
            && latest.attempt_number >= attempt.attempt_number
        {
            return Err(SettlementError::Conflict(format!(
                "attempt {} of payment {} is not newer than the recorded attempts",
                attempt.attempt_number, attempt.payment_id
            )));
        }
        let cf = self.cf(CF_PAYMENT_ATTEMPTS)?;
        let value = serde_json::to_vec(&attempt)?;
        self.db.put_cf(
            cf,
            attempt_key(&attempt.payment_id, attempt.attempt_number),
            value,
        )?;
        Ok(())
    }

    async fn update_attempt(&self, attempt: &PaymentAttempt) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_PAYMENT_ATTEMPTS)?;
        let key = attempt_key(&attempt.payment_id, attempt.attempt_number);
        if self.db.get_pinned_cf(cf, &key)?.is_none() {
            return Err(SettlementError::not_found("payment attempt", &attempt.id));
        }
        self.db.put_cf(cf, key, serde_json::to_vec(attempt)?)?;
        Ok(())
    }

    async fn get_latest_attempt(&self, payment_id: &str) -> Result<Option<PaymentAttempt>> {
        self.latest_attempt(payment_id)
    }

    async fn list_attempts(&self, payment_id: &str) -> Result<Vec<PaymentAttempt>> {
        self.attempts_of(payment_id)
    }
}
