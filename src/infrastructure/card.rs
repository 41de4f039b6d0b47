use crate::domain::ports::{CardGateway, ChargeReceipt, ChargeRequest, GatewayConnection};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A card gateway that approves every charge except those against
/// payment methods marked as declining.
///
/// Every accepted charge is kept, so callers can inspect what was sent.
#[derive(Default, Clone)]
pub struct SimulatedCardGateway {
    connection: Option<GatewayConnection>,
    default_methods: HashMap<String, String>,
    declined_methods: HashSet<String>,
    charges: Arc<RwLock<Vec<ChargeRequest>>>,
}

impl SimulatedCardGateway {
    /// A gateway with no connection configured.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, provider: impl Into<String>) -> Self {
        let provider = provider.into();
        self.connection = Some(GatewayConnection {
            id: format!("conn_{provider}"),
            provider,
        });
        self
    }

    pub fn with_default_method(
        mut self,
        customer_id: impl Into<String>,
        payment_method_id: impl Into<String>,
    ) -> Self {
        self.default_methods
            .insert(customer_id.into(), payment_method_id.into());
        self
    }

    pub fn declining(mut self, payment_method_id: impl Into<String>) -> Self {
        self.declined_methods.insert(payment_method_id.into());
        self
    }

    pub async fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.read().await.clone()
    }
}

#[async_trait]
impl CardGateway for SimulatedCardGateway {
    async fn connection(&self) -> Result<Option<GatewayConnection>> {
        Ok(self.connection.clone())
    }

    async fn default_payment_method(&self, customer_id: &str) -> Result<Option<String>> {
        Ok(self.default_methods.get(customer_id).cloned())
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeReceipt> {
        if self.connection.is_none() {
            return Err(SettlementError::Configuration(
                "no card gateway connection configured".to_string(),
            ));
        }
        if self.declined_methods.contains(&request.payment_method_id) {
            return Err(SettlementError::Gateway(format!(
                "card {} declined",
                request.payment_method_id
            )));
        }
        self.charges.write().await.push(request);
        Ok(ChargeReceipt {
            gateway_payment_id: format!("ch_{}", Uuid::new_v4().simple()),
        })
    }
}
