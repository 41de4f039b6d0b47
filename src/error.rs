use miette::Diagnostic;
use thiserror::Error;

/// Coarse error category, used by callers that branch on the kind of failure
/// rather than on the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidOperation,
    Conflict,
    Configuration,
    System,
}

#[derive(Error, Diagnostic, Debug)]
pub enum SettlementError {
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(settlement::validation),
        help("check the request fields and try again")
    )]
    Validation(String),

    #[error("{entity} not found: {id}")]
    #[diagnostic(
        code(settlement::not_found),
        help("make sure the referenced resource exists and has not been deleted")
    )]
    NotFound { entity: &'static str, id: String },

    #[error("invalid operation: {0}")]
    #[diagnostic(
        code(settlement::invalid_operation),
        help("the resource is not in a state that allows this operation")
    )]
    InvalidOperation(String),

    #[error("conflict: {0}")]
    #[diagnostic(
        code(settlement::conflict),
        help("the resource was changed concurrently or the request was already submitted")
    )]
    Conflict(String),

    #[error("configuration error: {0}")]
    #[diagnostic(
        code(settlement::configuration),
        help("the subscription's collection method and payment behavior combination is not supported")
    )]
    Configuration(String),

    #[error("{0} payment processing not implemented")]
    #[diagnostic(
        code(settlement::not_implemented),
        help("this payment method type cannot be settled by the engine")
    )]
    NotImplemented(&'static str),

    #[error("card gateway error: {0}")]
    #[diagnostic(
        code(settlement::gateway),
        help("the card charge was declined or the gateway is unavailable; the invoice stays pending")
    )]
    Gateway(String),

    #[error("storage error: {0}")]
    #[diagnostic(code(settlement::storage), help("retry the request later"))]
    Storage(String),

    #[error("payment {payment_id} moved funds but its terminal status could not be recorded: {reason}")]
    #[diagnostic(
        code(settlement::unrecorded),
        severity(Error),
        help("reconcile this payment manually against the card gateway")
    )]
    Unrecorded { payment_id: String, reason: String },

    #[error("payment {payment_id} failed")]
    #[diagnostic(
        code(settlement::payment_failed),
        help("the payment was recorded as failed; inspect its error message")
    )]
    PaymentFailed {
        payment_id: String,
        #[source]
        source: Box<SettlementError>,
    },

    #[error("invoice {invoice_id} was not fully paid, {remaining} remaining")]
    #[diagnostic(
        code(settlement::payment_incomplete),
        help("the payment behavior does not allow an incomplete subscription for this flow")
    )]
    PaymentIncomplete {
        invoice_id: String,
        remaining: rust_decimal::Decimal,
    },

    #[error("serialization error: {0}")]
    #[diagnostic(code(settlement::serialization))]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    #[diagnostic(code(settlement::csv))]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(settlement::io))]
    Io(#[from] std::io::Error),
}

impl SettlementError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidOperation(_)
            | Self::NotImplemented(_)
            | Self::PaymentFailed { .. }
            | Self::PaymentIncomplete { .. } => ErrorKind::InvalidOperation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Gateway(_)
            | Self::Storage(_)
            | Self::Unrecorded { .. }
            | Self::Serialization(_)
            | Self::Csv(_)
            | Self::Io(_) => ErrorKind::System,
        }
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
