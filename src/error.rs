//! Error types for the workflow engine.
//!
//! Two layers: `StoreError` (in `store`) covers persistence, and
//! `EngineError` here covers everything a caller of the engine façade
//! can hit. Validation refusals carry the full list of unmet conditions
//! so a caller can render them as-is.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::QuotationStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A stage transition was refused; each string is one unmet condition.
    #[error("Stage gate refused: {}", .0.join("; "))]
    GateRefused(Vec<String>),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A record referenced another record that does not resolve.
    #[error("{entity} not found: {id}")]
    MissingReference { entity: &'static str, id: String },

    #[error("Quotation is {actual:?}; operation requires {required:?}")]
    InvalidQuotationState {
        required: QuotationStatus,
        actual: QuotationStatus,
    },

    #[error("Quotation is locked and read-only")]
    QuotationLocked,

    #[error("Unknown payment template: {0}")]
    UnknownTemplate(String),

    #[error("Approval request not found: {0}")]
    ApprovalNotFound(String),
}

impl EngineError {
    /// True if this error is a synchronous validation refusal the UI
    /// should render inline (as opposed to a persistence fault).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::GateRefused(_)
                | EngineError::Validation(_)
                | EngineError::InvalidQuotationState { .. }
                | EngineError::QuotationLocked
                | EngineError::UnknownTemplate(_)
        )
    }
}
