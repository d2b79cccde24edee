//! Headless workflow engine for an education-services CRM.
//!
//! Four cooperating pieces, in dependency order: the entity store
//! (`store`, one JSON list per entity type behind an injectable KV
//! backend), the deal pipeline state machine (`stage`), the quotation
//! lifecycle with its student-creation cascade (`quotation`), and the
//! installment planner (`installments`). `engine::CrmEngine` is the
//! façade a UI layer calls; `approvals` models decisions that arrive
//! from outside the sales flow.
//!
//! Single-user, single-writer by design: every mutation is a synchronous
//! whole-collection read-modify-write, last writer wins. Adapting this
//! to a multi-writer backend needs a transaction boundary per collection
//! write.

pub mod approvals;
pub mod contacts;
pub mod engine;
pub mod error;
pub mod installments;
pub mod quotation;
pub mod seed;
pub mod stage;
pub mod store;
pub mod types;

pub use engine::{CrmEngine, LeadDraft, QuotationDraft};
pub use error::EngineError;
pub use stage::StageForm;
pub use store::EntityStore;
