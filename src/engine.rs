//! The engine façade: the single entry point a UI layer calls.
//!
//! Holds the injected entity store and the approval registry, and wires
//! the stage machine, quotation lifecycle, and installment planner to
//! persistence. Every mutation is a synchronous read-modify-write round
//! trip against the store (last writer wins; see the store docs).

use std::sync::Arc;

use chrono::Utc;

use crate::approvals::{ApprovalKind, ApprovalRegistry, ApprovalRequest, ApprovalStatus};
use crate::contacts::{upsert_contact, ContactDraft};
use crate::error::EngineError;
use crate::installments::{self, validate_total};
use crate::quotation;
use crate::stage::{self, StageForm};
use crate::store::EntityStore;
use crate::types::{
    Activity, ActivityType, Contact, Contract, ContractStatus, Deal, DealStage, Installment,
    Invoice, InvoiceStatus, Lead, LeadSource, LeadStatus, Meeting, MeetingStatus, Quotation,
    QuotationStatus, Student, StudentInfo, StudentStatus, Transaction, TransactionStatus,
};

/// Incoming lead data; id, status, and timestamps are assigned on intake.
#[derive(Debug, Clone, Default)]
pub struct LeadDraft {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub source: LeadSource,
    pub program: String,
    pub owner_id: Option<String>,
    pub student_info: StudentInfo,
}

/// Incoming quotation data; `final_amount` is computed, never supplied.
#[derive(Debug, Clone, Default)]
pub struct QuotationDraft {
    pub deal_id: Option<String>,
    pub lead_id: Option<String>,
    pub customer_name: String,
    pub amount: f64,
    pub discount: f64,
}

pub struct CrmEngine {
    store: EntityStore,
    approvals: Arc<ApprovalRegistry>,
}

impl CrmEngine {
    pub fn new(store: EntityStore) -> Self {
        Self {
            store,
            approvals: Arc::new(ApprovalRegistry::new()),
        }
    }

    /// Engine over an ephemeral in-memory store.
    pub fn in_memory() -> Self {
        Self::new(EntityStore::in_memory())
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn approvals(&self) -> Arc<ApprovalRegistry> {
        self.approvals.clone()
    }

    /// Seed the demo dataset once. Returns true if seeding ran.
    pub fn ensure_seeded(&self) -> Result<bool, EngineError> {
        if self.store.is_seeded() {
            return Ok(false);
        }
        crate::seed::apply(&self.store)?;
        Ok(true)
    }

    // =========================================================================
    // Leads
    // =========================================================================

    pub fn create_lead(&self, draft: LeadDraft) -> Result<Lead, EngineError> {
        let now = Utc::now();
        let lead = Lead {
            id: uuid::Uuid::new_v4().to_string(),
            name: draft.name,
            phone: draft.phone,
            email: draft.email,
            source: draft.source,
            program: draft.program,
            status: LeadStatus::New,
            owner_id: draft.owner_id,
            student_info: draft.student_info,
            activities: Vec::new(),
            value: 0.0,
            probability: 0,
            discount: 0.0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_lead(lead.clone())?;
        log::info!("Lead created: {} ({})", lead.name, lead.id);
        Ok(lead)
    }

    pub fn log_lead_activity(
        &self,
        lead_id: &str,
        activity_type: ActivityType,
        content: &str,
    ) -> Result<Lead, EngineError> {
        let activity = Activity::new(activity_type, content);
        self.store
            .update_lead(lead_id, |lead| {
                lead.activities.push(activity);
                lead.updated_at = Utc::now();
            })?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Lead",
                id: lead_id.to_string(),
            })
    }

    /// Qualify a lead into a deal at the top of the pipeline.
    ///
    /// Cascade: creates the deal at `NewOpp` with probability 10, marks
    /// the lead `Converted` (the record stays), and upserts the contact
    /// golden record from the lead's identity with the new deal id
    /// appended.
    pub fn convert_lead_to_deal(&self, lead_id: &str, value: f64) -> Result<Deal, EngineError> {
        let lead = self
            .store
            .lead(lead_id)
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Lead",
                id: lead_id.to_string(),
            })?;

        let now = Utc::now();
        let deal = Deal {
            id: uuid::Uuid::new_v4().to_string(),
            lead_id: lead.id.clone(),
            name: format!("{} — {}", lead.name, lead.program),
            value,
            stage: DealStage::NewOpp,
            probability: 10,
            owner_id: lead.owner_id.clone(),
            activities: vec![Activity::new(
                ActivityType::System,
                format!("Deal created from lead {}", lead.id),
            )],
            created_at: now,
            updated_at: now,
        };
        self.store.insert_deal(deal.clone())?;

        self.store.update_lead(lead_id, |l| {
            l.status = LeadStatus::Converted;
            l.value = value;
            l.updated_at = Utc::now();
        })?;

        upsert_contact(
            &self.store,
            ContactDraft {
                name: lead.name,
                phone: lead.phone,
                email: lead.email,
                deal_ids: vec![deal.id.clone()],
                activities: Vec::new(),
            },
        )?;

        log::info!("Lead {} converted to deal {}", lead_id, deal.id);
        Ok(deal)
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.store.contacts()
    }

    // =========================================================================
    // Deal pipeline
    // =========================================================================

    pub fn log_deal_activity(
        &self,
        deal_id: &str,
        activity_type: ActivityType,
        content: &str,
    ) -> Result<Deal, EngineError> {
        let activity = Activity::new(activity_type, content);
        self.store
            .update_deal(deal_id, |deal| {
                deal.activities.push(activity);
                deal.updated_at = Utc::now();
            })?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Deal",
                id: deal_id.to_string(),
            })
    }

    pub fn set_deal_value(&self, deal_id: &str, value: f64) -> Result<Deal, EngineError> {
        self.store
            .update_deal(deal_id, |deal| {
                deal.value = value;
                deal.updated_at = Utc::now();
            })?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Deal",
                id: deal_id.to_string(),
            })
    }

    /// Evaluate the current stage's exit gate. Empty list means the deal
    /// may advance.
    pub fn check_advance(&self, deal_id: &str, form: &StageForm) -> Result<Vec<String>, EngineError> {
        let deal = self.require_deal(deal_id)?;
        let installments = self.store.installments_for_deal(deal_id);
        let approval = self.approvals.status(deal_id, ApprovalKind::Discount);
        Ok(stage::gate_check(&deal, form, approval, &installments))
    }

    /// Advance the deal one stage, gate permitting. Refusal carries the
    /// list of unmet conditions.
    pub fn advance_deal(&self, deal_id: &str, form: &StageForm) -> Result<Deal, EngineError> {
        let missing = self.check_advance(deal_id, form)?;
        if !missing.is_empty() {
            return Err(EngineError::GateRefused(missing));
        }

        self.store
            .update_deal(deal_id, |deal| {
                stage::advance(deal);
            })?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Deal",
                id: deal_id.to_string(),
            })
    }

    pub fn mark_deal_lost(&self, deal_id: &str) -> Result<Deal, EngineError> {
        self.store
            .update_deal(deal_id, |deal| {
                stage::mark_lost(deal);
            })?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Deal",
                id: deal_id.to_string(),
            })
    }

    // =========================================================================
    // Approvals
    // =========================================================================

    /// Ask management to sign off a high-risk discount. The deal stays
    /// blocked at the negotiation gate until the request resolves
    /// `Approved`.
    pub fn request_discount_approval(
        &self,
        deal_id: &str,
        note: &str,
    ) -> Result<ApprovalRequest, EngineError> {
        self.require_deal(deal_id)?;
        Ok(self.approvals.request(ApprovalKind::Discount, deal_id, note))
    }

    /// Ask accounting to confirm the deposit installment. Only accepted
    /// with a payment proof attached and a schedule that sums to the
    /// contract value.
    pub fn request_accounting_confirmation(
        &self,
        deal_id: &str,
        form: &StageForm,
    ) -> Result<ApprovalRequest, EngineError> {
        let deal = self.require_deal(deal_id)?;

        if form
            .payment_proof_file
            .as_deref()
            .map_or(true, |s| s.trim().is_empty())
        {
            return Err(EngineError::Validation(
                "Attach a payment proof before requesting confirmation".to_string(),
            ));
        }
        let installments = self.store.installments_for_deal(deal_id);
        if installments.is_empty() || !validate_total(&installments, deal.value) {
            return Err(EngineError::Validation(
                "Installment plan must sum to the contract value".to_string(),
            ));
        }

        Ok(self
            .approvals
            .request(ApprovalKind::AccountingConfirmation, deal_id, ""))
    }

    /// Record the approver's decision and apply its side effects:
    /// a notification activity on the deal, and for an approved
    /// accounting confirmation, the deposit installment flips to paid.
    pub fn resolve_approval(
        &self,
        request_id: &str,
        approved: bool,
    ) -> Result<ApprovalRequest, EngineError> {
        let request = self
            .approvals
            .resolve(request_id, approved)
            .ok_or_else(|| EngineError::ApprovalNotFound(request_id.to_string()))?;

        // Side effects follow the stored decision, which can differ from
        // `approved` if the request was already resolved.
        let was_approved = request.status == ApprovalStatus::Approved;
        match request.kind {
            ApprovalKind::Discount => {
                let outcome = if was_approved { "approved" } else { "rejected" };
                self.log_deal_activity(
                    &request.deal_id,
                    ActivityType::Notification,
                    &format!("Discount request {}", outcome),
                )?;
            }
            ApprovalKind::AccountingConfirmation => {
                if was_approved {
                    let installments = self.store.installments_for_deal(&request.deal_id);
                    if let Some(deposit) = installments.iter().find(|i| i.is_deposit) {
                        self.mark_installment_paid(&deposit.id)?;
                    } else {
                        log::warn!(
                            "Accounting confirmation approved for deal {} with no deposit installment",
                            request.deal_id
                        );
                    }
                    self.log_deal_activity(
                        &request.deal_id,
                        ActivityType::Notification,
                        "Accounting confirmed deposit payment",
                    )?;
                } else {
                    self.log_deal_activity(
                        &request.deal_id,
                        ActivityType::Notification,
                        "Accounting rejected the deposit payment proof",
                    )?;
                }
            }
        }

        Ok(request)
    }

    pub fn approval_status(&self, deal_id: &str, kind: ApprovalKind) -> ApprovalStatus {
        self.approvals.status(deal_id, kind)
    }

    // =========================================================================
    // Quotations
    // =========================================================================

    pub fn create_quotation(&self, draft: QuotationDraft) -> Result<Quotation, EngineError> {
        let now = Utc::now();
        let quotation = Quotation {
            id: uuid::Uuid::new_v4().to_string(),
            deal_id: draft.deal_id,
            lead_id: draft.lead_id,
            customer_name: draft.customer_name,
            amount: draft.amount,
            discount: draft.discount,
            final_amount: draft.amount - draft.discount,
            status: QuotationStatus::Draft,
            payment_method: None,
            payment_proof: None,
            student_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_quotation(quotation.clone())?;
        Ok(quotation)
    }

    /// Run a fallible lifecycle operation against one stored quotation,
    /// persisting the whole collection only on success.
    fn with_quotation<R>(
        &self,
        quotation_id: &str,
        f: impl FnOnce(&mut Quotation) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut quotations = self.store.quotations();
        let quotation = quotations
            .iter_mut()
            .find(|q| q.id == quotation_id)
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Quotation",
                id: quotation_id.to_string(),
            })?;
        let result = f(quotation)?;
        self.store.save_quotations(&quotations)?;
        Ok(result)
    }

    pub fn set_quotation_amount(&self, quotation_id: &str, amount: f64) -> Result<(), EngineError> {
        self.with_quotation(quotation_id, |q| quotation::set_amount(q, amount))
    }

    pub fn set_quotation_discount(
        &self,
        quotation_id: &str,
        discount: f64,
    ) -> Result<(), EngineError> {
        self.with_quotation(quotation_id, |q| quotation::set_discount(q, discount))
    }

    pub fn send_quotation(&self, quotation_id: &str) -> Result<(), EngineError> {
        self.with_quotation(quotation_id, quotation::send)
    }

    pub fn confirm_quotation_sale(
        &self,
        quotation_id: &str,
        payment_method: &str,
        payment_proof: &str,
    ) -> Result<(), EngineError> {
        self.with_quotation(quotation_id, |q| {
            quotation::confirm_sale(q, payment_method, payment_proof)
        })
    }

    /// Lock the quotation and run the student cascade exactly once.
    /// Returns the created student, or `None` when already locked.
    ///
    /// The student row is written before the locked quotation, so a
    /// failed write never leaves a locked quotation pointing at a
    /// student that does not exist.
    pub fn lock_quotation(&self, quotation_id: &str) -> Result<Option<Student>, EngineError> {
        let lead = self
            .store
            .quotation(quotation_id)
            .and_then(|q| q.lead_id)
            .and_then(|lead_id| self.store.lead(&lead_id));
        let student_count = self.store.students().len();

        let mut quotations = self.store.quotations();
        let quotation = quotations
            .iter_mut()
            .find(|q| q.id == quotation_id)
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Quotation",
                id: quotation_id.to_string(),
            })?;
        let student = quotation::lock(quotation, lead.as_ref(), student_count)?;

        if let Some(ref student) = student {
            self.store.insert_student(student.clone())?;
        }
        self.store.save_quotations(&quotations)?;
        Ok(student)
    }

    // =========================================================================
    // Installments
    // =========================================================================

    /// Apply a ratio template against the deal's current value, replacing
    /// any existing schedule for that deal.
    pub fn apply_payment_template(
        &self,
        deal_id: &str,
        template_id: &str,
    ) -> Result<Vec<Installment>, EngineError> {
        let deal = self.require_deal(deal_id)?;
        let schedule = installments::apply_template(
            template_id,
            deal_id,
            deal.value,
            Utc::now().date_naive(),
        )?;
        self.store
            .replace_deal_installments(deal_id, schedule.clone())?;
        log::info!(
            "Applied payment template {} to deal {} ({} installments)",
            template_id,
            deal_id,
            schedule.len()
        );
        Ok(schedule)
    }

    pub fn deal_installments(&self, deal_id: &str) -> Vec<Installment> {
        self.store.installments_for_deal(deal_id)
    }

    pub fn mark_installment_paid(&self, installment_id: &str) -> Result<Installment, EngineError> {
        self.store
            .update_installment(installment_id, |i| {
                i.status = crate::types::InstallmentStatus::Paid;
            })?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Installment",
                id: installment_id.to_string(),
            })
    }

    // =========================================================================
    // Students
    // =========================================================================

    pub fn enroll_student(&self, student_id: &str) -> Result<Student, EngineError> {
        self.store
            .update_student(student_id, |s| {
                s.status = StudentStatus::Enrolled;
            })?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Student",
                id: student_id.to_string(),
            })
    }

    // =========================================================================
    // Contracts / Transactions / Invoices / Meetings
    // =========================================================================

    pub fn create_contract(
        &self,
        deal_id: &str,
        title: &str,
        value: f64,
    ) -> Result<Contract, EngineError> {
        let contract = Contract {
            id: uuid::Uuid::new_v4().to_string(),
            deal_id: deal_id.to_string(),
            title: title.to_string(),
            value,
            status: ContractStatus::Draft,
            signed_date: None,
            created_at: Utc::now(),
        };
        self.store.insert_contract(contract.clone())?;
        Ok(contract)
    }

    pub fn sign_contract(&self, contract_id: &str) -> Result<Contract, EngineError> {
        self.store
            .update_contract(contract_id, |c| {
                c.status = ContractStatus::Signed;
                c.signed_date = Some(Utc::now().date_naive());
            })?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Contract",
                id: contract_id.to_string(),
            })
    }

    pub fn record_transaction(
        &self,
        deal_id: Option<&str>,
        amount: f64,
        description: &str,
    ) -> Result<Transaction, EngineError> {
        let transaction = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            deal_id: deal_id.map(str::to_string),
            amount,
            description: description.to_string(),
            status: TransactionStatus::Completed,
            date: Utc::now(),
        };
        self.store.insert_transaction(transaction.clone())?;
        Ok(transaction)
    }

    pub fn set_transaction_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> Result<Transaction, EngineError> {
        self.store
            .update_transaction(transaction_id, |t| t.status = status)?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Transaction",
                id: transaction_id.to_string(),
            })
    }

    pub fn create_invoice(
        &self,
        deal_id: Option<&str>,
        student_id: Option<&str>,
        amount: f64,
    ) -> Result<Invoice, EngineError> {
        let invoice = Invoice {
            id: uuid::Uuid::new_v4().to_string(),
            deal_id: deal_id.map(str::to_string),
            student_id: student_id.map(str::to_string),
            amount,
            status: InvoiceStatus::Draft,
            created_at: Utc::now(),
        };
        self.store.insert_invoice(invoice.clone())?;
        Ok(invoice)
    }

    pub fn set_invoice_status(
        &self,
        invoice_id: &str,
        status: InvoiceStatus,
    ) -> Result<Invoice, EngineError> {
        self.store
            .update_invoice(invoice_id, |i| i.status = status)?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Invoice",
                id: invoice_id.to_string(),
            })
    }

    pub fn schedule_meeting(
        &self,
        lead_id: Option<&str>,
        title: &str,
        start_time: chrono::DateTime<Utc>,
    ) -> Result<Meeting, EngineError> {
        let meeting = Meeting {
            id: uuid::Uuid::new_v4().to_string(),
            lead_id: lead_id.map(str::to_string),
            title: title.to_string(),
            start_time,
            status: MeetingStatus::Scheduled,
            notes: String::new(),
        };
        self.store.insert_meeting(meeting.clone())?;
        Ok(meeting)
    }

    pub fn set_meeting_status(
        &self,
        meeting_id: &str,
        status: MeetingStatus,
    ) -> Result<Meeting, EngineError> {
        self.store
            .update_meeting(meeting_id, |m| m.status = status)?
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Meeting",
                id: meeting_id.to_string(),
            })
    }

    fn require_deal(&self, deal_id: &str) -> Result<Deal, EngineError> {
        self.store
            .deal(deal_id)
            .ok_or_else(|| EngineError::MissingReference {
                entity: "Deal",
                id: deal_id.to_string(),
            })
    }
}
