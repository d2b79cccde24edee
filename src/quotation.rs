//! Quotation lifecycle: Draft → Sent → SaleOrder → Locked, strictly
//! forward. Locking is the one-way cascade that creates the Student;
//! it is idempotent, so calling it on a locked quotation is a no-op and
//! never mints a second student.

use chrono::Utc;

use crate::error::EngineError;
use crate::types::{Lead, Quotation, QuotationStatus, Student, StudentStatus};

/// Prefix for generated student codes, e.g. `HV24-0007`.
const STUDENT_CODE_PREFIX: &str = "HV24";

fn ensure_editable(quotation: &Quotation) -> Result<(), EngineError> {
    if quotation.status == QuotationStatus::Locked {
        return Err(EngineError::QuotationLocked);
    }
    Ok(())
}

/// Set the gross amount and recompute `final_amount`. Refused once locked.
pub fn set_amount(quotation: &mut Quotation, amount: f64) -> Result<(), EngineError> {
    ensure_editable(quotation)?;
    quotation.amount = amount;
    quotation.final_amount = quotation.amount - quotation.discount;
    quotation.updated_at = Utc::now();
    Ok(())
}

/// Set the discount and recompute `final_amount`. Refused once locked.
pub fn set_discount(quotation: &mut Quotation, discount: f64) -> Result<(), EngineError> {
    ensure_editable(quotation)?;
    quotation.discount = discount;
    quotation.final_amount = quotation.amount - quotation.discount;
    quotation.updated_at = Utc::now();
    Ok(())
}

/// Mark the quotation sent. Valid from Draft; idempotent from Sent.
pub fn send(quotation: &mut Quotation) -> Result<(), EngineError> {
    match quotation.status {
        QuotationStatus::Draft | QuotationStatus::Sent => {
            quotation.status = QuotationStatus::Sent;
            quotation.updated_at = Utc::now();
            Ok(())
        }
        actual => Err(EngineError::InvalidQuotationState {
            required: QuotationStatus::Draft,
            actual,
        }),
    }
}

/// Confirm the sale: requires a non-empty payment proof (a transaction
/// reference or uploaded file name). Valid from Draft or Sent.
pub fn confirm_sale(
    quotation: &mut Quotation,
    payment_method: &str,
    payment_proof: &str,
) -> Result<(), EngineError> {
    match quotation.status {
        QuotationStatus::Draft | QuotationStatus::Sent => {}
        actual => {
            return Err(EngineError::InvalidQuotationState {
                required: QuotationStatus::Sent,
                actual,
            })
        }
    }
    if payment_proof.trim().is_empty() {
        return Err(EngineError::Validation(
            "Payment proof is required to confirm a sale".to_string(),
        ));
    }

    quotation.status = QuotationStatus::SaleOrder;
    quotation.payment_method = Some(payment_method.to_string());
    quotation.payment_proof = Some(payment_proof.to_string());
    quotation.updated_at = Utc::now();
    Ok(())
}

/// Sequential student code derived from how many students exist.
pub fn student_code(existing_count: usize) -> String {
    format!("{}-{:04}", STUDENT_CODE_PREFIX, existing_count + 1)
}

/// Lock the quotation and build the Student record for the cascade.
///
/// Valid from SaleOrder. Customer identity comes from the linked lead
/// when it resolves, falling back to the quotation's own customer name.
/// Returns `Ok(None)` when the quotation is already locked: the cascade
/// runs exactly once.
pub fn lock(
    quotation: &mut Quotation,
    lead: Option<&Lead>,
    existing_student_count: usize,
) -> Result<Option<Student>, EngineError> {
    match quotation.status {
        QuotationStatus::Locked => {
            log::debug!("Quotation {} already locked; lock is a no-op", quotation.id);
            return Ok(None);
        }
        QuotationStatus::SaleOrder => {}
        actual => {
            return Err(EngineError::InvalidQuotationState {
                required: QuotationStatus::SaleOrder,
                actual,
            })
        }
    }

    let (name, phone, email) = match lead {
        Some(lead) => (lead.name.clone(), lead.phone.clone(), lead.email.clone()),
        None => (quotation.customer_name.clone(), String::new(), String::new()),
    };

    let student = Student {
        id: uuid::Uuid::new_v4().to_string(),
        code: student_code(existing_student_count),
        name,
        phone,
        email,
        deal_id: quotation.deal_id.clone(),
        so_id: Some(quotation.id.clone()),
        status: StudentStatus::Admission,
        created_at: Utc::now(),
    };

    quotation.status = QuotationStatus::Locked;
    quotation.student_id = Some(student.id.clone());
    quotation.updated_at = Utc::now();

    log::info!(
        "Quotation {} locked; created student {} ({})",
        quotation.id,
        student.code,
        student.id
    );
    Ok(Some(student))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LeadSource, LeadStatus, StudentInfo};

    fn make_quotation(status: QuotationStatus) -> Quotation {
        Quotation {
            id: "q1".into(),
            deal_id: Some("d1".into()),
            lead_id: Some("l1".into()),
            customer_name: "Nguyen A".into(),
            amount: 100_000_000.0,
            discount: 0.0,
            final_amount: 100_000_000.0,
            status,
            payment_method: None,
            payment_proof: None,
            student_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn make_lead() -> Lead {
        Lead {
            id: "l1".into(),
            name: "Nguyễn A".into(),
            phone: "0912345678".into(),
            email: "a@example.com".into(),
            source: LeadSource::Facebook,
            program: "Du học Đức".into(),
            status: LeadStatus::Converted,
            owner_id: None,
            student_info: StudentInfo::default(),
            activities: Vec::new(),
            value: 0.0,
            probability: 0,
            discount: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn final_amount_tracks_every_edit() {
        let mut q = make_quotation(QuotationStatus::Draft);
        set_amount(&mut q, 120_000_000.0).unwrap();
        assert_eq!(q.final_amount, 120_000_000.0);
        set_discount(&mut q, 5_000_000.0).unwrap();
        assert_eq!(q.final_amount, 115_000_000.0);
        set_amount(&mut q, 90_000_000.0).unwrap();
        assert_eq!(q.final_amount, 85_000_000.0);
        set_discount(&mut q, 0.0).unwrap();
        assert_eq!(q.final_amount, 90_000_000.0);
    }

    #[test]
    fn send_is_idempotent_from_sent() {
        let mut q = make_quotation(QuotationStatus::Draft);
        send(&mut q).unwrap();
        assert_eq!(q.status, QuotationStatus::Sent);
        send(&mut q).unwrap();
        assert_eq!(q.status, QuotationStatus::Sent);

        let mut locked = make_quotation(QuotationStatus::Locked);
        assert!(send(&mut locked).is_err());
    }

    #[test]
    fn confirm_sale_requires_proof() {
        let mut q = make_quotation(QuotationStatus::Sent);
        let err = confirm_sale(&mut q, "bank_transfer", "  ").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(q.status, QuotationStatus::Sent);

        confirm_sale(&mut q, "bank_transfer", "TXN-889900").unwrap();
        assert_eq!(q.status, QuotationStatus::SaleOrder);
        assert_eq!(q.payment_proof.as_deref(), Some("TXN-889900"));
    }

    #[test]
    fn lock_creates_student_from_lead_identity() {
        let mut q = make_quotation(QuotationStatus::SaleOrder);
        let lead = make_lead();

        let student = lock(&mut q, Some(&lead), 6).unwrap().unwrap();
        assert_eq!(student.code, "HV24-0007");
        assert_eq!(student.name, "Nguyễn A");
        assert_eq!(student.phone, "0912345678");
        assert_eq!(student.so_id.as_deref(), Some("q1"));
        assert_eq!(student.status, StudentStatus::Admission);
        assert_eq!(q.status, QuotationStatus::Locked);
        assert_eq!(q.student_id.as_deref(), Some(student.id.as_str()));
    }

    #[test]
    fn lock_twice_is_a_noop() {
        let mut q = make_quotation(QuotationStatus::SaleOrder);
        let first = lock(&mut q, None, 0).unwrap();
        assert!(first.is_some());
        let student_id = q.student_id.clone();

        let second = lock(&mut q, None, 1).unwrap();
        assert!(second.is_none());
        assert_eq!(q.student_id, student_id);
    }

    #[test]
    fn lock_from_draft_is_refused() {
        let mut q = make_quotation(QuotationStatus::Draft);
        let err = lock(&mut q, None, 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuotationState { .. }));
    }

    #[test]
    fn locked_quotation_rejects_edits() {
        let mut q = make_quotation(QuotationStatus::SaleOrder);
        lock(&mut q, None, 0).unwrap();
        assert!(matches!(
            set_amount(&mut q, 1.0),
            Err(EngineError::QuotationLocked)
        ));
        assert!(matches!(
            set_discount(&mut q, 1.0),
            Err(EngineError::QuotationLocked)
        ));
    }
}
