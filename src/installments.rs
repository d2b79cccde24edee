//! Installment planner: ratio templates, schedule generation, and the
//! sum-matches-total gate reused by the contract-stage predicate.

use chrono::{Duration, NaiveDate};

use crate::error::EngineError;
use crate::types::{Installment, InstallmentStatus};

/// Absolute tolerance (currency units) between the installment sum and
/// the contract total. Covers per-step rounding of whole-unit amounts.
pub const TOTAL_TOLERANCE: f64 = 1000.0;

/// Days between consecutive installment due dates.
const STEP_DAYS: i64 = 30;

/// A named split of the contract value.
#[derive(Debug, Clone, Copy)]
pub struct PaymentTemplate {
    pub id: &'static str,
    pub label: &'static str,
    pub ratios: &'static [f64],
}

/// Available ratio templates. Selecting one replaces the deal's whole
/// schedule; there is no partial edit of a template.
pub const TEMPLATES: &[PaymentTemplate] = &[
    PaymentTemplate {
        id: "50/50",
        label: "Đặt cọc 50% - Thanh toán 50%",
        ratios: &[0.5, 0.5],
    },
    PaymentTemplate {
        id: "30/30/40",
        label: "3 đợt 30% - 30% - 40%",
        ratios: &[0.3, 0.3, 0.4],
    },
    PaymentTemplate {
        id: "10/90",
        label: "Đặt cọc 10% - Thanh toán 90%",
        ratios: &[0.1, 0.9],
    },
    PaymentTemplate {
        id: "100",
        label: "Thanh toán toàn bộ",
        ratios: &[1.0],
    },
];

pub fn find_template(id: &str) -> Option<&'static PaymentTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

/// Generate a schedule from a template: one installment per ratio step,
/// `amount = round(total * ratio)`, due every [`STEP_DAYS`] days starting
/// at `start`. Step 0 is the deposit ("Đợt 1 (Đặt cọc)"), later steps
/// are "Đợt N". All installments start `Pending`.
pub fn apply_template(
    template_id: &str,
    deal_id: &str,
    total_value: f64,
    start: NaiveDate,
) -> Result<Vec<Installment>, EngineError> {
    let template = find_template(template_id)
        .ok_or_else(|| EngineError::UnknownTemplate(template_id.to_string()))?;

    let schedule = template
        .ratios
        .iter()
        .enumerate()
        .map(|(index, ratio)| {
            let name = if index == 0 {
                "Đợt 1 (Đặt cọc)".to_string()
            } else {
                format!("Đợt {}", index + 1)
            };
            Installment {
                id: uuid::Uuid::new_v4().to_string(),
                deal_id: deal_id.to_string(),
                name,
                amount: (total_value * ratio).round(),
                due_date: start + Duration::days(STEP_DAYS * index as i64),
                note: String::new(),
                is_deposit: index == 0,
                status: InstallmentStatus::Pending,
            }
        })
        .collect();

    Ok(schedule)
}

/// True iff the schedule sums to the target total within
/// [`TOTAL_TOLERANCE`]. This is the single gating check the contract
/// stage reuses.
pub fn validate_total(installments: &[Installment], target_total: f64) -> bool {
    let sum: f64 = installments.iter().map(|i| i.amount).sum();
    (sum - target_total).abs() < TOTAL_TOLERANCE
}

/// Flip exactly one installment to `Paid`. Returns false if the id is
/// not in the slice. There is deliberately no bulk variant.
pub fn mark_paid(installments: &mut [Installment], installment_id: &str) -> bool {
    match installments.iter_mut().find(|i| i.id == installment_id) {
        Some(installment) => {
            installment.status = InstallmentStatus::Paid;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn fifty_fifty_on_even_total() {
        let schedule = apply_template("50/50", "d1", 100_000_000.0, start()).unwrap();
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule[0].amount, 50_000_000.0);
        assert_eq!(schedule[1].amount, 50_000_000.0);
        assert_eq!(schedule[0].name, "Đợt 1 (Đặt cọc)");
        assert!(schedule[0].is_deposit);
        assert_eq!(schedule[1].name, "Đợt 2");
        assert!(!schedule[1].is_deposit);
        assert_eq!(schedule[0].due_date, start());
        assert_eq!(schedule[1].due_date, start() + Duration::days(30));
        assert!(schedule
            .iter()
            .all(|i| i.status == InstallmentStatus::Pending));
    }

    #[test]
    fn every_template_satisfies_its_own_total_gate() {
        // Construction must pass validate_total for awkward totals too.
        for template in TEMPLATES {
            for total in [100_000_000.0, 99_999_999.0, 33_333_335.0, 1_234_567.0] {
                let schedule = apply_template(template.id, "d1", total, start()).unwrap();
                assert!(
                    validate_total(&schedule, total),
                    "template {} failed on total {}",
                    template.id,
                    total
                );
            }
        }
    }

    #[test]
    fn unknown_template_is_refused() {
        let err = apply_template("60/40", "d1", 1000.0, start()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTemplate(_)));
    }

    #[test]
    fn validate_total_tolerance_boundary() {
        let schedule = apply_template("50/50", "d1", 10_000.0, start()).unwrap();
        assert!(validate_total(&schedule, 10_000.0));
        assert!(validate_total(&schedule, 10_999.0));
        assert!(!validate_total(&schedule, 11_000.0));
    }

    #[test]
    fn mark_paid_touches_exactly_one() {
        let mut schedule = apply_template("30/30/40", "d1", 90_000.0, start()).unwrap();
        let first_id = schedule[0].id.clone();
        assert!(mark_paid(&mut schedule, &first_id));
        assert_eq!(schedule[0].status, InstallmentStatus::Paid);
        assert!(schedule[1..]
            .iter()
            .all(|i| i.status == InstallmentStatus::Pending));
        assert!(!mark_paid(&mut schedule, "missing-id"));
    }
}
