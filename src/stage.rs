//! Deal pipeline state machine: the ordered stage walk, the per-stage
//! gate predicates, and the side effects applied on advancement.
//!
//! `gate_check` returns every unmet condition (not just the first) so a
//! caller can show the full checklist. `advance` applies the transition
//! to an in-memory deal; persistence is the engine's job.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::approvals::ApprovalStatus;
use crate::installments::validate_total;
use crate::types::{Activity, ActivityType, Deal, DealStage, Installment, InstallmentStatus};

/// The linear pipeline. `Lost` is out-of-band and never part of the walk.
pub const STAGE_ORDER: [DealStage; 8] = [
    DealStage::NewOpp,
    DealStage::DeepConsulting,
    DealStage::Proposal,
    DealStage::Negotiation,
    DealStage::Contract,
    DealStage::DocumentCollection,
    DealStage::Won,
    DealStage::AfterSale,
];

/// Discounts above this share of the base price need management approval.
pub const HIGH_RISK_DISCOUNT_RATIO: f64 = 0.10;

/// Position of a stage in the ordered walk. `None` for `Lost`.
pub fn stage_position(stage: DealStage) -> Option<usize> {
    STAGE_ORDER.iter().position(|s| *s == stage)
}

/// The stage after `stage` in the walk, if any. `AfterSale` is the end
/// of the line; `Lost` has no successor.
pub fn next_stage(stage: DealStage) -> Option<DealStage> {
    let index = stage_position(stage)?;
    STAGE_ORDER.get(index + 1).copied()
}

/// Fields the sales rep fills in while working a deal. Kept separate
/// from the persisted `Deal` because they arrive from the working form,
/// not the stored record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageForm {
    /// Consulting: what the customer wants to study.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_major: Option<String>,
    /// Consulting: customer's budget in currency units.
    #[serde(default)]
    pub budget: f64,
    /// Proposal: selected product/program package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Proposal: attached quote file reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_file: Option<String>,
    /// Negotiation: pre-discount base price.
    #[serde(default)]
    pub base_price: f64,
    /// Negotiation: line-level discount.
    #[serde(default)]
    pub discount: f64,
    /// Negotiation: extra discount granted in negotiation.
    #[serde(default)]
    pub negotiation_discount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_start_date: Option<String>,
    /// Contract: signed contract file reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_contract_file: Option<String>,
    /// Contract: payment proof attached when requesting accounting
    /// confirmation of the deposit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_proof_file: Option<String>,
}

impl StageForm {
    pub fn total_discount(&self) -> f64 {
        self.discount + self.negotiation_discount
    }

    /// True if the combined discount exceeds the high-risk share of the
    /// base price.
    pub fn is_high_risk_discount(&self) -> bool {
        self.total_discount() > HIGH_RISK_DISCOUNT_RATIO * self.base_price
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

/// Evaluate the exit gate for the deal's current stage. Returns the
/// list of unmet conditions; empty means the deal may advance.
///
/// Stages without a defined gate (document collection, won) advance
/// unconditionally — there is no business rule on file for them.
pub fn gate_check(
    deal: &Deal,
    form: &StageForm,
    approval: ApprovalStatus,
    installments: &[Installment],
) -> Vec<String> {
    let mut missing = Vec::new();

    match deal.stage {
        DealStage::NewOpp => {}

        DealStage::DeepConsulting => {
            if !deal.has_activity(ActivityType::Call) {
                missing.push("Log at least one call activity".to_string());
            }
            if is_blank(&form.target_major) {
                missing.push("Enter the customer's target major/program".to_string());
            }
            if form.budget <= 0.0 {
                missing.push("Enter a budget greater than zero".to_string());
            }
        }

        DealStage::Proposal => {
            if is_blank(&form.product) {
                missing.push("Select a product".to_string());
            }
            if is_blank(&form.quote_file) {
                missing.push("Attach a quote file".to_string());
            }
        }

        DealStage::Negotiation => {
            if form.total_discount() != 0.0 && is_blank(&form.discount_reason) {
                missing.push("Give a reason for the discount".to_string());
            }
            if form.is_high_risk_discount() && approval != ApprovalStatus::Approved {
                missing.push(format!(
                    "Discount exceeds {:.0}% of base price: management approval required",
                    HIGH_RISK_DISCOUNT_RATIO * 100.0
                ));
            }
            if is_blank(&form.expected_start_date) {
                missing.push("Set an expected start date".to_string());
            }
        }

        DealStage::Contract => {
            if is_blank(&form.signed_contract_file) {
                missing.push("Attach the signed contract file".to_string());
            }
            if installments.is_empty() {
                missing.push("Apply a payment plan".to_string());
            } else {
                if !validate_total(installments, deal.value) {
                    missing.push("Installment amounts must sum to the contract value".to_string());
                }
                if installments[0].status != InstallmentStatus::Paid {
                    missing.push("Deposit installment must be confirmed paid".to_string());
                }
            }
        }

        // No defined exit criteria for these stages.
        DealStage::DocumentCollection | DealStage::Won | DealStage::AfterSale => {}

        // Terminal; advance() refuses anyway.
        DealStage::Lost => {}
    }

    missing
}

/// Convenience wrapper over [`gate_check`].
pub fn can_advance(
    deal: &Deal,
    form: &StageForm,
    approval: ApprovalStatus,
    installments: &[Installment],
) -> bool {
    gate_check(deal, form, approval, installments).is_empty()
}

/// Probability auto-set on entering certain stages.
fn probability_on_entry(stage: DealStage) -> Option<u8> {
    match stage {
        DealStage::Negotiation => Some(50),
        DealStage::Contract => Some(80),
        DealStage::DocumentCollection => Some(95),
        _ => None,
    }
}

/// Move the deal one stage forward, appending a system activity and
/// applying the probability side effect. No-op returning `false` if the
/// deal is already at the last stage (or lost).
///
/// Does NOT evaluate the gate: callers go through the engine, which
/// checks the gate first.
pub fn advance(deal: &mut Deal) -> bool {
    let Some(next) = next_stage(deal.stage) else {
        log::debug!("Deal {} at terminal stage {:?}; advance is a no-op", deal.id, deal.stage);
        return false;
    };

    let from = deal.stage;
    deal.activities.push(Activity::new(
        ActivityType::System,
        format!("Stage changed: {} → {}", from.as_str(), next.as_str()),
    ));
    if let Some(probability) = probability_on_entry(next) {
        deal.probability = probability;
    }
    deal.stage = next;
    deal.updated_at = Utc::now();

    log::info!("Deal {} advanced {} → {}", deal.id, from.as_str(), next.as_str());
    true
}

/// Move the deal to `Lost`, out of band. No-op if already lost.
pub fn mark_lost(deal: &mut Deal) -> bool {
    if deal.stage == DealStage::Lost {
        return false;
    }
    let from = deal.stage;
    deal.activities.push(Activity::new(
        ActivityType::System,
        format!("Deal marked lost (was {})", from.as_str()),
    ));
    deal.stage = DealStage::Lost;
    deal.updated_at = Utc::now();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_deal(stage: DealStage) -> Deal {
        Deal {
            id: "d1".into(),
            lead_id: "l1".into(),
            name: "Test deal".into(),
            value: 100_000_000.0,
            stage,
            probability: 10,
            owner_id: None,
            activities: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn paid_schedule(deal_value: f64) -> Vec<Installment> {
        let mut schedule = crate::installments::apply_template(
            "50/50",
            "d1",
            deal_value,
            chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
        .unwrap();
        schedule[0].status = InstallmentStatus::Paid;
        schedule
    }

    #[test]
    fn new_opp_always_advances() {
        let deal = make_deal(DealStage::NewOpp);
        assert!(can_advance(
            &deal,
            &StageForm::default(),
            ApprovalStatus::NotRequested,
            &[]
        ));
    }

    #[test]
    fn deep_consulting_needs_call_major_budget() {
        let mut deal = make_deal(DealStage::DeepConsulting);
        let mut form = StageForm::default();

        let missing = gate_check(&deal, &form, ApprovalStatus::NotRequested, &[]);
        assert_eq!(missing.len(), 3);

        deal.activities
            .push(Activity::new(ActivityType::Call, "intro call"));
        form.target_major = Some("Du học Đức".to_string());
        form.budget = 50_000_000.0;
        assert!(can_advance(&deal, &form, ApprovalStatus::NotRequested, &[]));
    }

    #[test]
    fn proposal_needs_product_and_quote_file() {
        let deal = make_deal(DealStage::Proposal);
        let mut form = StageForm {
            product: Some("B1 German package".to_string()),
            ..Default::default()
        };
        assert!(!can_advance(&deal, &form, ApprovalStatus::NotRequested, &[]));
        form.quote_file = Some("quote-001.pdf".to_string());
        assert!(can_advance(&deal, &form, ApprovalStatus::NotRequested, &[]));
    }

    #[test]
    fn negotiation_discount_rules() {
        let deal = make_deal(DealStage::Negotiation);
        let mut form = StageForm {
            base_price: 100_000_000.0,
            expected_start_date: Some("2024-09-01".to_string()),
            ..Default::default()
        };

        // No discount: fine
        assert!(can_advance(&deal, &form, ApprovalStatus::NotRequested, &[]));

        // Any discount needs a reason
        form.discount = 5_000_000.0;
        assert!(!can_advance(&deal, &form, ApprovalStatus::NotRequested, &[]));
        form.discount_reason = Some("returning customer".to_string());
        assert!(can_advance(&deal, &form, ApprovalStatus::NotRequested, &[]));

        // Over 10% of base price: approval required, pending is not enough
        form.negotiation_discount = 6_000_000.0;
        assert!(form.is_high_risk_discount());
        assert!(!can_advance(&deal, &form, ApprovalStatus::NotRequested, &[]));
        assert!(!can_advance(&deal, &form, ApprovalStatus::Pending, &[]));
        assert!(!can_advance(&deal, &form, ApprovalStatus::Rejected, &[]));
        assert!(can_advance(&deal, &form, ApprovalStatus::Approved, &[]));
    }

    #[test]
    fn negotiation_needs_start_date() {
        let deal = make_deal(DealStage::Negotiation);
        let form = StageForm {
            base_price: 100_000_000.0,
            ..Default::default()
        };
        let missing = gate_check(&deal, &form, ApprovalStatus::NotRequested, &[]);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].contains("start date"));
    }

    #[test]
    fn contract_gate_denied_until_deposit_paid() {
        let deal = make_deal(DealStage::Contract);
        let form = StageForm {
            signed_contract_file: Some("contract-signed.pdf".to_string()),
            ..Default::default()
        };

        // No installments at all
        assert!(!can_advance(&deal, &form, ApprovalStatus::NotRequested, &[]));

        // Valid schedule but deposit unpaid: denied regardless of the rest
        let mut schedule = paid_schedule(deal.value);
        schedule[0].status = InstallmentStatus::Pending;
        assert!(!can_advance(&deal, &form, ApprovalStatus::Approved, &schedule));

        // Deposit paid: allowed
        schedule[0].status = InstallmentStatus::Paid;
        assert!(can_advance(&deal, &form, ApprovalStatus::NotRequested, &schedule));
    }

    #[test]
    fn contract_gate_checks_total() {
        let deal = make_deal(DealStage::Contract);
        let form = StageForm {
            signed_contract_file: Some("contract-signed.pdf".to_string()),
            ..Default::default()
        };
        // Schedule built for a different total
        let schedule = paid_schedule(50_000_000.0);
        let missing = gate_check(&deal, &form, ApprovalStatus::NotRequested, &schedule);
        assert!(missing.iter().any(|m| m.contains("sum")));
    }

    #[test]
    fn advance_walks_forward_only() {
        let mut deal = make_deal(DealStage::NewOpp);
        let mut last_position = stage_position(deal.stage).unwrap();

        while advance(&mut deal) {
            let position = stage_position(deal.stage).unwrap();
            assert!(position > last_position, "stage position must increase");
            last_position = position;
        }
        assert_eq!(deal.stage, DealStage::AfterSale);

        // Terminal: further advance is a no-op
        assert!(!advance(&mut deal));
        assert_eq!(deal.stage, DealStage::AfterSale);
    }

    #[test]
    fn advance_sets_probability_at_fixed_transitions() {
        let mut deal = make_deal(DealStage::Proposal);
        advance(&mut deal);
        assert_eq!(deal.stage, DealStage::Negotiation);
        assert_eq!(deal.probability, 50);

        advance(&mut deal);
        assert_eq!(deal.stage, DealStage::Contract);
        assert_eq!(deal.probability, 80);

        advance(&mut deal);
        assert_eq!(deal.stage, DealStage::DocumentCollection);
        assert_eq!(deal.probability, 95);
    }

    #[test]
    fn advance_appends_system_activity() {
        let mut deal = make_deal(DealStage::NewOpp);
        advance(&mut deal);
        let last = deal.activities.last().unwrap();
        assert_eq!(last.activity_type, ActivityType::System);
        assert!(last.content.contains("New Opportunity"));
        assert!(last.content.contains("Deep Consulting"));
    }

    #[test]
    fn lost_is_out_of_band_and_terminal() {
        let mut deal = make_deal(DealStage::Negotiation);
        assert!(mark_lost(&mut deal));
        assert_eq!(deal.stage, DealStage::Lost);
        assert!(!mark_lost(&mut deal));
        assert!(!advance(&mut deal));
        assert_eq!(deal.stage, DealStage::Lost);
    }
}
