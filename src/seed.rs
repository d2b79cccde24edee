//! One-time demo dataset, applied behind the store's `INIT` marker.
//!
//! Deterministic ids so a fresh store always looks the same in the UI
//! and in tests. Never runs twice: the engine checks the marker first.

use chrono::{TimeZone, Utc};

use crate::store::{EntityStore, StoreError};
use crate::types::{
    Activity, ActivityType, Deal, DealStage, Lead, LeadSource, LeadStatus, Meeting, MeetingStatus,
    StudentInfo,
};

/// Write the demo dataset and set the `INIT` marker.
pub fn apply(store: &EntityStore) -> Result<(), StoreError> {
    let t0 = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();

    let leads = vec![
        Lead {
            id: "seed-lead-1".to_string(),
            name: "Trần Thị Bình".to_string(),
            phone: "0987654321".to_string(),
            email: "binh.tran@example.com".to_string(),
            source: LeadSource::Facebook,
            program: "Du học Đức".to_string(),
            status: LeadStatus::Contacted,
            owner_id: Some("rep-01".to_string()),
            student_info: StudentInfo {
                target_country: Some("Germany".to_string()),
                financial_status: Some("sponsored".to_string()),
                language_level: Some("A2".to_string()),
            },
            activities: vec![Activity::new(ActivityType::Call, "Initial outreach call")],
            value: 0.0,
            probability: 0,
            discount: 0.0,
            created_at: t0,
            updated_at: t0,
        },
        Lead {
            id: "seed-lead-2".to_string(),
            name: "Lê Văn Cường".to_string(),
            phone: "0905111222".to_string(),
            email: "cuong.le@example.com".to_string(),
            source: LeadSource::Website,
            program: "Du học Nhật".to_string(),
            status: LeadStatus::New,
            owner_id: Some("rep-02".to_string()),
            student_info: StudentInfo::default(),
            activities: Vec::new(),
            value: 0.0,
            probability: 0,
            discount: 0.0,
            created_at: t0,
            updated_at: t0,
        },
    ];
    store.save_leads(&leads)?;

    store.save_deals(&[Deal {
        id: "seed-deal-1".to_string(),
        lead_id: "seed-lead-1".to_string(),
        name: "Trần Thị Bình — Du học Đức".to_string(),
        value: 180_000_000.0,
        stage: DealStage::DeepConsulting,
        probability: 20,
        owner_id: Some("rep-01".to_string()),
        activities: vec![Activity::new(
            ActivityType::System,
            "Deal created from lead seed-lead-1",
        )],
        created_at: t0,
        updated_at: t0,
    }])?;

    store.save_meetings(&[Meeting {
        id: "seed-meeting-1".to_string(),
        lead_id: Some("seed-lead-1".to_string()),
        title: "Consultation: study path in Germany".to_string(),
        start_time: Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap(),
        status: MeetingStatus::Scheduled,
        notes: String::new(),
    }])?;

    store.mark_seeded()?;
    log::info!("Demo dataset seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_is_gated_by_marker() {
        let store = EntityStore::in_memory();
        assert!(!store.is_seeded());
        apply(&store).unwrap();
        assert!(store.is_seeded());
        assert_eq!(store.leads().len(), 2);
        assert_eq!(store.deals().len(), 1);
        assert_eq!(store.meetings().len(), 1);
    }
}
