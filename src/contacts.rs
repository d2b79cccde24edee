//! Contact dedup: one golden record per normalized phone number.
//!
//! Inserting a contact whose phone normalizes to an existing contact's
//! phone merges into that record instead of creating a duplicate. Merge
//! is shallow overwrite for scalar fields plus append-union (plain
//! concatenation, no dedup) for `deal_ids` and `activities` — those are
//! append-only logs, not sets.

use chrono::Utc;

use crate::store::{EntityStore, StoreError};
use crate::types::{Activity, Contact};

/// Minimum digit count for a phone to participate in merge matching.
/// Shorter strings are placeholders and must not collapse records.
const MIN_MERGE_PHONE_DIGITS: usize = 7;

/// Incoming contact data; id and timestamps are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct ContactDraft {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub deal_ids: Vec<String>,
    pub activities: Vec<Activity>,
}

/// Strip all non-digit characters.
///
/// "+84 (0) 912-345-678" and "0912345678" compare equal after
/// normalization of the national part.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Insert or merge a contact by normalized phone.
///
/// Returns the resulting record. A merge overwrites `name`/`email` with
/// the incoming non-empty values and concatenates `deal_ids` and
/// `activities`. A phone normalizing to fewer than
/// [`MIN_MERGE_PHONE_DIGITS`] digits always creates a fresh record.
pub fn upsert_contact(store: &EntityStore, draft: ContactDraft) -> Result<Contact, StoreError> {
    let normalized = normalize_phone(&draft.phone);
    let mut contacts = store.contacts();

    if normalized.len() >= MIN_MERGE_PHONE_DIGITS {
        if let Some(existing) = contacts
            .iter_mut()
            .find(|c| normalize_phone(&c.phone) == normalized)
        {
            if !draft.name.is_empty() {
                existing.name = draft.name;
            }
            if !draft.email.is_empty() {
                existing.email = draft.email;
            }
            existing.phone = draft.phone;
            existing.deal_ids.extend(draft.deal_ids);
            existing.activities.extend(draft.activities);
            existing.updated_at = Utc::now();

            let merged = existing.clone();
            store.save_contacts(&contacts)?;
            log::debug!("Merged contact {} by phone {}", merged.id, normalized);
            return Ok(merged);
        }
    }

    let now = Utc::now();
    let contact = Contact {
        id: uuid::Uuid::new_v4().to_string(),
        name: draft.name,
        phone: draft.phone,
        email: draft.email,
        deal_ids: draft.deal_ids,
        activities: draft.activities,
        created_at: now,
        updated_at: now,
    };
    contacts.push(contact.clone());
    store.save_contacts(&contacts)?;
    Ok(contact)
}
