//! Entity types and status enums for the CRM workflow engine.
//!
//! Every persisted struct serializes to camelCase JSON so the stored
//! collections stay readable by external tooling. Status domains are
//! real enums; call sites never compare raw strings.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Marketing channel a lead came in from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Facebook,
    Zalo,
    Website,
    Referral,
    Hotline,
    Other,
}

impl Default for LeadSource {
    fn default() -> Self {
        LeadSource::Other
    }
}

/// Lead status within the intake funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

impl LeadStatus {
    /// String label for logs and text interop.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
        }
    }
}

/// What kind of interaction an activity entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Call,
    Email,
    Meeting,
    Note,
    /// Generated by the engine itself (stage changes, cascades).
    System,
    /// Approval / accounting outcomes pushed back to the record.
    Notification,
}

/// One entry in an append-only activity log.
///
/// Logs are append-only, not sets: callers that log the same event twice
/// get two entries. Contact merges concatenate logs for the same reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub activity_type: ActivityType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(activity_type: ActivityType, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            activity_type,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Study-abroad profile nested under a lead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_level: Option<String>,
}

/// A prospective customer captured from a marketing source.
///
/// Never deleted: conversion flips `status` to `Converted` and leaves the
/// record in place. Deal economics (`value`, `probability`, `discount`)
/// stay zero until a deal exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub source: LeadSource,
    pub program: String,
    pub status: LeadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub student_info: StudentInfo,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub probability: u8,
    #[serde(default)]
    pub discount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The deduplicated golden record for a person, keyed by normalized phone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default)]
    pub deal_ids: Vec<String>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pipeline stage of a deal. `Lost` sits outside the linear walk and is
/// only reachable through an explicit mark-lost operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealStage {
    NewOpp,
    DeepConsulting,
    Proposal,
    Negotiation,
    Contract,
    DocumentCollection,
    Won,
    AfterSale,
    Lost,
}

impl DealStage {
    /// Display label used in activity log entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStage::NewOpp => "New Opportunity",
            DealStage::DeepConsulting => "Deep Consulting",
            DealStage::Proposal => "Proposal",
            DealStage::Negotiation => "Negotiation",
            DealStage::Contract => "Contract",
            DealStage::DocumentCollection => "Document Collection",
            DealStage::Won => "Won",
            DealStage::AfterSale => "After Sale",
            DealStage::Lost => "Lost",
        }
    }
}

/// An opportunity tied to exactly one lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: String,
    pub lead_id: String,
    pub name: String,
    pub value: f64,
    pub stage: DealStage,
    /// Informational only; auto-set at certain stage transitions.
    pub probability: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// True if any logged activity is of the given type.
    pub fn has_activity(&self, activity_type: ActivityType) -> bool {
        self.activities.iter().any(|a| a.activity_type == activity_type)
    }
}

/// Quotation lifecycle: strict forward progression, no reverse transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotationStatus {
    Draft,
    Sent,
    SaleOrder,
    Locked,
}

/// A priced proposal. `final_amount` always equals `amount - discount`;
/// the setters in `quotation` are the only mutation path, so the stored
/// value cannot drift. Once locked the record is read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quotation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    pub customer_name: String,
    pub amount: f64,
    pub discount: f64,
    pub final_amount: f64,
    pub status: QuotationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_proof: Option<String>,
    /// Set exactly once, by the lock cascade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
}

/// One scheduled payment in a deal's contract phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    pub id: String,
    pub deal_id: String,
    pub name: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub note: String,
    /// True only for the first installment of a schedule.
    pub is_deposit: bool,
    pub status: InstallmentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Admission,
    Enrolled,
}

/// Created by the quotation lock cascade, enrolled later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    /// Generated sequential code, e.g. `HV24-0007`.
    pub code: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    /// Back-reference to the sale order (quotation) that created this student.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub so_id: Option<String>,
    pub status: StudentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Signed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub deal_id: String,
    pub title: String,
    pub value: f64,
    pub status: ContractStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// An actual money movement recorded by accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    pub amount: f64,
    pub description: String,
    pub status: TransactionStatus,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Void,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub amount: f64,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub status: MeetingStatus,
    #[serde(default)]
    pub notes: String,
}
