//! Entity Store: one JSON-serialized list per entity type under a fixed
//! string key, read and written whole ("read full list, mutate, write
//! full list back" — last writer wins, no field-level patches).
//!
//! The backend is a raw string KV behind the `StoreBackend` trait so call
//! sites depend on an interface, not ambient global state. The default
//! backend is a single-table SQLite database at `~/.eduflow/store.db`;
//! tests inject `MemoryBackend`.
//!
//! Reads are defensive: a missing or unparseable collection logs a
//! warning and yields an empty list, never an error (the UI layer treats
//! "no data" and "corrupt data" the same way).

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::types::{
    Contact, Contract, Deal, Installment, Invoice, Lead, Meeting, Quotation, Student, Transaction,
};

/// Fixed key namespace for persisted collections.
pub mod keys {
    pub const LEADS: &str = "leads";
    pub const CONTACTS: &str = "contacts";
    pub const DEALS: &str = "deals";
    pub const QUOTATIONS: &str = "quotations";
    pub const INSTALLMENTS: &str = "installments";
    pub const STUDENTS: &str = "students";
    pub const CONTRACTS: &str = "contracts";
    pub const TRANSACTIONS: &str = "actual_transactions";
    pub const INVOICES: &str = "invoices";
    pub const MEETINGS: &str = "meetings";
    /// Marker gating one-time demo seeding.
    pub const INIT: &str = "INIT";
}

/// Errors specific to store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create store directory: {0}")]
    CreateDir(std::io::Error),
}

/// Raw string key-value backend.
pub trait StoreBackend: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// SQLite-backed KV store. One `kv` table, one row per collection.
///
/// Intentionally NOT `Clone` or `Sync`; hold it behind a mutex if shared.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (or create) the store at `~/.eduflow/store.db`.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_at(Self::db_path()?)
    }

    /// Open a store at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read behavior
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Idempotent schema
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        Ok(Self { conn })
    }

    fn db_path() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeDirNotFound)?;
        Ok(home.join(".eduflow").join("store.db"))
    }
}

impl StoreBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryBackend {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Typed façade over a raw backend: one collection accessor pair per
/// entity type, all following whole-collection replace semantics.
pub struct EntityStore {
    backend: Box<dyn StoreBackend>,
}

impl EntityStore {
    pub fn new(backend: Box<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by SQLite at the default location.
    pub fn open_default() -> Result<Self, StoreError> {
        Ok(Self::new(Box::new(SqliteBackend::open()?)))
    }

    /// Ephemeral in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Read a whole collection. Missing key → empty. Parse failure →
    /// warn and empty (defensive read; see module docs).
    fn read_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("Store read failed for '{}': {}. Returning empty.", key, e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(list) => list,
            Err(e) => {
                log::warn!("Corrupt collection '{}': {}. Returning empty.", key, e);
                Vec::new()
            }
        }
    }

    /// Replace a whole collection.
    fn write_list<T: Serialize>(&self, key: &str, list: &[T]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(list)?;
        self.backend.set(key, &raw)
    }

    /// Read-modify-write one record identified by `matches`. Returns the
    /// updated record, or `None` if no record matched.
    fn update_in<T, F, M>(&self, key: &str, matches: M, f: F) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Serialize + Clone,
        M: Fn(&T) -> bool,
        F: FnOnce(&mut T),
    {
        let mut list: Vec<T> = self.read_list(key);
        let updated = match list.iter_mut().find(|item| matches(item)) {
            Some(item) => {
                f(item);
                Some(item.clone())
            }
            None => None,
        };
        if updated.is_some() {
            self.write_list(key, &list)?;
        }
        Ok(updated)
    }

    // =========================================================================
    // Leads
    // =========================================================================

    pub fn leads(&self) -> Vec<Lead> {
        self.read_list(keys::LEADS)
    }

    pub fn save_leads(&self, leads: &[Lead]) -> Result<(), StoreError> {
        self.write_list(keys::LEADS, leads)
    }

    pub fn lead(&self, id: &str) -> Option<Lead> {
        self.leads().into_iter().find(|l| l.id == id)
    }

    pub fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
        let mut leads = self.leads();
        leads.push(lead);
        self.save_leads(&leads)
    }

    pub fn update_lead(
        &self,
        id: &str,
        f: impl FnOnce(&mut Lead),
    ) -> Result<Option<Lead>, StoreError> {
        self.update_in(keys::LEADS, |l: &Lead| l.id == id, f)
    }

    // =========================================================================
    // Contacts
    // =========================================================================

    pub fn contacts(&self) -> Vec<Contact> {
        self.read_list(keys::CONTACTS)
    }

    pub fn save_contacts(&self, contacts: &[Contact]) -> Result<(), StoreError> {
        self.write_list(keys::CONTACTS, contacts)
    }

    // =========================================================================
    // Deals
    // =========================================================================

    pub fn deals(&self) -> Vec<Deal> {
        self.read_list(keys::DEALS)
    }

    pub fn save_deals(&self, deals: &[Deal]) -> Result<(), StoreError> {
        self.write_list(keys::DEALS, deals)
    }

    pub fn deal(&self, id: &str) -> Option<Deal> {
        self.deals().into_iter().find(|d| d.id == id)
    }

    pub fn insert_deal(&self, deal: Deal) -> Result<(), StoreError> {
        let mut deals = self.deals();
        deals.push(deal);
        self.save_deals(&deals)
    }

    pub fn update_deal(
        &self,
        id: &str,
        f: impl FnOnce(&mut Deal),
    ) -> Result<Option<Deal>, StoreError> {
        self.update_in(keys::DEALS, |d: &Deal| d.id == id, f)
    }

    // =========================================================================
    // Quotations
    // =========================================================================

    pub fn quotations(&self) -> Vec<Quotation> {
        self.read_list(keys::QUOTATIONS)
    }

    pub fn save_quotations(&self, quotations: &[Quotation]) -> Result<(), StoreError> {
        self.write_list(keys::QUOTATIONS, quotations)
    }

    pub fn quotation(&self, id: &str) -> Option<Quotation> {
        self.quotations().into_iter().find(|q| q.id == id)
    }

    pub fn insert_quotation(&self, quotation: Quotation) -> Result<(), StoreError> {
        let mut quotations = self.quotations();
        quotations.push(quotation);
        self.save_quotations(&quotations)
    }

    pub fn update_quotation(
        &self,
        id: &str,
        f: impl FnOnce(&mut Quotation),
    ) -> Result<Option<Quotation>, StoreError> {
        self.update_in(keys::QUOTATIONS, |q: &Quotation| q.id == id, f)
    }

    // =========================================================================
    // Installments
    // =========================================================================

    pub fn installments(&self) -> Vec<Installment> {
        self.read_list(keys::INSTALLMENTS)
    }

    pub fn save_installments(&self, installments: &[Installment]) -> Result<(), StoreError> {
        self.write_list(keys::INSTALLMENTS, installments)
    }

    /// Installments for one deal, in stored (schedule) order.
    pub fn installments_for_deal(&self, deal_id: &str) -> Vec<Installment> {
        self.installments()
            .into_iter()
            .filter(|i| i.deal_id == deal_id)
            .collect()
    }

    /// Replace the whole schedule for one deal, leaving other deals'
    /// installments untouched (template reselection semantics).
    pub fn replace_deal_installments(
        &self,
        deal_id: &str,
        schedule: Vec<Installment>,
    ) -> Result<(), StoreError> {
        let mut all: Vec<Installment> = self
            .installments()
            .into_iter()
            .filter(|i| i.deal_id != deal_id)
            .collect();
        all.extend(schedule);
        self.save_installments(&all)
    }

    pub fn update_installment(
        &self,
        id: &str,
        f: impl FnOnce(&mut Installment),
    ) -> Result<Option<Installment>, StoreError> {
        self.update_in(keys::INSTALLMENTS, |i: &Installment| i.id == id, f)
    }

    // =========================================================================
    // Students
    // =========================================================================

    pub fn students(&self) -> Vec<Student> {
        self.read_list(keys::STUDENTS)
    }

    pub fn save_students(&self, students: &[Student]) -> Result<(), StoreError> {
        self.write_list(keys::STUDENTS, students)
    }

    pub fn insert_student(&self, student: Student) -> Result<(), StoreError> {
        let mut students = self.students();
        students.push(student);
        self.save_students(&students)
    }

    pub fn update_student(
        &self,
        id: &str,
        f: impl FnOnce(&mut Student),
    ) -> Result<Option<Student>, StoreError> {
        self.update_in(keys::STUDENTS, |s: &Student| s.id == id, f)
    }

    // =========================================================================
    // Contracts / Transactions / Invoices / Meetings
    // =========================================================================

    pub fn contracts(&self) -> Vec<Contract> {
        self.read_list(keys::CONTRACTS)
    }

    pub fn save_contracts(&self, contracts: &[Contract]) -> Result<(), StoreError> {
        self.write_list(keys::CONTRACTS, contracts)
    }

    pub fn insert_contract(&self, contract: Contract) -> Result<(), StoreError> {
        let mut contracts = self.contracts();
        contracts.push(contract);
        self.save_contracts(&contracts)
    }

    pub fn update_contract(
        &self,
        id: &str,
        f: impl FnOnce(&mut Contract),
    ) -> Result<Option<Contract>, StoreError> {
        self.update_in(keys::CONTRACTS, |c: &Contract| c.id == id, f)
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.read_list(keys::TRANSACTIONS)
    }

    pub fn save_transactions(&self, transactions: &[Transaction]) -> Result<(), StoreError> {
        self.write_list(keys::TRANSACTIONS, transactions)
    }

    pub fn insert_transaction(&self, transaction: Transaction) -> Result<(), StoreError> {
        let mut transactions = self.transactions();
        transactions.push(transaction);
        self.save_transactions(&transactions)
    }

    pub fn update_transaction(
        &self,
        id: &str,
        f: impl FnOnce(&mut Transaction),
    ) -> Result<Option<Transaction>, StoreError> {
        self.update_in(keys::TRANSACTIONS, |t: &Transaction| t.id == id, f)
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.read_list(keys::INVOICES)
    }

    pub fn save_invoices(&self, invoices: &[Invoice]) -> Result<(), StoreError> {
        self.write_list(keys::INVOICES, invoices)
    }

    pub fn insert_invoice(&self, invoice: Invoice) -> Result<(), StoreError> {
        let mut invoices = self.invoices();
        invoices.push(invoice);
        self.save_invoices(&invoices)
    }

    pub fn update_invoice(
        &self,
        id: &str,
        f: impl FnOnce(&mut Invoice),
    ) -> Result<Option<Invoice>, StoreError> {
        self.update_in(keys::INVOICES, |i: &Invoice| i.id == id, f)
    }

    pub fn meetings(&self) -> Vec<Meeting> {
        self.read_list(keys::MEETINGS)
    }

    pub fn save_meetings(&self, meetings: &[Meeting]) -> Result<(), StoreError> {
        self.write_list(keys::MEETINGS, meetings)
    }

    pub fn insert_meeting(&self, meeting: Meeting) -> Result<(), StoreError> {
        let mut meetings = self.meetings();
        meetings.push(meeting);
        self.save_meetings(&meetings)
    }

    pub fn update_meeting(
        &self,
        id: &str,
        f: impl FnOnce(&mut Meeting),
    ) -> Result<Option<Meeting>, StoreError> {
        self.update_in(keys::MEETINGS, |m: &Meeting| m.id == id, f)
    }

    // =========================================================================
    // Seed marker
    // =========================================================================

    /// True once demo seeding has run.
    pub fn is_seeded(&self) -> bool {
        matches!(self.backend.get(keys::INIT), Ok(Some(_)))
    }

    pub fn mark_seeded(&self) -> Result<(), StoreError> {
        self.backend.set(keys::INIT, "1")
    }
}
