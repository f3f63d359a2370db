//! Ledger entry model for the double-entry rent ledger.
//!
//! Entries are append-mostly: a posted entry is never edited in place.
//! Corrections append an offsetting entry and at most set the advisory
//! `metadata.reversed` flag on the original.

use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    RentalAccrual,
    RentalAccrualReversal,
    #[serde(other)]
    Other,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RentalAccrual => "rental_accrual",
            Self::RentalAccrualReversal => "rental_accrual_reversal",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Posted,
    Deleted,
}

/// One debit/credit line against an account code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryLine {
    pub account_code: String,
    pub account_type: String,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

/// Free-form correlation bag. Field names have drifted over the data's
/// migration history; `tenancy_id` and `application_ref` hold the same
/// value under different generations of the posting path. Unknown keys are
/// preserved round-trip in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Numeric accrual month, but historically written as int32, int64,
    /// double or string depending on the producer. Normalized by
    /// [`crate::models::AccrualPeriod::from_entry`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual_month: Option<Bson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual_year: Option<Bson>,
    /// "YYYY-MM" string form used by one generation of the posting path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual_period: Option<String>,
    /// "lease_start" or "monthly".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenancy_id: Option<String>,
    /// Legacy alias of `tenancy_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debtor_id: Option<String>,
    /// Reversal entries only: back-reference to the reversed accrual.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_end_date: Option<mongodb::bson::DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_end_date: Option<mongodb::bson::DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_by: Option<String>,
    /// Advisory flag set on a reversed original. Never authoritative: the
    /// existence of a reversal entry referencing the original is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversed: Option<bool>,
    #[serde(flatten)]
    pub extra: Document,
}

pub const LEASE_START_KIND: &str = "lease_start";
pub const MONTHLY_KIND: &str = "monthly";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "_id")]
    pub id: String,
    /// Stable correlation id shared by related postings.
    pub transaction_id: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub date: DateTime<Utc>,
    pub description: String,
    pub source: EntrySource,
    #[serde(default)]
    pub status: EntryStatus,
    /// Entry-level correlation id. Depending on when the entry was posted
    /// this held a tenancy id, a student id or a debtor id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debtor_ref: Option<String>,
    /// Generic back-reference slot; reversals populated it in some eras.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub entries: Vec<EntryLine>,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl LedgerEntry {
    pub fn is_accrual(&self) -> bool {
        self.source == EntrySource::RentalAccrual
    }

    pub fn is_reversal(&self) -> bool {
        self.source == EntrySource::RentalAccrualReversal
    }

    pub fn is_deleted(&self) -> bool {
        self.status == EntryStatus::Deleted
    }

    /// Lease-start accruals are tagged in metadata by the current posting
    /// path; older ones are recognizable only by their description.
    pub fn is_lease_start(&self) -> bool {
        if let Some(kind) = self.metadata.accrual_kind.as_deref() {
            return kind == LEASE_START_KIND;
        }
        self.description.to_lowercase().starts_with("lease start")
    }

    pub fn line_debit_total(&self) -> Decimal {
        self.entries.iter().map(|l| l.debit).sum()
    }

    pub fn line_credit_total(&self) -> Decimal {
        self.entries.iter().map(|l| l.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.line_debit_total() == self.line_credit_total()
    }

    pub fn flagged_reversed(&self) -> bool {
        self.metadata.reversed == Some(true)
    }
}
