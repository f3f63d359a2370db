//! Tenancy model: one lease period linking a student to a room.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenancyStatus {
    Pending,
    Approved,
    Expired,
    Rejected,
    Forfeited,
    Cancelled,
}

impl TenancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Expired => "expired",
            Self::Rejected => "rejected",
            Self::Forfeited => "forfeited",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TenancyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One lease period for one student. Renewals are separate records, never
/// mutations of the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenancy {
    #[serde(rename = "_id")]
    pub id: String,
    /// Null until the applicant completes registration.
    pub student_id: Option<String>,
    pub debtor_id: Option<String>,
    pub room_id: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub start_date: DateTime<Utc>,
    pub end_date: Option<mongodb::bson::DateTime>,
    pub status: TenancyStatus,
    pub expiry_reason: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Tenancy {
    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date.map(|d| d.to_chrono())
    }

    pub fn end_date_naive(&self) -> Option<NaiveDate> {
        self.end_date().map(|d| d.date_naive())
    }

    pub fn start_date_naive(&self) -> NaiveDate {
        self.start_date.date_naive()
    }

    /// Heuristic for "the end date was edited after the record was created":
    /// the update timestamp trails creation by more than the write jitter of
    /// the original insert path.
    pub fn end_date_edited_after_creation(&self) -> bool {
        self.updated_at - self.created_at > Duration::seconds(60)
    }
}
