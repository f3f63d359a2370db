use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebtorStatus {
    Active,
    Expired,
    #[serde(other)]
    Unknown,
}

/// The billing-side counterpart of a student. Carries the assigned
/// receivable account code once finance issues a permanent one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debtor {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: Option<String>,
    pub name: String,
    /// Canonical receivable account code, when one has been assigned.
    /// Provisional debtors accrue against a synthesized prefix code instead.
    pub account_code: Option<String>,
    pub status: DebtorStatus,
}
