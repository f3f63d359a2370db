//! Identity resolution for a tenancy's ledger footprint.
//!
//! The same obligation has been tagged with up to six identifier schemes
//! over the data's history: the tenancy id, the student id, the debtor id,
//! the "1100-"-prefixed receivable code derived from each of those, and the
//! debtor's assigned permanent code. Correlation always happens against the
//! whole set, never against one assumed field.

use crate::models::{Debtor, Tenancy};

/// Receivable account-code family prefix.
pub const RECEIVABLE_PREFIX: &str = "1100-";

/// Every identifier that may tag a tenancy's accruals, plus the code new
/// postings should land on today. Computed fresh per run; canonical codes
/// can change between runs (a provisional code is replaced once finance
/// assigns the debtor a permanent one), so this is never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySet {
    /// Raw ids, in resolution order: tenancy, student, debtor.
    pub ids: Vec<String>,
    /// Receivable account codes: prefixed forms of each id, plus the
    /// debtor's assigned code when it differs.
    pub account_codes: Vec<String>,
    /// The code reversals must land on.
    pub canonical_account_code: String,
    pub student_id: Option<String>,
    pub debtor_id: Option<String>,
}

impl IdentitySet {
    /// Resolve the set for one tenancy. Infallible: absent links shrink the
    /// set, they never fail it.
    pub fn resolve(tenancy: &Tenancy, debtor: Option<&Debtor>) -> Self {
        let mut ids = Vec::new();
        push_unique(&mut ids, tenancy.id.clone());
        if let Some(student_id) = tenancy.student_id.as_deref() {
            push_unique(&mut ids, student_id.to_string());
        }
        if let Some(debtor) = debtor {
            push_unique(&mut ids, debtor.id.clone());
        }

        let mut account_codes = Vec::new();
        for id in &ids {
            push_unique(&mut account_codes, prefixed(id));
        }
        if let Some(assigned) = debtor.and_then(|d| d.account_code.as_deref()) {
            push_unique(&mut account_codes, assigned.to_string());
        }

        let canonical_account_code = match debtor {
            Some(d) => d
                .account_code
                .clone()
                .unwrap_or_else(|| prefixed(&d.id)),
            None => prefixed(&tenancy.id),
        };

        Self {
            ids,
            account_codes,
            canonical_account_code,
            student_id: tenancy.student_id.clone(),
            debtor_id: debtor.map(|d| d.id.clone()),
        }
    }

    /// ids plus account codes, for positions where either shape may appear.
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys = self.ids.clone();
        for code in &self.account_codes {
            push_unique(&mut keys, code.clone());
        }
        keys
    }

    /// Whether an account code belongs to this tenancy's receivable family.
    pub fn is_receivable_code(&self, code: &str) -> bool {
        code.starts_with(RECEIVABLE_PREFIX) || self.account_codes.iter().any(|c| c == code)
    }
}

pub fn prefixed(id: &str) -> String {
    format!("{}{}", RECEIVABLE_PREFIX, id)
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
