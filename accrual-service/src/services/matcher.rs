//! Accrual matching: finds every `rental_accrual` entry that could belong
//! to a tenancy, whatever identifier scheme tagged it.
//!
//! Three tiers of widening, each only attempted when the previous one came
//! back empty. The tiers exist because accruals were tagged inconsistently
//! across a multi-year migration history, and each tier is strictly more
//! expensive than the last.

use crate::models::{AccrualPeriod, EntrySource, LedgerEntry};
use crate::services::database::MongoDb;
use crate::services::identity::{prefixed, IdentitySet};
use crate::services::metrics::{record_malformed_accrual, DB_QUERY_DURATION};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Document};
use service_core::error::AppError;
use std::collections::HashSet;
use tracing::instrument;

/// A candidate accrual with its resolved calendar month.
#[derive(Debug, Clone)]
pub struct MatchedAccrual {
    pub entry: LedgerEntry,
    pub period: AccrualPeriod,
}

pub struct AccrualMatcher {
    db: MongoDb,
}

impl AccrualMatcher {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }

    /// All accruals attributable to the identity set, deduplicated and
    /// annotated with their accrual month. Entries whose month cannot be
    /// resolved are dropped with a diagnostic; they never abort the run.
    #[instrument(skip(self, identity), fields(tenancy_keys = identity.ids.len()))]
    pub async fn find_accruals(
        &self,
        identity: &IdentitySet,
    ) -> Result<Vec<MatchedAccrual>, AppError> {
        let mut found = self.by_correlation_fields(identity).await?;

        if found.is_empty() {
            tracing::debug!("No correlation-field matches, widening to account codes");
            found = self.by_account_code(identity).await?;
        }

        if found.is_empty() {
            if let Some(student_id) = identity.student_id.as_deref() {
                tracing::debug!(
                    student_id = %student_id,
                    "No account-code matches, widening to full student history"
                );
                found = self.by_student_history(student_id).await?;
            }
        }

        Ok(annotate(found))
    }

    /// Tier 1: the four correlation positions, OR-combined. Entry-level
    /// ref, the two drifted metadata aliases, and the per-line account code.
    async fn by_correlation_fields(
        &self,
        identity: &IdentitySet,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["accruals_by_correlation"])
            .start_timer();

        let filter = accrual_filter(doc! {
            "$or": [
                { "debtor_ref": { "$in": identity.ids.clone() } },
                { "metadata.tenancy_id": { "$in": identity.ids.clone() } },
                { "metadata.application_ref": { "$in": identity.ids.clone() } },
                { "entries.account_code": { "$in": identity.account_codes.clone() } },
            ]
        });
        let entries = self.collect(filter).await?;

        timer.observe_duration();
        Ok(entries)
    }

    /// Tier 2: pure account-code search. Covers entries whose correlation
    /// fields were never populated; the raw ids are included because the
    /// oldest posting path wrote them straight into the code position.
    async fn by_account_code(&self, identity: &IdentitySet) -> Result<Vec<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["accruals_by_account_code"])
            .start_timer();

        let filter = accrual_filter(doc! {
            "entries.account_code": { "$in": identity.all_keys() }
        });
        let entries = self.collect(filter).await?;

        timer.observe_duration();
        Ok(entries)
    }

    /// Tier 3: everything the student has ever been. Loads every tenancy
    /// and debtor associated with the student, builds the cross-product of
    /// possible keys, and searches the four positions once more.
    async fn by_student_history(&self, student_id: &str) -> Result<Vec<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["accruals_by_student_history"])
            .start_timer();

        let mut keys: Vec<String> = vec![student_id.to_string(), prefixed(student_id)];

        let mut tenancies = self
            .db
            .tenancies()
            .find(doc! { "student_id": student_id }, None)
            .await
            .map_err(AppError::from)?;
        while let Some(tenancy) = tenancies.try_next().await.map_err(AppError::from)? {
            keys.push(tenancy.id.clone());
            keys.push(prefixed(&tenancy.id));
        }

        let mut debtors = self
            .db
            .debtors()
            .find(doc! { "student_id": student_id }, None)
            .await
            .map_err(AppError::from)?;
        while let Some(debtor) = debtors.try_next().await.map_err(AppError::from)? {
            keys.push(debtor.id.clone());
            keys.push(prefixed(&debtor.id));
            if let Some(code) = debtor.account_code {
                keys.push(code);
            }
        }

        keys.sort();
        keys.dedup();

        let filter = accrual_filter(doc! {
            "$or": [
                { "debtor_ref": { "$in": keys.clone() } },
                { "metadata.tenancy_id": { "$in": keys.clone() } },
                { "metadata.application_ref": { "$in": keys.clone() } },
                { "entries.account_code": { "$in": keys } },
            ]
        });
        let entries = self.collect(filter).await?;

        timer.observe_duration();
        Ok(entries)
    }

    async fn collect(&self, filter: Document) -> Result<Vec<LedgerEntry>, AppError> {
        let mut cursor = self
            .db
            .ledger_entries()
            .find(filter, None)
            .await
            .map_err(AppError::from)?;
        let mut entries = Vec::new();
        while let Some(entry) = cursor.try_next().await.map_err(AppError::from)? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn accrual_filter(positions: Document) -> Document {
    let mut filter = doc! {
        "source": EntrySource::RentalAccrual.as_str(),
        "status": { "$ne": "deleted" },
    };
    filter.extend(positions);
    filter
}

/// Deduplicate by entry id and resolve each accrual's month.
pub fn annotate(entries: Vec<LedgerEntry>) -> Vec<MatchedAccrual> {
    let mut seen = HashSet::new();
    let mut matched = Vec::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.clone()) {
            continue;
        }
        match AccrualPeriod::from_entry(&entry) {
            Ok(period) => matched.push(MatchedAccrual { entry, period }),
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    transaction_id = %entry.transaction_id,
                    error = %e,
                    "Dropping accrual with unresolvable month"
                );
                record_malformed_accrual("matcher");
            }
        }
    }
    matched
}
