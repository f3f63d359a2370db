//! Bulk audit: one pass over the whole dataset for tenancies that still
//! carry unreversed post-expiry accruals.
//!
//! The scan is read-only and bounded to a handful of bulk queries; all
//! per-tenancy work happens against in-memory indexes. It shares the
//! classification predicate with the single-tenancy correction, so its
//! findings are exactly what a correction run would reverse.

use crate::models::{AccrualPeriod, EntrySource, LedgerEntry, Tenancy};
use crate::services::correction::incorrect_accruals;
use crate::services::database::MongoDb;
use crate::services::identity::{IdentitySet, RECEIVABLE_PREFIX};
use crate::services::matcher::{annotate, MatchedAccrual};
use crate::services::metrics::{AUDIT_SCANS, DB_QUERY_DURATION};
use crate::services::renewal::pick_renewal;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Document};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

#[derive(Debug, Clone, Serialize)]
pub struct FlaggedAccrual {
    pub entry_id: String,
    pub transaction_id: String,
    pub period: AccrualPeriod,
    pub posted_at: DateTime<Utc>,
    pub amount: Decimal,
    /// Posted after the tenancy record was last edited: a strong signal the
    /// accrual is a stale artifact of an earlier, wrong end date.
    pub posted_after_end_date_edit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlaggedTenancy {
    pub tenancy_id: String,
    pub student_id: Option<String>,
    pub end_date: Option<NaiveDate>,
    pub end_date_edited_after_creation: bool,
    pub accruals: Vec<FlaggedAccrual>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub target_period: AccrualPeriod,
    pub tenancies_scanned: usize,
    pub accruals_scanned: usize,
    pub reversals_scanned: usize,
    pub flagged: Vec<FlaggedTenancy>,
}

pub struct BulkAuditor {
    db: MongoDb,
    verbose_log_cap: usize,
}

impl BulkAuditor {
    pub fn new(db: MongoDb, verbose_log_cap: usize) -> Self {
        Self {
            db,
            verbose_log_cap,
        }
    }

    /// Scan everything up to and including the target month (defaulting to
    /// the current one). Mutates nothing; safe to run alongside
    /// corrections, whose commits simply make a re-run's snapshot fresher.
    #[instrument(skip(self))]
    pub async fn scan(&self, target: Option<AccrualPeriod>) -> Result<AuditReport, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["audit_scan"])
            .start_timer();
        let target = target.unwrap_or_else(|| AccrualPeriod::containing(Utc::now().date_naive()));

        // 1. Every approved or expired tenancy with a recorded end date.
        let tenancies = self.load_tenancies().await?;

        let student_ids: Vec<String> = tenancies
            .iter()
            .filter_map(|t| t.student_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let direct_debtor_ids: Vec<String> = tenancies
            .iter()
            .filter_map(|t| t.debtor_id.clone())
            .collect();

        // Debtors resolve both identity sets and accrual attribution.
        let debtors = self.load_debtors(&student_ids, &direct_debtor_ids).await?;
        let debtor_by_id: HashMap<&str, usize> = debtors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.as_str(), i))
            .collect();
        let debtor_by_student: HashMap<&str, usize> = debtors
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.student_id.as_deref().map(|s| (s, i)))
            .collect();
        let mut debtor_key_to_student: HashMap<String, String> = HashMap::new();
        for d in &debtors {
            if let Some(student_id) = &d.student_id {
                debtor_key_to_student.insert(d.id.clone(), student_id.clone());
                if let Some(code) = &d.account_code {
                    debtor_key_to_student.insert(code.clone(), student_id.clone());
                }
            }
        }

        // Identity sets, fresh for this run, and their union.
        let mut identities = Vec::with_capacity(tenancies.len());
        let mut union_ids: HashSet<String> = HashSet::new();
        let mut union_codes: HashSet<String> = HashSet::new();
        for tenancy in &tenancies {
            let debtor = tenancy
                .debtor_id
                .as_deref()
                .and_then(|id| debtor_by_id.get(id))
                .or_else(|| {
                    tenancy
                        .student_id
                        .as_deref()
                        .and_then(|s| debtor_by_student.get(s))
                })
                .map(|&i| &debtors[i]);
            let identity = IdentitySet::resolve(tenancy, debtor);
            union_ids.extend(identity.ids.iter().cloned());
            union_codes.extend(identity.account_codes.iter().cloned());
            identities.push(identity);
        }
        let union_ids: Vec<String> = union_ids.into_iter().collect();
        let union_codes: Vec<String> = union_codes.into_iter().collect();

        // 2. The two bulk ledger reads have no ordering dependency.
        let (accruals, reversals) = tokio::join!(
            self.load_entries(
                EntrySource::RentalAccrual,
                union_ids.clone(),
                union_codes.clone()
            ),
            self.load_entries(
                EntrySource::RentalAccrualReversal,
                union_ids.clone(),
                union_codes.clone()
            ),
        );
        let accruals = accruals?;
        let reversals = reversals?;
        let accruals_scanned = accruals.len();
        let reversals_scanned = reversals.len();

        // 3. Which originals are already handled, derived from the ledger.
        let reversed = reversed_originals(&reversals);

        // 4. One scan of the accrual list builds both attribution maps.
        let matched = annotate(accruals);
        let tenancy_id_set: HashSet<&str> = tenancies.iter().map(|t| t.id.as_str()).collect();
        let student_id_set: HashSet<&str> = student_ids.iter().map(|s| s.as_str()).collect();
        let (by_tenancy, by_student) = build_indexes(
            &matched,
            &tenancy_id_set,
            &student_id_set,
            &debtor_key_to_student,
        );

        // 5. Renewal candidates per student, preloaded in one query.
        let renewals_by_student = self.load_renewal_candidates(&student_ids).await?;

        // 6. Classification from the in-memory maps only.
        let mut flagged = Vec::new();
        for (tenancy, identity) in tenancies.iter().zip(&identities) {
            let Some(end) = tenancy.end_date_naive() else {
                continue;
            };

            let mut indices: Vec<usize> = by_tenancy
                .get(tenancy.id.as_str())
                .cloned()
                .unwrap_or_default();
            if let Some(student_id) = identity.student_id.as_deref() {
                if let Some(more) = by_student.get(student_id) {
                    indices.extend(more);
                }
            }
            indices.sort_unstable();
            indices.dedup();
            if indices.is_empty() {
                continue;
            }
            let candidates: Vec<MatchedAccrual> =
                indices.iter().map(|&i| matched[i].clone()).collect();

            let renewal = identity.student_id.as_deref().and_then(|student_id| {
                let pool = renewals_by_student.get(student_id)?;
                let others: Vec<Tenancy> = pool
                    .iter()
                    .filter(|c| c.id != tenancy.id)
                    .cloned()
                    .collect();
                pick_renewal(others, end)
            });

            let offending: Vec<FlaggedAccrual> =
                incorrect_accruals(tenancy, end, &candidates, renewal.as_ref(), Some(target))
                    .into_iter()
                    .filter(|m| {
                        !reversed.contains(m.entry.id.as_str())
                            && !reversed.contains(m.entry.transaction_id.as_str())
                            && !m.entry.flagged_reversed()
                    })
                    .map(|m| FlaggedAccrual {
                        entry_id: m.entry.id.clone(),
                        transaction_id: m.entry.transaction_id.clone(),
                        period: m.period,
                        posted_at: m.entry.date,
                        amount: m.entry.total_debit,
                        posted_after_end_date_edit: tenancy.end_date_edited_after_creation()
                            && m.entry.date > tenancy.updated_at,
                    })
                    .collect();

            if offending.is_empty() {
                continue;
            }

            if flagged.len() < self.verbose_log_cap {
                tracing::info!(
                    tenancy_id = %tenancy.id,
                    end_date = %end,
                    offending = offending.len(),
                    "Tenancy has unreversed post-end accruals"
                );
            }
            flagged.push(FlaggedTenancy {
                tenancy_id: tenancy.id.clone(),
                student_id: identity.student_id.clone(),
                end_date: Some(end),
                end_date_edited_after_creation: tenancy.end_date_edited_after_creation(),
                accruals: offending,
            });
        }

        timer.observe_duration();
        AUDIT_SCANS.with_label_values(&["success"]).inc();
        tracing::info!(
            tenancies = tenancies.len(),
            accruals = accruals_scanned,
            reversals = reversals_scanned,
            flagged = flagged.len(),
            "Bulk audit scan complete"
        );

        Ok(AuditReport {
            target_period: target,
            tenancies_scanned: tenancies.len(),
            accruals_scanned,
            reversals_scanned,
            flagged,
        })
    }

    async fn load_tenancies(&self) -> Result<Vec<Tenancy>, AppError> {
        let filter = doc! {
            "status": { "$in": ["approved", "expired"] },
            "end_date": { "$ne": null },
        };
        let mut cursor = self
            .db
            .tenancies()
            .find(filter, None)
            .await
            .map_err(AppError::from)?;
        let mut tenancies = Vec::new();
        while let Some(t) = cursor.try_next().await.map_err(AppError::from)? {
            tenancies.push(t);
        }
        Ok(tenancies)
    }

    async fn load_debtors(
        &self,
        student_ids: &[String],
        debtor_ids: &[String],
    ) -> Result<Vec<crate::models::Debtor>, AppError> {
        let filter = doc! {
            "$or": [
                { "_id": { "$in": debtor_ids.to_vec() } },
                { "student_id": { "$in": student_ids.to_vec() } },
            ]
        };
        let mut cursor = self
            .db
            .debtors()
            .find(filter, None)
            .await
            .map_err(AppError::from)?;
        let mut debtors = Vec::new();
        while let Some(d) = cursor.try_next().await.map_err(AppError::from)? {
            debtors.push(d);
        }
        Ok(debtors)
    }

    async fn load_entries(
        &self,
        source: EntrySource,
        ids: Vec<String>,
        codes: Vec<String>,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        let filter = doc! {
            "source": source.as_str(),
            "status": { "$ne": "deleted" },
            "$or": [
                { "debtor_ref": { "$in": ids.clone() } },
                { "metadata.tenancy_id": { "$in": ids.clone() } },
                { "metadata.application_ref": { "$in": ids.clone() } },
                { "metadata.student_id": { "$in": ids.clone() } },
                { "metadata.debtor_id": { "$in": ids } },
                { "entries.account_code": { "$in": codes } },
            ],
        };
        self.collect_entries(filter).await
    }

    async fn collect_entries(&self, filter: Document) -> Result<Vec<LedgerEntry>, AppError> {
        let mut cursor = self
            .db
            .ledger_entries()
            .find(filter, None)
            .await
            .map_err(AppError::from)?;
        let mut entries = Vec::new();
        while let Some(e) = cursor.try_next().await.map_err(AppError::from)? {
            entries.push(e);
        }
        Ok(entries)
    }

    async fn load_renewal_candidates(
        &self,
        student_ids: &[String],
    ) -> Result<HashMap<String, Vec<Tenancy>>, AppError> {
        let filter = doc! {
            "student_id": { "$in": student_ids.to_vec() },
            "status": { "$in": ["approved", "pending"] },
        };
        let mut cursor = self
            .db
            .tenancies()
            .find(filter, None)
            .await
            .map_err(AppError::from)?;
        let mut by_student: HashMap<String, Vec<Tenancy>> = HashMap::new();
        while let Some(t) = cursor.try_next().await.map_err(AppError::from)? {
            if let Some(student_id) = t.student_id.clone() {
                by_student.entry(student_id).or_default().push(t);
            }
        }
        Ok(by_student)
    }
}

/// Every id a reversal names as its original: entry id, transaction id or
/// the generic reference slot.
pub fn reversed_originals(reversals: &[LedgerEntry]) -> HashSet<&str> {
    let mut reversed = HashSet::new();
    for r in reversals {
        if let Some(id) = r.metadata.original_entry_id.as_deref() {
            reversed.insert(id);
        }
        if let Some(id) = r.metadata.original_transaction_id.as_deref() {
            reversed.insert(id);
        }
        if let Some(id) = r.reference.as_deref() {
            reversed.insert(id);
        }
    }
    reversed
}

/// Every identifier value an entry carries in a correlation position, with
/// prefix-stripped variants alongside.
pub fn correlation_keys(entry: &LedgerEntry) -> Vec<String> {
    let mut keys = Vec::new();
    let mut push = |value: &str, keys: &mut Vec<String>| {
        if !value.is_empty() && !keys.iter().any(|k| k == value) {
            keys.push(value.to_string());
        }
        if let Some(stripped) = value.strip_prefix(RECEIVABLE_PREFIX) {
            if !stripped.is_empty() && !keys.iter().any(|k| k == stripped) {
                keys.push(stripped.to_string());
            }
        }
    };
    if let Some(v) = entry.debtor_ref.as_deref() {
        push(v, &mut keys);
    }
    if let Some(v) = entry.metadata.tenancy_id.as_deref() {
        push(v, &mut keys);
    }
    if let Some(v) = entry.metadata.application_ref.as_deref() {
        push(v, &mut keys);
    }
    if let Some(v) = entry.metadata.student_id.as_deref() {
        push(v, &mut keys);
    }
    if let Some(v) = entry.metadata.debtor_id.as_deref() {
        push(v, &mut keys);
    }
    for line in &entry.entries {
        push(&line.account_code, &mut keys);
    }
    keys
}

/// One pass over the matched accruals building both attribution maps:
/// tenancy id to accrual indices and student id to accrual indices.
pub fn build_indexes<'a>(
    matched: &[MatchedAccrual],
    tenancy_ids: &HashSet<&'a str>,
    student_ids: &HashSet<&'a str>,
    debtor_key_to_student: &'a HashMap<String, String>,
) -> (HashMap<&'a str, Vec<usize>>, HashMap<&'a str, Vec<usize>>) {
    let mut by_tenancy: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut by_student: HashMap<&str, Vec<usize>> = HashMap::new();

    for (idx, m) in matched.iter().enumerate() {
        for key in correlation_keys(&m.entry) {
            if let Some(&tid) = tenancy_ids.get(key.as_str()) {
                let entry = by_tenancy.entry(tid).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
            if let Some(&sid) = student_ids.get(key.as_str()) {
                let entry = by_student.entry(sid).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
            if let Some(student) = debtor_key_to_student.get(key.as_str()) {
                let entry = by_student.entry(student.as_str()).or_default();
                if entry.last() != Some(&idx) {
                    entry.push(idx);
                }
            }
        }
    }

    (by_tenancy, by_student)
}
