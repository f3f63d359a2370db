//! Single-tenancy correction: find the accruals a shortened lease no
//! longer justifies and reverse each exactly once.
//!
//! The classification predicate lives here and is shared verbatim with the
//! bulk auditor, so a scan's findings always equal what a correction would
//! actually reverse.

use crate::models::{AccrualPeriod, Debtor, Student, Tenancy};
use crate::services::database::MongoDb;
use crate::services::identity::IdentitySet;
use crate::services::lease::{LeaseEndApplier, SideEffectReport};
use crate::services::matcher::{AccrualMatcher, MatchedAccrual};
use crate::services::metrics::{record_correction, record_reversal, DB_QUERY_DURATION};
use crate::services::renewal::{self, RenewalDetector};
use crate::services::reversal::{build_reversal, ReversalContext, ReversalWriter};
use chrono::NaiveDate;
use mongodb::bson::doc;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use tracing::instrument;

/// One reversal the correction created.
#[derive(Debug, Clone, Serialize)]
pub struct ReversalRecord {
    pub original_entry_id: String,
    pub original_transaction_id: String,
    pub reversal_entry_id: String,
    pub period: AccrualPeriod,
    pub amount: Decimal,
}

/// An accrual that needed no action, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedAccrual {
    pub entry_id: String,
    pub period: AccrualPeriod,
    pub reason: String,
}

/// A per-entry failure that did not abort the batch.
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub entry_id: String,
    pub error: String,
}

/// Structured result of one correction run. Expected conditions (nothing
/// to correct, everything already handled) are success outcomes here, not
/// errors.
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionOutcome {
    pub tenancy_id: String,
    pub previous_end_date: Option<NaiveDate>,
    pub corrected_end_date: NaiveDate,
    pub accruals_considered: usize,
    pub nothing_to_correct: bool,
    pub reversals: Vec<ReversalRecord>,
    pub skipped: Vec<SkippedAccrual>,
    pub errors: Vec<ItemError>,
    pub side_effects: SideEffectReport,
}

/// Which matched accruals a corrected end date makes incorrect.
///
/// A monthly accrual is incorrect when its month starts strictly after the
/// corrected end date and no renewal covers that month. A lease-start
/// accrual is incorrect only when the lease was cut off before it ever
/// began. Reversals and deleted entries are never candidates. `up_to`
/// bounds the periods a scan considers; `None` considers everything.
pub fn incorrect_accruals<'a>(
    tenancy: &Tenancy,
    corrected_end: NaiveDate,
    accruals: &'a [MatchedAccrual],
    renewal: Option<&Tenancy>,
    up_to: Option<AccrualPeriod>,
) -> Vec<&'a MatchedAccrual> {
    accruals
        .iter()
        .filter(|m| {
            let entry = &m.entry;
            if !entry.is_accrual() || entry.is_deleted() {
                return false;
            }
            if let Some(cap) = up_to {
                if m.period > cap {
                    return false;
                }
            }
            if entry.is_lease_start() {
                // Only a cancel-before-start invalidates the lease-start
                // posting; an early end alone never does.
                return corrected_end < tenancy.start_date_naive();
            }
            if m.period.first_day() <= corrected_end {
                return false;
            }
            if let Some(r) = renewal {
                if renewal::covers(r, m.period) {
                    return false;
                }
            }
            true
        })
        .collect()
}

pub struct CorrectionEngine {
    db: MongoDb,
}

impl CorrectionEngine {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }

    /// Correct one tenancy to its actual end date. All ledger writes plus
    /// the tenancy/debtor transitions commit or abort together; the room
    /// occupancy release runs after commit and is best effort.
    #[instrument(skip(self, reason, actor), fields(tenancy_id = %tenancy_id, corrected_end = %corrected_end))]
    pub async fn correct_tenancy(
        &self,
        tenancy_id: &str,
        corrected_end: NaiveDate,
        reason: &str,
        actor: &str,
    ) -> Result<CorrectionOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["correct_tenancy"])
            .start_timer();

        let tenancy = self
            .db
            .tenancies()
            .find_one(doc! { "_id": tenancy_id }, None)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| {
                record_correction("correct_tenancy", "not_found");
                AppError::NotFound(anyhow::anyhow!("Tenancy {} not found", tenancy_id))
            })?;

        let student = self.load_student(&tenancy).await?;
        let debtor = self.load_debtor(&tenancy).await?;
        let identity = IdentitySet::resolve(&tenancy, debtor.as_ref());

        let matcher = AccrualMatcher::new(self.db.clone());
        let accruals = matcher.find_accruals(&identity).await?;

        let renewal = match identity.student_id.as_deref() {
            Some(student_id) => {
                RenewalDetector::new(self.db.clone())
                    .find_renewal(student_id, &tenancy.id, corrected_end)
                    .await?
            }
            None => None,
        };
        if let Some(r) = &renewal {
            tracing::info!(
                renewal_id = %r.id,
                renewal_start = %r.start_date_naive(),
                "Renewal on record; covered months exempt from reversal"
            );
        }

        let candidates = incorrect_accruals(
            &tenancy,
            corrected_end,
            &accruals,
            renewal.as_ref(),
            None,
        );

        // Idempotency pass: a candidate with an existing reversal (or an
        // advisory flag) is recorded as handled, never re-reversed.
        let writer = ReversalWriter::new(self.db.clone());
        let mut to_reverse = Vec::new();
        let mut skipped = Vec::new();
        for matched in candidates {
            if let Some(existing_id) = writer.existing_reversal(&matched.entry).await? {
                record_reversal("skipped");
                skipped.push(SkippedAccrual {
                    entry_id: matched.entry.id.clone(),
                    period: matched.period,
                    reason: format!("already reversed by entry {}", existing_id),
                });
            } else if matched.entry.flagged_reversed() {
                record_reversal("skipped");
                skipped.push(SkippedAccrual {
                    entry_id: matched.entry.id.clone(),
                    period: matched.period,
                    reason: "original entry flagged reversed".to_string(),
                });
            } else {
                to_reverse.push(matched);
            }
        }

        let account_holder = student.as_ref().map(|s| s.full_name());
        let ctx = ReversalContext {
            tenancy: &tenancy,
            identity: &identity,
            account_holder: account_holder.as_deref(),
            reason,
            actor,
            previous_end_date: tenancy.end_date(),
            corrected_end_date: corrected_end,
        };

        let end_changed = tenancy.end_date_naive() != Some(corrected_end);
        let mut reversals = Vec::new();
        let mut errors = Vec::new();
        let mut side_effects = SideEffectReport::default();
        let mut expired_now = false;

        if !to_reverse.is_empty() || end_changed {
            let applier = LeaseEndApplier::new(self.db.clone());
            let mut session = self.db.start_session().await?;
            session.start_transaction(None).await.map_err(|e| {
                record_correction("correct_tenancy", "error");
                AppError::from(e)
            })?;

            for matched in &to_reverse {
                match build_reversal(&matched.entry, matched.period, &ctx) {
                    Ok(reversal) => {
                        if let Err(e) = writer.persist(&mut session, &reversal, &matched.entry).await
                        {
                            session.abort_transaction().await.ok();
                            record_correction("correct_tenancy", "error");
                            return Err(e);
                        }
                        record_reversal("created");
                        reversals.push(ReversalRecord {
                            original_entry_id: matched.entry.id.clone(),
                            original_transaction_id: matched.entry.transaction_id.clone(),
                            reversal_entry_id: reversal.id.clone(),
                            period: matched.period,
                            amount: reversal.total_debit,
                        });
                    }
                    Err(e) => {
                        // Fatal for this one entry only; the rest of the
                        // batch still commits.
                        tracing::error!(
                            entry_id = %matched.entry.id,
                            error = %e,
                            "Reversal construction failed"
                        );
                        record_reversal("error");
                        errors.push(ItemError {
                            entry_id: matched.entry.id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            if end_changed {
                match applier
                    .apply_end_date(
                        &mut session,
                        &tenancy,
                        identity.debtor_id.as_deref(),
                        corrected_end,
                        reason,
                        actor,
                    )
                    .await
                {
                    Ok(expired) => {
                        side_effects.end_date_updated = true;
                        side_effects.tenancy_expired = expired;
                        side_effects.debtor_expired = expired && identity.debtor_id.is_some();
                        expired_now = expired;
                    }
                    Err(e) => {
                        session.abort_transaction().await.ok();
                        record_correction("correct_tenancy", "error");
                        return Err(e);
                    }
                }
            }

            session.commit_transaction().await.map_err(|e| {
                record_correction("correct_tenancy", "error");
                AppError::from(e)
            })?;

            if expired_now {
                if let Some(room_id) = tenancy.room_id.as_deref() {
                    match applier.release_room(room_id).await {
                        Ok(()) => side_effects.room_released = true,
                        Err(e) => {
                            tracing::warn!(
                                room_id = %room_id,
                                error = %e,
                                "Room occupancy release failed; ledger correction stands"
                            );
                            side_effects
                                .errors
                                .push(format!("room release failed: {}", e));
                        }
                    }
                }
            }
        }

        timer.observe_duration();
        record_correction("correct_tenancy", "success");

        let nothing_to_correct = reversals.is_empty() && skipped.is_empty() && errors.is_empty();
        tracing::info!(
            tenancy_id = %tenancy.id,
            reversals = reversals.len(),
            skipped = skipped.len(),
            errors = errors.len(),
            nothing_to_correct = nothing_to_correct,
            "Correction run complete"
        );

        Ok(CorrectionOutcome {
            tenancy_id: tenancy.id.clone(),
            previous_end_date: tenancy.end_date_naive(),
            corrected_end_date: corrected_end,
            accruals_considered: accruals.len(),
            nothing_to_correct,
            reversals,
            skipped,
            errors,
            side_effects,
        })
    }

    async fn load_student(&self, tenancy: &Tenancy) -> Result<Option<Student>, AppError> {
        match tenancy.student_id.as_deref() {
            Some(student_id) => self
                .db
                .students()
                .find_one(doc! { "_id": student_id }, None)
                .await
                .map_err(AppError::from),
            None => Ok(None),
        }
    }

    async fn load_debtor(&self, tenancy: &Tenancy) -> Result<Option<Debtor>, AppError> {
        if let Some(debtor_id) = tenancy.debtor_id.as_deref() {
            let found = self
                .db
                .debtors()
                .find_one(doc! { "_id": debtor_id }, None)
                .await
                .map_err(AppError::from)?;
            if found.is_some() {
                return Ok(found);
            }
        }
        match tenancy.student_id.as_deref() {
            Some(student_id) => self
                .db
                .debtors()
                .find_one(doc! { "student_id": student_id }, None)
                .await
                .map_err(AppError::from),
            None => Ok(None),
        }
    }
}
