//! Reversal generation: synthesizes the balancing entry that offsets one
//! incorrect accrual.
//!
//! Whether an accrual is already reversed is a derived predicate over the
//! ledger (does any reversal entry reference it), never a stored flag read
//! in isolation. The advisory `metadata.reversed` flag on the original is
//! written for operators but only trusted as a secondary skip signal.

use crate::models::period::start_of_day;
use crate::models::{
    AccrualPeriod, AuditRecord, EntryLine, EntryMetadata, EntrySource, EntryStatus, LedgerEntry,
    Tenancy,
};
use crate::services::database::MongoDb;
use crate::services::identity::IdentitySet;
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::{doc, Bson};
use mongodb::ClientSession;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReversalBuildError {
    #[error("reversal lines do not balance: debit {debit} != credit {credit}")]
    Unbalanced { debit: Decimal, credit: Decimal },
}

/// Everything a reversal needs to know about the correction it belongs to.
pub struct ReversalContext<'a> {
    pub tenancy: &'a Tenancy,
    pub identity: &'a IdentitySet,
    /// The account holder's current display name, for regenerating the
    /// receivable line's description.
    pub account_holder: Option<&'a str>,
    pub reason: &'a str,
    pub actor: &'a str,
    pub previous_end_date: Option<DateTime<Utc>>,
    pub corrected_end_date: NaiveDate,
}

/// Build the balancing entry for one incorrect accrual: every line with
/// debit and credit swapped, receivable lines re-pointed at the tenancy's
/// current canonical account code. Totals are recomputed from the swapped
/// lines, never copied from the original, and must balance.
pub fn build_reversal(
    original: &LedgerEntry,
    period: AccrualPeriod,
    ctx: &ReversalContext<'_>,
) -> Result<LedgerEntry, ReversalBuildError> {
    let mut lines = Vec::with_capacity(original.entries.len());
    for line in &original.entries {
        let mut account_code = line.account_code.clone();
        let mut description = line.description.clone();
        if ctx.identity.is_receivable_code(&line.account_code) {
            // The original may have accrued against a stale or provisional
            // code; the reversal must land on the live receivable account.
            account_code = ctx.identity.canonical_account_code.clone();
            if let Some(name) = ctx.account_holder {
                description = format!("Accounts receivable - {}", name);
            }
        }
        lines.push(EntryLine {
            account_code,
            account_type: line.account_type.clone(),
            description,
            debit: line.credit,
            credit: line.debit,
        });
    }

    let total_debit: Decimal = lines.iter().map(|l| l.debit).sum();
    let total_credit: Decimal = lines.iter().map(|l| l.credit).sum();
    if total_debit != total_credit {
        return Err(ReversalBuildError::Unbalanced {
            debit: total_debit,
            credit: total_credit,
        });
    }

    let metadata = EntryMetadata {
        accrual_month: Some(Bson::Int32(period.month as i32)),
        accrual_year: Some(Bson::Int32(period.year)),
        accrual_kind: original.metadata.accrual_kind.clone(),
        tenancy_id: Some(ctx.tenancy.id.clone()),
        student_id: ctx.identity.student_id.clone(),
        debtor_id: ctx.identity.debtor_id.clone(),
        original_entry_id: Some(original.id.clone()),
        original_transaction_id: Some(original.transaction_id.clone()),
        reason: Some(ctx.reason.to_string()),
        previous_end_date: ctx
            .previous_end_date
            .map(mongodb::bson::DateTime::from_chrono),
        corrected_end_date: Some(mongodb::bson::DateTime::from_chrono(start_of_day(
            ctx.corrected_end_date,
        ))),
        corrected_by: Some(ctx.actor.to_string()),
        ..Default::default()
    };

    Ok(LedgerEntry {
        id: Uuid::new_v4().to_string(),
        transaction_id: Uuid::new_v4().to_string(),
        date: Utc::now(),
        description: format!("Reversal: {}", original.description),
        source: EntrySource::RentalAccrualReversal,
        status: EntryStatus::Posted,
        debtor_ref: ctx
            .identity
            .debtor_id
            .clone()
            .or_else(|| Some(ctx.tenancy.id.clone())),
        reference: Some(original.id.clone()),
        total_debit,
        total_credit,
        entries: lines,
        metadata,
    })
}

pub struct ReversalWriter {
    db: MongoDb,
}

impl ReversalWriter {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }

    /// The id of an existing reversal referencing this accrual through any
    /// of its back-reference positions, if one exists.
    #[instrument(skip(self, original), fields(entry_id = %original.id))]
    pub async fn existing_reversal(
        &self,
        original: &LedgerEntry,
    ) -> Result<Option<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["existing_reversal"])
            .start_timer();

        let filter = doc! {
            "source": EntrySource::RentalAccrualReversal.as_str(),
            "$or": [
                { "metadata.original_entry_id": original.id.clone() },
                { "metadata.original_transaction_id": original.transaction_id.clone() },
                { "reference": { "$in": [original.id.clone(), original.transaction_id.clone()] } },
            ],
        };
        let existing = self
            .db
            .ledger_entries()
            .find_one(filter, None)
            .await
            .map_err(AppError::from)?;

        timer.observe_duration();
        Ok(existing.map(|e| e.id))
    }

    /// Persist one reversal inside the caller's transaction scope: the new
    /// entry, the advisory flag on the original, and the audit record.
    #[instrument(skip(self, session, reversal, original), fields(reversal_id = %reversal.id))]
    pub async fn persist(
        &self,
        session: &mut ClientSession,
        reversal: &LedgerEntry,
        original: &LedgerEntry,
    ) -> Result<(), AppError> {
        self.db
            .ledger_entries()
            .insert_one_with_session(reversal, None, session)
            .await
            .map_err(AppError::from)?;

        self.db
            .ledger_entries()
            .update_one_with_session(
                doc! { "_id": original.id.clone() },
                doc! { "$set": { "metadata.reversed": true } },
                None,
                session,
            )
            .await
            .map_err(AppError::from)?;

        let audit = AuditRecord::new(
            "accrual_reversed",
            "ledger_entry",
            &original.id,
            reversal
                .metadata
                .corrected_by
                .as_deref()
                .unwrap_or("system"),
        )
        .with_reason(reversal.metadata.reason.as_deref().unwrap_or(""))
        .with_before(doc! {
            "transaction_id": original.transaction_id.clone(),
            "total_debit": original.total_debit.to_string(),
            "total_credit": original.total_credit.to_string(),
        })
        .with_after(doc! {
            "reversal_entry_id": reversal.id.clone(),
            "reversal_transaction_id": reversal.transaction_id.clone(),
        });
        self.db
            .audit_log()
            .insert_one_with_session(&audit, None, session)
            .await
            .map_err(AppError::from)?;

        Ok(())
    }
}
