//! Lease-end side effects: end-date update and the expiry cascade.
//!
//! The tenancy and debtor transitions ride in the correction's transaction
//! scope; the room occupancy decrement runs after commit and is best
//! effort. Ledger correctness never depends on the room bookkeeping.

use crate::models::period::start_of_day;
use crate::models::{AuditRecord, RoomStatus, Tenancy};
use crate::services::database::MongoDb;
use chrono::{NaiveDate, Utc};
use mongodb::bson::doc;
use mongodb::ClientSession;
use service_core::error::AppError;
use tracing::instrument;

/// What the cascade actually managed to do, step by step.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SideEffectReport {
    pub end_date_updated: bool,
    pub tenancy_expired: bool,
    pub debtor_expired: bool,
    pub room_released: bool,
    pub errors: Vec<String>,
}

pub struct LeaseEndApplier {
    db: MongoDb,
}

impl LeaseEndApplier {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }

    /// Transactional part of the cascade: set the corrected end date, and
    /// when it is already in the past, expire the tenancy and its debtor.
    /// Returns whether the tenancy transitioned to expired.
    #[instrument(skip(self, session, tenancy), fields(tenancy_id = %tenancy.id))]
    pub async fn apply_end_date(
        &self,
        session: &mut ClientSession,
        tenancy: &Tenancy,
        debtor_id: Option<&str>,
        new_end: NaiveDate,
        reason: &str,
        actor: &str,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        let new_end_at = start_of_day(new_end);
        let expires_now = new_end_at <= now;

        let mut set = doc! {
            "end_date": mongodb::bson::DateTime::from_chrono(new_end_at),
            "updated_at": mongodb::bson::DateTime::from_chrono(now),
        };
        if expires_now {
            set.insert("status", "expired");
            set.insert("expiry_reason", reason);
        }
        self.db
            .tenancies()
            .update_one_with_session(doc! { "_id": tenancy.id.clone() }, doc! { "$set": set }, None, session)
            .await
            .map_err(AppError::from)?;

        if expires_now {
            if let Some(debtor_id) = debtor_id {
                self.db
                    .debtors()
                    .update_one_with_session(
                        doc! { "_id": debtor_id },
                        doc! { "$set": { "status": "expired" } },
                        None,
                        session,
                    )
                    .await
                    .map_err(AppError::from)?;
                let debtor_audit =
                    AuditRecord::new("debtor_expired", "debtor", debtor_id, actor)
                        .with_reason(reason)
                        .with_after(doc! { "status": "expired" });
                self.db
                    .audit_log()
                    .insert_one_with_session(&debtor_audit, None, session)
                    .await
                    .map_err(AppError::from)?;
                tracing::info!(debtor_id = %debtor_id, "Debtor marked expired");
            }
        }

        let audit = AuditRecord::new("tenancy_end_date_corrected", "tenancy", &tenancy.id, actor)
            .with_reason(reason)
            .with_before(doc! {
                "end_date": tenancy.end_date,
                "status": tenancy.status.as_str(),
            })
            .with_after(doc! {
                "end_date": mongodb::bson::DateTime::from_chrono(new_end_at),
                "status": if expires_now { "expired" } else { tenancy.status.as_str() },
            });
        self.db
            .audit_log()
            .insert_one_with_session(&audit, None, session)
            .await
            .map_err(AppError::from)?;

        tracing::info!(
            tenancy_id = %tenancy.id,
            new_end = %new_end,
            expired = expires_now,
            "Tenancy end date corrected"
        );

        Ok(expires_now)
    }

    /// Post-commit: give the vacated place back to the room and recompute
    /// its status. Occupancy is clamped at zero; missing rooms are logged
    /// and swallowed.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub async fn release_room(&self, room_id: &str) -> Result<(), AppError> {
        let room = self
            .db
            .rooms()
            .find_one(doc! { "_id": room_id }, None)
            .await
            .map_err(AppError::from)?;

        let Some(room) = room else {
            tracing::warn!(room_id = %room_id, "Room not found during occupancy release");
            return Ok(());
        };

        let occupied = (room.occupied - 1).max(0);
        let status = RoomStatus::for_occupancy(occupied, room.capacity);
        self.db
            .rooms()
            .update_one(
                doc! { "_id": room_id },
                doc! { "$set": { "occupied": occupied, "status": status.as_str() } },
                None,
            )
            .await
            .map_err(AppError::from)?;

        tracing::info!(
            room_id = %room_id,
            occupied = occupied,
            status = status.as_str(),
            "Room occupancy released"
        );
        Ok(())
    }
}
