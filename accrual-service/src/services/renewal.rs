//! Renewal overlap detection.
//!
//! A month after a tenancy's corrected end date is not automatically an
//! error: the same student may hold a later, still-valid tenancy (a
//! renewal) whose accruals were generated correctly. Months the renewal's
//! own interval covers must not be reversed.

use crate::models::{AccrualPeriod, Tenancy};
use crate::services::database::MongoDb;
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use futures::stream::TryStreamExt;
use mongodb::bson::doc;
use service_core::error::AppError;
use tracing::instrument;

pub struct RenewalDetector {
    db: MongoDb,
}

impl RenewalDetector {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }

    /// The earliest-starting approved or pending tenancy for the same
    /// student that succeeds the expiring one, if any.
    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn find_renewal(
        &self,
        student_id: &str,
        expiring_tenancy_id: &str,
        end_date: NaiveDate,
    ) -> Result<Option<Tenancy>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_renewal"])
            .start_timer();

        let filter = doc! {
            "student_id": student_id,
            "_id": { "$ne": expiring_tenancy_id },
            "status": { "$in": ["approved", "pending"] },
        };
        let mut cursor = self
            .db
            .tenancies()
            .find(filter, None)
            .await
            .map_err(AppError::from)?;
        let mut candidates = Vec::new();
        while let Some(tenancy) = cursor.try_next().await.map_err(AppError::from)? {
            candidates.push(tenancy);
        }

        timer.observe_duration();
        Ok(pick_renewal(candidates, end_date))
    }
}

/// Select the authoritative renewal among candidate tenancies.
pub fn pick_renewal(candidates: Vec<Tenancy>, end_date: NaiveDate) -> Option<Tenancy> {
    let mut renewals: Vec<Tenancy> = candidates
        .into_iter()
        .filter(|t| is_renewal_of(t, end_date))
        .collect();
    renewals.sort_by_key(|t| t.start_date);
    renewals.into_iter().next()
}

/// A candidate renews an expiring tenancy when it starts on or after the
/// month following expiry, or when it started before expiry but runs past
/// it (an open-ended candidate always runs past).
pub fn is_renewal_of(candidate: &Tenancy, end_date: NaiveDate) -> bool {
    let start = candidate.start_date_naive();
    if start >= AccrualPeriod::following(end_date).first_day() {
        return true;
    }
    match candidate.end_date_naive() {
        Some(end) => start <= end_date && end > end_date,
        None => start <= end_date,
    }
}

/// An accrual month is covered iff its first day falls inside the
/// renewal's own interval.
pub fn covers(renewal: &Tenancy, period: AccrualPeriod) -> bool {
    let day = period.first_day();
    let start = renewal.start_date_naive();
    match renewal.end_date_naive() {
        Some(end) => day >= start && day <= end,
        None => day >= start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TenancyStatus;
    use chrono::{DateTime, Utc};

    fn tenancy(id: &str, start: &str, end: Option<&str>) -> Tenancy {
        let parse = |s: &str| {
            format!("{}T00:00:00Z", s)
                .parse::<DateTime<Utc>>()
                .unwrap()
        };
        let now = Utc::now();
        Tenancy {
            id: id.into(),
            student_id: Some("stu-1".into()),
            debtor_id: None,
            room_id: None,
            start_date: parse(start),
            end_date: end.map(|s| mongodb::bson::DateTime::from_chrono(parse(s))),
            status: TenancyStatus::Approved,
            expiry_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn successor_starting_after_expiry_month_is_a_renewal() {
        let b = tenancy("b", "2025-07-01", Some("2025-12-31"));
        assert!(is_renewal_of(&b, date("2025-03-15")));
    }

    #[test]
    fn overlapping_tenancy_running_past_expiry_is_a_renewal() {
        let b = tenancy("b", "2025-02-01", Some("2025-12-31"));
        assert!(is_renewal_of(&b, date("2025-03-15")));
    }

    #[test]
    fn tenancy_ending_before_expiry_is_not_a_renewal() {
        let b = tenancy("b", "2024-09-01", Some("2025-02-28"));
        assert!(!is_renewal_of(&b, date("2025-03-15")));
    }

    #[test]
    fn renewal_interval_is_authoritative_for_coverage() {
        // Tenancy A ran Jan-Jun and is being cut back to mid March. The
        // student renewed for Jul-Dec: July onward is legitimate, the gap
        // months April-June are not.
        let b = tenancy("b", "2025-07-01", Some("2025-12-31"));
        let end = date("2025-03-15");
        assert!(is_renewal_of(&b, end));

        for month in 4..=6 {
            assert!(!covers(&b, AccrualPeriod::new(2025, month).unwrap()));
        }
        for month in 7..=12 {
            assert!(covers(&b, AccrualPeriod::new(2025, month).unwrap()));
        }
        assert!(!covers(&b, AccrualPeriod::new(2026, 1).unwrap()));
    }

    #[test]
    fn open_ended_renewal_covers_everything_from_its_start() {
        let b = tenancy("b", "2025-07-01", None);
        assert!(covers(&b, AccrualPeriod::new(2027, 3).unwrap()));
        assert!(!covers(&b, AccrualPeriod::new(2025, 6).unwrap()));
    }

    #[test]
    fn earliest_starting_renewal_wins() {
        let b = tenancy("b", "2025-09-01", Some("2025-12-31"));
        let c = tenancy("c", "2025-07-01", Some("2025-08-31"));
        let picked = pick_renewal(vec![b, c], date("2025-03-15")).unwrap();
        assert_eq!(picked.id, "c");
    }
}
