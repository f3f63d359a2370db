//! Integration tests for single-tenancy corrections.

mod common;

use accrual_service::models::{
    Debtor, DebtorStatus, EntryLine, EntryMetadata, EntrySource, EntryStatus, LedgerEntry, Room,
    RoomStatus, Student, Tenancy, TenancyStatus,
};
use chrono::{DateTime, Utc};
use common::{try_spawn_app, TestApp};
use mongodb::bson::{doc, Bson};
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn parse(s: &str) -> DateTime<Utc> {
    format!("{}T00:00:00Z", s).parse().unwrap()
}

fn rent() -> Decimal {
    "450.00".parse().unwrap()
}

fn tenancy(id: &str, start: &str, end: &str, status: TenancyStatus) -> Tenancy {
    let now = Utc::now();
    Tenancy {
        id: id.into(),
        student_id: Some("stu-1".into()),
        debtor_id: Some("deb-1".into()),
        room_id: Some("room-1".into()),
        start_date: parse(start),
        end_date: Some(mongodb::bson::DateTime::from_chrono(parse(end))),
        status,
        expiry_reason: None,
        created_at: now,
        updated_at: now,
    }
}

fn accrual(id: &str, tenancy_id: &str, month: u32, year: i32, kind: &str) -> LedgerEntry {
    LedgerEntry {
        id: id.into(),
        transaction_id: format!("tx-{}", id),
        date: parse(&format!("{:04}-{:02}-01", year, month)),
        description: match kind {
            "lease_start" => "Lease start proration".to_string(),
            _ => format!("Monthly rent {:04}-{:02}", year, month),
        },
        source: EntrySource::RentalAccrual,
        status: EntryStatus::Posted,
        debtor_ref: Some(tenancy_id.to_string()),
        reference: None,
        total_debit: rent(),
        total_credit: rent(),
        entries: vec![
            EntryLine {
                account_code: format!("1100-{}", tenancy_id),
                account_type: "asset".into(),
                description: "Accounts receivable".into(),
                debit: rent(),
                credit: Decimal::ZERO,
            },
            EntryLine {
                account_code: "4000".into(),
                account_type: "revenue".into(),
                description: "Rental income".into(),
                debit: Decimal::ZERO,
                credit: rent(),
            },
        ],
        metadata: EntryMetadata {
            accrual_month: Some(Bson::Int32(month as i32)),
            accrual_year: Some(Bson::Int32(year)),
            accrual_kind: Some(kind.to_string()),
            tenancy_id: Some(tenancy_id.to_string()),
            ..Default::default()
        },
    }
}

/// Approved Jan-Jun lease with a lease-start posting and six monthly
/// accruals, plus the student, debtor and a fully occupied single room.
async fn seed_standard_lease(app: &TestApp) {
    app.db
        .students()
        .insert_one(
            &Student {
                id: "stu-1".into(),
                first_name: "Jo".into(),
                last_name: "Bloggs".into(),
                email: Some("jo@example.org".into()),
            },
            None,
        )
        .await
        .unwrap();
    app.db
        .debtors()
        .insert_one(
            &Debtor {
                id: "deb-1".into(),
                student_id: Some("stu-1".into()),
                name: "Jo Bloggs".into(),
                account_code: Some("DEB0042".into()),
                status: DebtorStatus::Active,
            },
            None,
        )
        .await
        .unwrap();
    app.db
        .rooms()
        .insert_one(
            &Room {
                id: "room-1".into(),
                residence_id: Some("res-1".into()),
                capacity: 1,
                occupied: 1,
                status: RoomStatus::Occupied,
            },
            None,
        )
        .await
        .unwrap();
    app.db
        .tenancies()
        .insert_one(
            &tenancy("t1", "2025-01-01", "2025-06-30", TenancyStatus::Approved),
            None,
        )
        .await
        .unwrap();

    let mut entries = vec![accrual("ls", "t1", 1, 2025, "lease_start")];
    for month in 1..=6 {
        entries.push(accrual(&format!("m{}", month), "t1", month, 2025, "monthly"));
    }
    for entry in &entries {
        app.db.ledger_entries().insert_one(entry, None).await.unwrap();
    }
}

async fn post_correction(app: &TestApp, tenancy_id: &str, end: &str) -> reqwest::Response {
    app.client
        .post(format!("{}/tenancies/{}/corrections", app.address, tenancy_id))
        .json(&json!({
            "actual_end_date": end,
            "reason": "Lease terminated early",
            "corrected_by": "admin@example.org",
        }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn correcting_unknown_tenancy_returns_not_found() {
    let Some(app) = try_spawn_app().await else {
        return;
    };

    let response = post_correction(&app, "no-such-tenancy", "2025-03-15").await;
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn missing_reason_is_rejected() {
    let Some(app) = try_spawn_app().await else {
        return;
    };

    let response = app
        .client
        .post(format!("{}/tenancies/t1/corrections", app.address))
        .json(&json!({ "actual_end_date": "2025-03-15", "reason": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
async fn correction_reverses_only_months_after_actual_end() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed_standard_lease(&app).await;

    let response = post_correction(&app, "t1", "2025-03-15").await;
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();

    let reversals = outcome["reversals"].as_array().unwrap();
    assert_eq!(reversals.len(), 3);
    let mut months: Vec<i64> = reversals
        .iter()
        .map(|r| r["period"]["month"].as_i64().unwrap())
        .collect();
    months.sort();
    assert_eq!(months, vec![4, 5, 6]);
    assert_eq!(outcome["nothing_to_correct"], json!(false));
    assert_eq!(outcome["side_effects"]["tenancy_expired"], json!(true));
    assert_eq!(outcome["side_effects"]["debtor_expired"], json!(true));
    assert_eq!(outcome["side_effects"]["room_released"], json!(true));

    // The ledger now holds the originals plus exactly three reversals,
    // each balanced and pointed at the debtor's canonical account code.
    let reversal_count = app
        .db
        .ledger_entries()
        .count_documents(doc! { "source": "rental_accrual_reversal" }, None)
        .await
        .unwrap();
    assert_eq!(reversal_count, 3);

    let mut cursor = app
        .db
        .ledger_entries()
        .find(doc! { "source": "rental_accrual_reversal" }, None)
        .await
        .unwrap();
    use futures::stream::TryStreamExt;
    while let Some(entry) = cursor.try_next().await.unwrap() {
        assert!(entry.is_balanced());
        assert_eq!(entry.total_debit, entry.total_credit);
        assert!(entry
            .entries
            .iter()
            .any(|l| l.account_code == "DEB0042" && l.credit == rent()));
    }

    // Cascade: tenancy expired with the corrected date, debtor expired,
    // room occupancy released.
    let t1 = app
        .db
        .tenancies()
        .find_one(doc! { "_id": "t1" }, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(t1.status, TenancyStatus::Expired);
    assert_eq!(
        t1.end_date_naive().unwrap().to_string(),
        "2025-03-15".to_string()
    );

    let debtor = app
        .db
        .debtors()
        .find_one(doc! { "_id": "deb-1" }, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(debtor.status, DebtorStatus::Expired);

    let room = app
        .db
        .rooms()
        .find_one(doc! { "_id": "room-1" }, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(room.occupied, 0);
    assert_eq!(room.status, RoomStatus::Available);

    app.cleanup().await;
}

#[tokio::test]
async fn correction_is_idempotent() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed_standard_lease(&app).await;

    let first: Value = post_correction(&app, "t1", "2025-03-15")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["reversals"].as_array().unwrap().len(), 3);

    let second: Value = post_correction(&app, "t1", "2025-03-15")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["reversals"].as_array().unwrap().len(), 0);
    assert_eq!(second["skipped"].as_array().unwrap().len(), 3);

    let reversal_count = app
        .db
        .ledger_entries()
        .count_documents(doc! { "source": "rental_accrual_reversal" }, None)
        .await
        .unwrap();
    assert_eq!(reversal_count, 3);

    app.cleanup().await;
}

#[tokio::test]
async fn renewal_months_are_never_reversed() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed_standard_lease(&app).await;

    // The student renewed for Jul-Dec; its July accrual shares the same
    // student identifiers but must survive the correction of t1.
    let mut renewal = tenancy("t2", "2025-07-01", "2025-12-31", TenancyStatus::Approved);
    renewal.debtor_id = Some("deb-1".into());
    app.db.tenancies().insert_one(&renewal, None).await.unwrap();
    // Tagged the way one posting-path generation did it: the student id in
    // the entry-level correlation slot, so t1's matcher picks it up too.
    let mut july = accrual("m7", "t2", 7, 2025, "monthly");
    july.debtor_ref = Some("stu-1".into());
    july.metadata.student_id = Some("stu-1".into());
    app.db.ledger_entries().insert_one(&july, None).await.unwrap();

    let outcome: Value = post_correction(&app, "t1", "2025-03-15")
        .await
        .json()
        .await
        .unwrap();
    let reversed_ids: Vec<&str> = outcome["reversals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["original_entry_id"].as_str().unwrap())
        .collect();
    assert_eq!(reversed_ids.len(), 3);
    assert!(!reversed_ids.contains(&"m7"));

    let july_reversals = app
        .db
        .ledger_entries()
        .count_documents(doc! { "metadata.original_entry_id": "m7" }, None)
        .await
        .unwrap();
    assert_eq!(july_reversals, 0);

    app.cleanup().await;
}

#[tokio::test]
async fn cancel_before_start_reverses_the_lease_start_posting() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed_standard_lease(&app).await;

    // The lease never effectively began: every accrual goes, including the
    // lease-start proration.
    let outcome: Value = post_correction(&app, "t1", "2024-12-15")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["reversals"].as_array().unwrap().len(), 7);

    let ls_reversals = app
        .db
        .ledger_entries()
        .count_documents(doc! { "metadata.original_entry_id": "ls" }, None)
        .await
        .unwrap();
    assert_eq!(ls_reversals, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn accrual_tagged_only_by_raw_account_code_is_still_found() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed_standard_lease(&app).await;

    // Oldest tagging scheme: no correlation fields at all, the raw tenancy
    // id written straight into the account-code position.
    let mut legacy = accrual("legacy", "t1", 5, 2025, "monthly");
    legacy.debtor_ref = None;
    legacy.metadata = EntryMetadata {
        accrual_month: Some(Bson::Int32(5)),
        accrual_year: Some(Bson::Int32(2025)),
        accrual_kind: Some("monthly".into()),
        ..Default::default()
    };
    legacy.entries[0].account_code = "t1".into();
    // Remove the normally-tagged entries so the primary tiers come back
    // empty and the matcher has to widen.
    app.db
        .ledger_entries()
        .delete_many(doc! { "_id": { "$ne": "keep-nothing" } }, None)
        .await
        .unwrap();
    app.db
        .ledger_entries()
        .insert_one(&legacy, None)
        .await
        .unwrap();

    let outcome: Value = post_correction(&app, "t1", "2025-03-15")
        .await
        .json()
        .await
        .unwrap();
    let reversals = outcome["reversals"].as_array().unwrap();
    assert_eq!(reversals.len(), 1);
    assert_eq!(reversals[0]["original_entry_id"], json!("legacy"));

    app.cleanup().await;
}
