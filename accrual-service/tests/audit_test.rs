//! Integration tests for the bulk accrual audit.

mod common;

use accrual_service::models::{
    Debtor, DebtorStatus, EntryLine, EntryMetadata, EntrySource, EntryStatus, LedgerEntry,
    Student, Tenancy, TenancyStatus,
};
use chrono::{DateTime, Utc};
use common::{try_spawn_app, TestApp};
use mongodb::bson::Bson;
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn parse(s: &str) -> DateTime<Utc> {
    format!("{}T00:00:00Z", s).parse().unwrap()
}

fn rent() -> Decimal {
    "450.00".parse().unwrap()
}

fn tenancy(id: &str, student: &str, start: &str, end: &str, status: TenancyStatus) -> Tenancy {
    let now = Utc::now();
    Tenancy {
        id: id.into(),
        student_id: Some(student.into()),
        debtor_id: None,
        room_id: None,
        start_date: parse(start),
        end_date: Some(mongodb::bson::DateTime::from_chrono(parse(end))),
        status,
        expiry_reason: None,
        created_at: now,
        updated_at: now,
    }
}

fn accrual(id: &str, tenancy_id: &str, month: u32, year: i32) -> LedgerEntry {
    LedgerEntry {
        id: id.into(),
        transaction_id: format!("tx-{}", id),
        date: parse(&format!("{:04}-{:02}-01", year, month)),
        description: format!("Monthly rent {:04}-{:02}", year, month),
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
            accrual_kind: Some("monthly".into()),
            tenancy_id: Some(tenancy_id.to_string()),
            ..Default::default()
        },
    }
}

/// One expired-early lease (t1, ended March, accrued through June) plus an
/// unrelated healthy lease (t9) that must never be flagged.
async fn seed(app: &TestApp) {
    for (id, first) in [("stu-1", "Jo"), ("stu-9", "Sam")] {
        app.db
            .students()
            .insert_one(
                &Student {
                    id: id.into(),
                    first_name: first.into(),
                    last_name: "Bloggs".into(),
                    email: None,
                },
                None,
            )
            .await
            .unwrap();
    }
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
        .tenancies()
        .insert_one(
            &tenancy("t1", "stu-1", "2025-01-01", "2025-03-15", TenancyStatus::Expired),
            None,
        )
        .await
        .unwrap();
    app.db
        .tenancies()
        .insert_one(
            &tenancy("t9", "stu-9", "2025-01-01", "2025-12-31", TenancyStatus::Approved),
            None,
        )
        .await
        .unwrap();

    for month in 1..=6 {
        app.db
            .ledger_entries()
            .insert_one(&accrual(&format!("t1-m{}", month), "t1", month, 2025), None)
            .await
            .unwrap();
    }
    for month in 1..=6 {
        app.db
            .ledger_entries()
            .insert_one(&accrual(&format!("t9-m{}", month), "t9", month, 2025), None)
            .await
            .unwrap();
    }
}

async fn scan(app: &TestApp, query: &str) -> reqwest::Response {
    app.client
        .get(format!("{}/audit/accruals{}", app.address, query))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn audit_flags_unreversed_post_end_accruals() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed(&app).await;

    let report: Value = scan(&app, "?month=12&year=2025").await.json().await.unwrap();

    assert_eq!(report["tenancies_scanned"].as_i64().unwrap(), 2);
    let flagged = report["flagged"].as_array().unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0]["tenancy_id"], json!("t1"));

    let mut months: Vec<i64> = flagged[0]["accruals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["period"]["month"].as_i64().unwrap())
        .collect();
    months.sort();
    assert_eq!(months, vec![4, 5, 6]);

    app.cleanup().await;
}

#[tokio::test]
async fn audit_target_month_bounds_the_scan() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed(&app).await;

    let report: Value = scan(&app, "?month=4&year=2025").await.json().await.unwrap();
    let flagged = report["flagged"].as_array().unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0]["accruals"].as_array().unwrap().len(), 1);
    assert_eq!(
        flagged[0]["accruals"][0]["period"],
        json!({ "year": 2025, "month": 4 })
    );

    app.cleanup().await;
}

#[tokio::test]
async fn audit_month_without_year_is_rejected() {
    let Some(app) = try_spawn_app().await else {
        return;
    };

    let response = scan(&app, "?month=4").await;
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
async fn audit_findings_match_what_a_correction_reverses() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed(&app).await;

    let report: Value = scan(&app, "?month=12&year=2025").await.json().await.unwrap();
    let mut audit_ids: Vec<String> = report["flagged"][0]["accruals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["entry_id"].as_str().unwrap().to_string())
        .collect();
    audit_ids.sort();

    let outcome: Value = app
        .client
        .post(format!("{}/tenancies/t1/corrections", app.address))
        .json(&json!({
            "actual_end_date": "2025-03-15",
            "reason": "Audit follow-up",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let mut corrected_ids: Vec<String> = outcome["reversals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["original_entry_id"].as_str().unwrap().to_string())
        .collect();
    corrected_ids.sort();

    assert_eq!(audit_ids, corrected_ids);

    // The next scan sees the reversals and comes back clean.
    let after: Value = scan(&app, "?month=12&year=2025").await.json().await.unwrap();
    assert_eq!(after["flagged"].as_array().unwrap().len(), 0);

    app.cleanup().await;
}

#[tokio::test]
async fn reversals_are_never_reversal_candidates() {
    let Some(app) = try_spawn_app().await else {
        return;
    };
    seed(&app).await;

    // Correct once, then audit: the reversal entries themselves must not
    // surface as incorrect accruals.
    app.client
        .post(format!("{}/tenancies/t1/corrections", app.address))
        .json(&json!({
            "actual_end_date": "2025-03-15",
            "reason": "Initial correction",
        }))
        .send()
        .await
        .unwrap();

    let report: Value = scan(&app, "?month=12&year=2025").await.json().await.unwrap();
    assert_eq!(report["flagged"].as_array().unwrap().len(), 0);
    assert!(report["reversals_scanned"].as_i64().unwrap() >= 3);

    app.cleanup().await;
}
