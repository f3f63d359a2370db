//! Common test utilities for accrual-service integration tests.
//!
//! These tests need a real MongoDB with replica-set transactions enabled
//! (a single-node replica set is enough). Set `TEST_MONGODB_URI` to run
//! them; without it every integration test skips with a notice, so the
//! unit suite stays green on machines without the infrastructure.

use accrual_service::config::{AccrualConfig, AuditConfig, MongoConfig};
use accrual_service::services::MongoDb;
use accrual_service::startup::Application;
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,accrual_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[allow(dead_code)]
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub db: MongoDb,
    pub db_name: String,
}

/// Spawn a test application against a throwaway database, or `None` when
/// `TEST_MONGODB_URI` is not set.
pub async fn try_spawn_app() -> Option<TestApp> {
    init_tracing();

    let Ok(uri) = std::env::var("TEST_MONGODB_URI") else {
        eprintln!("skipping integration test: TEST_MONGODB_URI not set");
        return None;
    };

    let db_name = format!("accrual_test_{}", Uuid::new_v4().simple());
    let config = AccrualConfig {
        common: CommonConfig { port: 0 },
        service_name: "accrual-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        mongodb: MongoConfig {
            uri,
            database: db_name.clone(),
        },
        audit: AuditConfig { verbose_log_cap: 5 },
    };

    let app = Application::build(config)
        .await
        .expect("Failed to build test application");
    let port = app.port();
    let db = app.db().clone();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = reqwest::Client::new();
    let address = format!("http://127.0.0.1:{}", port);
    let health_url = format!("{}/health", address);
    for _ in 0..50 {
        if client.get(&health_url).send().await.is_ok() {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }

    Some(TestApp {
        address,
        client,
        db,
        db_name,
    })
}

impl TestApp {
    /// Drop the throwaway database.
    pub async fn cleanup(&self) {
        let _ = self
            .db
            .client()
            .database(&self.db_name)
            .drop(None)
            .await;
    }
}
