//! MongoDB access for accrual-service.

use crate::models::{AuditRecord, Debtor, LedgerEntry, Room, Student, Tenancy};
use mongodb::{
    bson::doc, options::IndexOptions, Client as MongoClient, ClientSession, Collection, Database,
    IndexModel,
};
use service_core::error::AppError;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    /// Indexes backing the correlation queries. The ledger is searched by
    /// entry-level ref, by metadata ids and by per-line account code, so
    /// each position gets its own index alongside the source discriminator.
    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for accrual-service");

        let ledger = self.ledger_entries();
        let ledger_indexes = [
            (doc! { "source": 1, "debtor_ref": 1 }, "source_debtor_ref"),
            (
                doc! { "source": 1, "metadata.tenancy_id": 1 },
                "source_meta_tenancy",
            ),
            (
                doc! { "source": 1, "metadata.application_ref": 1 },
                "source_meta_application_ref",
            ),
            (
                doc! { "source": 1, "entries.account_code": 1 },
                "source_line_account_code",
            ),
            (
                doc! { "metadata.original_entry_id": 1 },
                "meta_original_entry",
            ),
            (doc! { "reference": 1 }, "reference_lookup"),
        ];
        for (keys, name) in ledger_indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(name.to_string()).build())
                .build();
            ledger.create_index(model, None).await.map_err(|e| {
                tracing::error!("Failed to create index {} on ledger_entries: {}", name, e);
                AppError::from(e)
            })?;
        }
        tracing::info!("Created ledger_entries correlation indexes");

        let tenancy_index = IndexModel::builder()
            .keys(doc! { "student_id": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("student_status_lookup".to_string())
                    .build(),
            )
            .build();
        self.tenancies()
            .create_index(tenancy_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create index on tenancies: {}", e);
                AppError::from(e)
            })?;

        let debtor_index = IndexModel::builder()
            .keys(doc! { "student_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("student_lookup".to_string())
                    .build(),
            )
            .build();
        self.debtors()
            .create_index(debtor_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create index on debtors: {}", e);
                AppError::from(e)
            })?;

        tracing::info!("MongoDB indexes ready");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    /// Session for the correction's commit-or-abort scope.
    pub async fn start_session(&self) -> Result<ClientSession, AppError> {
        self.client.start_session(None).await.map_err(AppError::from)
    }

    pub fn tenancies(&self) -> Collection<Tenancy> {
        self.db.collection("tenancies")
    }

    pub fn students(&self) -> Collection<Student> {
        self.db.collection("students")
    }

    pub fn debtors(&self) -> Collection<Debtor> {
        self.db.collection("debtors")
    }

    pub fn rooms(&self) -> Collection<Room> {
        self.db.collection("rooms")
    }

    pub fn ledger_entries(&self) -> Collection<LedgerEntry> {
        self.db.collection("ledger_entries")
    }

    pub fn audit_log(&self) -> Collection<AuditRecord> {
        self.db.collection("audit_log")
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
