pub mod audit;
pub mod correction;
pub mod database;
pub mod identity;
pub mod lease;
pub mod matcher;
pub mod metrics;
pub mod renewal;
pub mod reversal;

pub use audit::{AuditReport, BulkAuditor};
pub use correction::{CorrectionEngine, CorrectionOutcome};
pub use database::MongoDb;
pub use identity::IdentitySet;
pub use matcher::AccrualMatcher;
pub use metrics::{get_metrics, init_metrics};
