mod corrections;

pub use corrections::{AuditScanParams, CorrectionRequest};
