mod audit;
mod corrections;
mod health;

pub use audit::scan_accruals;
pub use corrections::correct_tenancy;
pub use health::{health_check, metrics_handler, readiness_check};
