pub mod audit;
pub mod debtor;
pub mod ledger;
pub mod period;
pub mod room;
pub mod student;
pub mod tenancy;

pub use audit::AuditRecord;
pub use debtor::{Debtor, DebtorStatus};
pub use ledger::{EntryLine, EntryMetadata, EntrySource, EntryStatus, LedgerEntry};
pub use period::{AccrualPeriod, PeriodError};
pub use room::{Room, RoomStatus};
pub use student::Student;
pub use tenancy::{Tenancy, TenancyStatus};
