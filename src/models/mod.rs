//! Entity types and their `Storage`-mediated CRUD. Every row in the
//! datastore is owned exclusively by [`crate::storage::Storage`]; these
//! modules are the only code that issues raw `diesel` queries against the
//! corresponding table.

pub mod expiration_warning;
pub mod godpack;
pub mod gp_statistics;
pub mod heartbeat;
pub mod run;
pub mod subsystem;
pub mod system_event;
pub mod test_result;
pub mod worker;

pub use expiration_warning::ExpirationWarning;
pub use godpack::{GodPack, GpState, NewGodPack};
pub use gp_statistics::{GpStatistics, NewGpStatistics};
pub use heartbeat::{Heartbeat, NewHeartbeat};
pub use run::{NewRun, Run};
pub use subsystem::Subsystem;
pub use system_event::{NewSystemEvent, Severity, SystemEvent};
pub use test_result::{NewTestResult, TestKind, TestResult};
pub use worker::{Worker, WorkerStatus};
