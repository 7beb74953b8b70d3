//! `entrada-infra` — infrastructure for the certification pipeline: the
//! in-memory store, audit recording, retry scheduling, the certification
//! state machine, and the expiry sweeper.

pub mod audit;
pub mod engine;
pub mod retry;
pub mod store;
pub mod sweeper;

pub use audit::{AuditRecorder, AuditSink, AuditSinkError, InMemoryAuditSink, TracingAuditSink};
pub use engine::{CertificationEngine, CertificationError, ReconcileOutcome, SubmissionOutcome};
pub use retry::{InMemoryRetryQueue, RetryPolicy, RetryQueue, ScheduledRetry};
pub use store::InMemoryFelStore;
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig, SweeperHandle};
