pub mod audit;
pub mod lifecycle;
pub mod metrics;
pub mod security;
pub mod sweeper;
pub mod tracker;

pub use audit::{AuditContext, AuditRecorder};
pub use lifecycle::{LifecycleManager, NewTransaction, ReportedFigures, UpdateOutcome};
pub use security::{ActionType, Admission, DenialReason, IdentifierType, SecurityGate};
pub use sweeper::{ExpirationSweeper, SweepSummary};
pub use tracker::StatusTracker;
