// Миграция с RSA на постквантовые алгоритмы

pub mod assessment;
pub mod backend;
pub mod orchestrator;
pub mod report;

pub use assessment::{MigrationAssessment, MigrationStrategy, RiskLevel, Severity};
pub use backend::{ChatBackend, ConversationSummary, DeviceInfo, DeviceRecord, QuantumSettings};
pub use orchestrator::{MigrationHandle, MigrationOrchestrator, MigrationRegistry, MigrationSettings};
pub use report::{MigrationPhase, MigrationProgress, MigrationReport, MigrationStatus};
