// Отчёт о миграции
// Статус и фаза двигаются только вперёд

use crate::migration::assessment::{MigrationAssessment, MigrationStrategy};
use crate::utils::error::{CoreError, Result};
use crate::utils::time::now_rfc3339;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MigrationStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Assessment,
    Preparation,
    Migration,
    Verification,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub phase: MigrationPhase,
    pub current_step: u32,
    pub total_steps: u32,
    /// 0..=100
    pub progress: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl MigrationProgress {
    pub fn new(total_steps: u32) -> Self {
        Self {
            phase: MigrationPhase::Assessment,
            current_step: 0,
            total_steps: total_steps.max(1),
            progress: 0.0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Перейти в фазу не раньше текущей
    pub fn enter(&mut self, phase: MigrationPhase) -> Result<()> {
        if phase < self.phase {
            return Err(CoreError::InvalidState(format!(
                "Phase cannot go back from {:?} to {:?}",
                self.phase, phase
            )));
        }
        self.phase = phase;
        Ok(())
    }

    /// Выставить шаг; прогресс пересчитывается, если нет явного значения
    pub fn set_step(&mut self, step: u32, override_progress: Option<f64>) {
        self.current_step = step.min(self.total_steps);
        self.progress = match override_progress {
            Some(value) => value.clamp(0.0, 100.0),
            None => f64::from(self.current_step) * 100.0 / f64::from(self.total_steps),
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationErrorEntry {
    pub timestamp: String,
    pub kind: String,
    pub context: String,
    pub message: String,
}

impl MigrationErrorEntry {
    pub fn new(kind: impl Into<String>, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: now_rfc3339(),
            kind: kind.into(),
            context: context.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResults {
    pub conversations_migrated: usize,
    pub conversations_failed: usize,
    pub devices_upgraded: usize,
    pub devices_failed: usize,
    /// Размеры обработанных пачек (gradual)
    pub batches: Vec<usize>,
    pub errors: Vec<MigrationErrorEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub id: String,
    pub status: MigrationStatus,
    pub strategy: MigrationStrategy,
    pub progress: MigrationProgress,
    pub assessment: MigrationAssessment,
    pub results: MigrationResults,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl MigrationReport {
    pub fn new(id: String, strategy: MigrationStrategy, assessment: MigrationAssessment) -> Self {
        Self {
            id,
            status: MigrationStatus::InProgress,
            strategy,
            progress: MigrationProgress::new(strategy.total_steps()),
            assessment,
            results: MigrationResults::default(),
            started_at: now_rfc3339(),
            completed_at: None,
        }
    }

    fn finish(&mut self, status: MigrationStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "Migration {} is already {:?}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.completed_at = Some(now_rfc3339());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.finish(MigrationStatus::Completed)?;
        self.progress.phase = MigrationPhase::Completed;
        let total = self.progress.total_steps;
        self.progress.set_step(total, None);
        Ok(())
    }

    pub fn fail(&mut self, error: &CoreError) -> Result<()> {
        self.finish(MigrationStatus::Failed)?;
        self.progress.phase = MigrationPhase::Failed;
        self.progress.errors.push(error.to_string());
        self.results
            .errors
            .push(MigrationErrorEntry::new(error.kind(), "migration", error.to_string()));
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str) -> Result<()> {
        self.finish(MigrationStatus::Cancelled)?;
        self.progress.errors.push(format!("Cancelled: {}", reason));
        self.results
            .errors
            .push(MigrationErrorEntry::new("cancelled", "migration", reason));
        Ok(())
    }

    /// Первая фатальная ошибка, если есть
    pub fn first_error(&self) -> Option<&str> {
        self.progress.errors.first().map(String::as_str)
    }
}
