// Оценка готовности парка устройств к миграции

use crate::migration::backend::DeviceRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStrategy {
    /// Все беседы сразу, последовательно, на сильнейший квантовый алгоритм
    Immediate,
    /// Пачками с паузой
    Gradual,
    /// На hybrid RSA + ML-KEM
    Hybrid,
    /// Без перешифрования, только подготовка устройств
    Delayed,
}

impl MigrationStrategy {
    pub fn total_steps(&self) -> u32 {
        match self {
            MigrationStrategy::Immediate => 4,
            MigrationStrategy::Gradual => 6,
            MigrationStrategy::Hybrid => 5,
            MigrationStrategy::Delayed => 4,
        }
    }

    /// Рекомендация по доле готовых устройств
    pub fn recommend(readiness_ratio: f64) -> Self {
        if readiness_ratio >= 1.0 {
            MigrationStrategy::Immediate
        } else if readiness_ratio > 0.7 {
            MigrationStrategy::Gradual
        } else if readiness_ratio > 0.3 {
            MigrationStrategy::Hybrid
        } else {
            MigrationStrategy::Delayed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityIssue {
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    pub affected_devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationAssessment {
    pub total_conversations: usize,
    pub total_devices: usize,
    pub quantum_ready_devices: usize,
    /// 0.0..=1.0; пустой парк считается полностью готовым
    pub readiness_ratio: f64,
    pub compatibility_issues: Vec<CompatibilityIssue>,
    pub risk_level: RiskLevel,
    pub strategy: MigrationStrategy,
    pub estimated_duration_minutes: f64,
}

impl MigrationAssessment {
    /// Чистая оценка по инвентарю
    pub fn evaluate(total_conversations: usize, devices: &[DeviceRecord]) -> Self {
        Self::evaluate_fleet(total_conversations, devices, &[])
    }

    /// Оценка с устройствами, не прошедшими валидацию (`rejected`).
    /// Такие устройства считаются legacy.
    pub fn evaluate_fleet(total_conversations: usize, devices: &[DeviceRecord], rejected: &[String]) -> Self {
        let total_devices = devices.len() + rejected.len();
        let legacy: Vec<String> = devices
            .iter()
            .filter(|d| !d.quantum_ready())
            .map(|d| d.device_id.clone())
            .chain(rejected.iter().cloned())
            .collect();
        let quantum_ready_devices = total_devices - legacy.len();

        let readiness_ratio = if total_devices == 0 {
            1.0
        } else {
            quantum_ready_devices as f64 / total_devices as f64
        };

        let mut compatibility_issues = Vec::new();
        if !legacy.is_empty() {
            let severity = if legacy.len() * 2 > total_devices {
                Severity::High
            } else {
                Severity::Medium
            };
            compatibility_issues.push(CompatibilityIssue {
                kind: "device_readiness".to_string(),
                severity,
                description: format!(
                    "{} of {} devices lack post-quantum support",
                    legacy.len(),
                    total_devices
                ),
                affected_devices: legacy.clone(),
            });
        }
        if !rejected.is_empty() {
            compatibility_issues.push(CompatibilityIssue {
                kind: "invalid_device_record".to_string(),
                severity: Severity::Low,
                description: format!("{} device records failed validation", rejected.len()),
                affected_devices: rejected.to_vec(),
            });
        }

        let critical = compatibility_issues
            .iter()
            .any(|i| i.severity == Severity::Critical);
        let high = compatibility_issues
            .iter()
            .filter(|i| i.severity == Severity::High)
            .count();

        let risk_level = if critical || high > 1 {
            RiskLevel::High
        } else if readiness_ratio < 0.5 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let estimated_duration_minutes =
            5.0 + 0.5 * total_conversations as f64 + 2.0 * legacy.len() as f64;

        Self {
            total_conversations,
            total_devices,
            quantum_ready_devices,
            readiness_ratio,
            compatibility_issues,
            risk_level,
            strategy: MigrationStrategy::recommend(readiness_ratio),
            estimated_duration_minutes,
        }
    }
}
