//! Migration Orchestrator
//!
//! ```text
//! assessment → preparation → migration → verification → completed
//!      └────────────┴─────────────┴─────────────┴──────→ failed | cancelled
//! ```
//!
//! Единственный активный отчёт живёт в [`MigrationRegistry`], которым владеет
//! вызывающий код. Отмена кооперативная: статус проверяется между фазами
//! и между пачками, уже отправленные запросы не прерываются.

use crate::config::Config;
use crate::crypto::algorithm::{Algorithm, STRONGEST_QUANTUM};
use crate::crypto::keys::{cipher_mode_for, KeyMaterialManager};
use crate::migration::assessment::{MigrationAssessment, MigrationStrategy};
use crate::migration::backend::{ChatBackend, ConversationSummary, DeviceRecord};
use crate::migration::report::{MigrationErrorEntry, MigrationPhase, MigrationReport, MigrationStatus};
use crate::storage::secure_store::SecureKeyStore;
use crate::utils::error::{CoreError, Result};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Слот единственной активной миграции
///
/// Клонируется дёшево; все клоны видят один и тот же слот.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    slot: Arc<Mutex<Option<MigrationReport>>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<MigrationReport>>> {
        self.slot
            .lock()
            .map_err(|_| CoreError::InvalidState("Migration registry lock poisoned".to_string()))
    }

    /// Снимок текущего (или последнего) отчёта
    pub fn current(&self) -> Option<MigrationReport> {
        self.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn get(&self, id: &str) -> Option<MigrationReport> {
        self.current().filter(|r| r.id == id)
    }

    pub fn is_in_progress(&self) -> bool {
        self.current()
            .is_some_and(|r| r.status == MigrationStatus::InProgress)
    }

    /// Занять слот; существующий активный отчёт не трогается
    fn begin(&self, report: MigrationReport) -> Result<()> {
        let mut slot = self.lock()?;
        if let Some(active) = slot.as_ref().filter(|r| r.status == MigrationStatus::InProgress) {
            return Err(CoreError::MigrationInProgress(active.id.clone()));
        }
        *slot = Some(report);
        Ok(())
    }

    fn update<R>(&self, id: &str, f: impl FnOnce(&mut MigrationReport) -> R) -> Result<R> {
        let mut slot = self.lock()?;
        match slot.as_mut() {
            Some(report) if report.id == id => Ok(f(report)),
            _ => Err(CoreError::NotFound(format!("Migration {}", id))),
        }
    }

    /// Отменить активную миграцию. Возвращает её id.
    pub fn cancel(&self, reason: &str) -> Result<String> {
        let mut slot = self.lock()?;
        match slot.as_mut() {
            Some(report) if report.status == MigrationStatus::InProgress => {
                report.cancel(reason)?;
                warn!(target: "migration", migration_id = %report.id, reason, "Migration cancelled");
                Ok(report.id.clone())
            }
            _ => Err(CoreError::InvalidState("No migration in progress".to_string())),
        }
    }
}

/// Настройки прогона
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub verification_sample_size: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        let cfg = Config::global();
        Self {
            batch_size: cfg.migration_batch_size,
            batch_pause: Duration::from_millis(cfg.migration_batch_pause_ms),
            verification_sample_size: cfg.verification_sample_size,
        }
    }
}

/// Инвентарь бэкенда, уже провалидированный и оценённый
struct Inventory {
    conversations: Vec<ConversationSummary>,
    devices: Vec<DeviceRecord>,
    rejected: Vec<String>,
    assessment: MigrationAssessment,
}

/// Запущенная миграция
pub struct MigrationHandle {
    pub id: String,
    join: JoinHandle<()>,
}

impl MigrationHandle {
    /// Дождаться окончания фонового прогона
    pub async fn wait(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| CoreError::InvalidState(format!("Migration task aborted: {}", e)))
    }
}

#[derive(Clone)]
pub struct MigrationOrchestrator {
    backend: Arc<dyn ChatBackend>,
    keys: Arc<KeyMaterialManager>,
    store: Option<Arc<SecureKeyStore>>,
    registry: MigrationRegistry,
    settings: MigrationSettings,
}

impl MigrationOrchestrator {
    pub fn new(backend: Arc<dyn ChatBackend>, keys: Arc<KeyMaterialManager>, registry: MigrationRegistry) -> Self {
        Self {
            backend,
            keys,
            store: None,
            registry,
            settings: MigrationSettings::default(),
        }
    }

    /// Сохранять новые ключи через Secure Key Store
    pub fn with_store(mut self, store: Arc<SecureKeyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: MigrationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    async fn inventory(&self) -> Result<Inventory> {
        let (conversations, infos) =
            futures::try_join!(self.backend.list_conversations(), self.backend.list_devices())?;

        // Битая запись одного устройства не должна валить оценку всего парка
        let mut devices = Vec::with_capacity(infos.len());
        let mut rejected = Vec::new();
        for info in infos {
            let device_id = info.device_id.clone();
            match DeviceRecord::try_from(info) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    warn!(target: "migration", device_id = %device_id, error = %e, "Skipping invalid device record");
                    rejected.push(device_id);
                }
            }
        }

        let assessment = MigrationAssessment::evaluate_fleet(conversations.len(), &devices, &rejected);
        Ok(Inventory {
            conversations,
            devices,
            rejected,
            assessment,
        })
    }

    pub async fn assess(&self) -> Result<MigrationAssessment> {
        Ok(self.inventory().await?.assessment)
    }

    /// Запустить миграцию в фоне.
    ///
    /// `None` берёт стратегию, рекомендованную оценкой. Если в реестре уже
    /// есть активная миграция, возвращает `MigrationInProgress`, не трогая её.
    pub async fn start(&self, strategy: Option<MigrationStrategy>) -> Result<MigrationHandle> {
        if let Some(active) = self.registry.current().filter(|r| !r.status.is_terminal()) {
            return Err(CoreError::MigrationInProgress(active.id));
        }

        let Inventory {
            conversations,
            devices,
            rejected,
            assessment,
        } = self.inventory().await?;
        let strategy = strategy.unwrap_or(assessment.strategy);

        let id = Uuid::new_v4().to_string();
        let mut report = MigrationReport::new(id.clone(), strategy, assessment);
        report.progress.set_step(1, None);
        report.progress.warnings.extend(
            rejected
                .iter()
                .map(|device_id| format!("Device {:?} skipped: invalid device record", device_id)),
        );
        self.registry.begin(report)?;

        info!(
            target: "migration",
            migration_id = %id,
            strategy = ?strategy,
            conversations = conversations.len(),
            devices = devices.len(),
            "Migration started"
        );

        let this = self.clone();
        let run_id = id.clone();
        let join = tokio::spawn(async move {
            let run = this.run(run_id.clone(), strategy, conversations, devices);
            if let Err(payload) = AssertUnwindSafe(run).catch_unwind().await {
                this.record_panic(&run_id, panic_message(payload.as_ref()));
            }
        });

        Ok(MigrationHandle { id, join })
    }

    /// Отменить активную миграцию
    pub fn cancel(&self, reason: &str) -> Result<String> {
        self.registry.cancel(reason)
    }

    async fn run(
        &self,
        id: String,
        strategy: MigrationStrategy,
        conversations: Vec<ConversationSummary>,
        devices: Vec<DeviceRecord>,
    ) {
        let outcome = self.execute(&id, strategy, &conversations, &devices).await;

        let recorded = self.registry.update(&id, |report| {
            if report.status.is_terminal() {
                // Отменена по ходу: статус уже финальный
                return;
            }
            let result = match &outcome {
                Ok(()) => report.complete(),
                Err(e) => report.fail(e),
            };
            if let Err(e) = result {
                warn!(target: "migration", migration_id = %report.id, error = %e, "Could not finalize report");
            }
        });

        match (&outcome, recorded) {
            (_, Err(e)) => error!(target: "migration", migration_id = %id, error = %e, "Report slot lost"),
            (Ok(()), Ok(())) => info!(target: "migration", migration_id = %id, "Migration finished"),
            (Err(e), Ok(())) => error!(target: "migration", migration_id = %id, error = %e, "Migration failed"),
        }
    }

    /// Паника в фоновом прогоне завершает отчёт как failed
    fn record_panic(&self, id: &str, message: &str) {
        let failure = CoreError::InvalidState(format!("Migration task panicked: {}", message));
        error!(target: "migration", migration_id = %id, error = %failure, "Migration task panicked");

        let recorded = self.registry.update(id, |report| {
            if !report.status.is_terminal() {
                if let Err(e) = report.fail(&failure) {
                    warn!(target: "migration", migration_id = %report.id, error = %e, "Could not finalize report");
                }
            }
        });
        if let Err(e) = recorded {
            error!(target: "migration", migration_id = %id, error = %e, "Report slot lost");
        }
    }

    async fn execute(
        &self,
        id: &str,
        strategy: MigrationStrategy,
        conversations: &[ConversationSummary],
        devices: &[DeviceRecord],
    ) -> Result<()> {
        let total = strategy.total_steps();

        self.checkpoint(id)?;
        self.enter(id, MigrationPhase::Preparation, 1)?;
        self.prepare_devices(id, devices).await?;

        self.checkpoint(id)?;
        self.enter(id, MigrationPhase::Migration, 2)?;
        match strategy {
            MigrationStrategy::Immediate => {
                self.migrate_sequential(id, conversations, STRONGEST_QUANTUM).await?
            }
            MigrationStrategy::Gradual => self.migrate_gradual(id, conversations, total).await?,
            MigrationStrategy::Hybrid => {
                self.migrate_sequential(id, conversations, Algorithm::HybridRsaKem768).await?
            }
            MigrationStrategy::Delayed => {
                self.registry.update(id, |r| {
                    r.progress
                        .warnings
                        .push("Delayed strategy: conversation re-encryption deferred".to_string())
                })?;
            }
        }

        self.checkpoint(id)?;
        self.enter(id, MigrationPhase::Verification, total.saturating_sub(1))?;
        self.verify(id, conversations).await
    }

    /// Ошибка, если миграцию отменили
    fn checkpoint(&self, id: &str) -> Result<()> {
        let status = self.registry.update(id, |r| r.status)?;
        if status == MigrationStatus::InProgress {
            Ok(())
        } else {
            Err(CoreError::InvalidState(format!("Migration {} is {:?}", id, status)))
        }
    }

    fn enter(&self, id: &str, phase: MigrationPhase, step: u32) -> Result<()> {
        self.registry.update(id, |r| {
            r.progress.enter(phase)?;
            r.progress.set_step(step, None);
            Ok(())
        })?
    }

    async fn prepare_devices(&self, id: &str, devices: &[DeviceRecord]) -> Result<()> {
        for device in devices.iter().filter(|d| !d.quantum_ready()) {
            let outcome = self.upgrade_device(device).await;

            self.registry.update(id, |r| match &outcome {
                Ok(()) => r.results.devices_upgraded += 1,
                Err(e) => {
                    r.results.devices_failed += 1;
                    r.progress
                        .warnings
                        .push(format!("Device {} upgrade failed: {}", device.device_id, e));
                }
            })?;
        }
        Ok(())
    }

    async fn upgrade_device(&self, device: &DeviceRecord) -> Result<()> {
        let pair = self.keys.generate_quantum_key_pair(STRONGEST_QUANTUM).await?;

        self.backend
            .register_device_key(&device.device_id, pair.algorithm, &pair.public_key)
            .await?;

        if let Some(store) = &self.store {
            store.store_private_key(&device.device_id, &pair.private_key)?;
        }

        info!(target: "migration", device_id = %device.device_id, algorithm = %pair.algorithm, "Device upgraded");
        Ok(())
    }

    /// Апгрейд на бэкенде, затем новый ключ беседы в режиме целевого алгоритма.
    /// При отказе бэкенда локальный ключ остаётся прежним.
    async fn migrate_conversation(&self, conversation_id: &str, algorithm: Algorithm) -> Result<()> {
        self.backend
            .upgrade_conversation_encryption(conversation_id, algorithm)
            .await?;

        if let Some(store) = &self.store {
            store.rotate_conversation_key(conversation_id, cipher_mode_for(algorithm))?;
        }
        Ok(())
    }

    fn record_conversation(&self, id: &str, conversation_id: &str, outcome: Result<()>) -> Result<()> {
        if let Err(e) = &outcome {
            warn!(target: "migration", conversation_id = %conversation_id, error = %e, "Conversation migration failed");
        }

        self.registry.update(id, |r| match outcome {
            Ok(()) => r.results.conversations_migrated += 1,
            Err(e) => {
                r.results.conversations_failed += 1;
                let item = CoreError::MigrationItemFailure(e.to_string());
                r.results
                    .errors
                    .push(MigrationErrorEntry::new(e.kind(), conversation_id, item.to_string()));
            }
        })
    }

    async fn migrate_sequential(
        &self,
        id: &str,
        conversations: &[ConversationSummary],
        algorithm: Algorithm,
    ) -> Result<()> {
        for conversation in conversations {
            let outcome = self.migrate_conversation(&conversation.id, algorithm).await;
            self.record_conversation(id, &conversation.id, outcome)?;
        }
        Ok(())
    }

    async fn migrate_gradual(&self, id: &str, conversations: &[ConversationSummary], total_steps: u32) -> Result<()> {
        let batch_size = self.settings.batch_size.max(1);
        let batch_count = conversations.len().div_ceil(batch_size);

        // Прогресс пачек укладывается между шагами миграции и верификации
        let from = 2.0 * 100.0 / f64::from(total_steps);
        let to = f64::from(total_steps.saturating_sub(1)) * 100.0 / f64::from(total_steps);

        for (index, batch) in conversations.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.batch_pause).await;
                self.checkpoint(id)?;
            }

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|c| self.migrate_conversation(&c.id, STRONGEST_QUANTUM)),
            )
            .await;

            for (conversation, outcome) in batch.iter().zip(outcomes) {
                self.record_conversation(id, &conversation.id, outcome)?;
            }

            let done = (index + 1) as f64 / batch_count as f64;
            self.registry.update(id, |r| {
                r.results.batches.push(batch.len());
                let step = r.progress.current_step;
                r.progress.set_step(step, Some(from + (to - from) * done));
            })?;

            info!(
                target: "migration",
                migration_id = %id,
                batch = index + 1,
                batches = batch_count,
                size = batch.len(),
                "Batch migrated"
            );
        }
        Ok(())
    }

    async fn verify(&self, id: &str, conversations: &[ConversationSummary]) -> Result<()> {
        let health = self
            .keys
            .service()
            .health()
            .await
            .map_err(|e| CoreError::SystemHealthFailure(e.to_string()))?;

        if !health.quantum_support.kem_available {
            return Err(CoreError::SystemHealthFailure(
                "Quantum KEM is not available".to_string(),
            ));
        }

        for conversation in conversations.iter().take(self.settings.verification_sample_size) {
            let warning = match self.backend.conversation_quantum_settings(&conversation.id).await {
                Ok(settings) if settings.quantum_resistant => None,
                Ok(_) => Some(format!("Conversation {} is not quantum-resistant yet", conversation.id)),
                Err(e) => Some(format!("Conversation {} could not be verified: {}", conversation.id, e)),
            };

            if let Some(warning) = warning {
                self.registry.update(id, |r| r.progress.warnings.push(warning))?;
            }
        }

        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::assessment::MigrationAssessment;

    fn report(id: &str) -> MigrationReport {
        MigrationReport::new(
            id.to_string(),
            MigrationStrategy::Immediate,
            MigrationAssessment::evaluate(0, &[]),
        )
    }

    #[test]
    fn test_registry_rejects_second_active_run() {
        let registry = MigrationRegistry::new();
        registry.begin(report("first")).unwrap();

        let result = registry.begin(report("second"));
        assert!(matches!(result, Err(CoreError::MigrationInProgress(ref id)) if id == "first"));
        assert_eq!(registry.current().unwrap().id, "first");
    }

    #[test]
    fn test_registry_replaces_terminal_run() {
        let registry = MigrationRegistry::new();
        registry.begin(report("first")).unwrap();
        assert_eq!(registry.cancel("stop").unwrap(), "first");
        assert!(!registry.is_in_progress());

        registry.begin(report("second")).unwrap();
        assert!(registry.get("first").is_none());
        assert!(registry.get("second").is_some());
    }

    #[test]
    fn test_cancel_without_active_run() {
        let registry = MigrationRegistry::new();
        assert!(matches!(registry.cancel("x"), Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn test_update_checks_id() {
        let registry = MigrationRegistry::new();
        registry.begin(report("first")).unwrap();
        assert!(matches!(registry.update("other", |_| ()), Err(CoreError::NotFound(_))));
    }
}
