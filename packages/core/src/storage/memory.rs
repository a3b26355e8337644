// In-memory хранилища для тестов и окружений без диска

use crate::storage::models::{KeyScope, StoredKeyRecord};
use crate::storage::{FallbackStore, RecordStore};
use crate::utils::error::{CoreError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| CoreError::StorageFailure("Memory store lock poisoned".to_string()))
}

/// In-memory основное хранилище
///
/// Можно "выключить" через [`MemoryRecordStore::set_available`], чтобы
/// воспроизвести недоступность основного хранилища.
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, StoredKeyRecord>>,
    master_key: Mutex<Option<Vec<u8>>>,
    available: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            master_key: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::StorageFailure("Primary store unavailable".to_string()))
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn put(&self, record: &StoredKeyRecord) -> Result<()> {
        self.check_available()?;
        lock(&self.records)?.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<StoredKeyRecord>> {
        self.check_available()?;
        Ok(lock(&self.records)?.get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.check_available()?;
        Ok(lock(&self.records)?.remove(id).is_some())
    }

    fn ids_by_owner(&self, owner_id: &str) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(lock(&self.records)?
            .values()
            .filter(|r| r.owner_id == owner_id)
            .map(|r| r.id.clone())
            .collect())
    }

    fn ids_by_type(&self, key_type: KeyScope) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(lock(&self.records)?
            .values()
            .filter(|r| r.key_type == key_type)
            .map(|r| r.id.clone())
            .collect())
    }

    fn all(&self) -> Result<Vec<StoredKeyRecord>> {
        self.check_available()?;
        Ok(lock(&self.records)?.values().cloned().collect())
    }

    fn load_master_key(&self) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(lock(&self.master_key)?.clone())
    }

    fn save_master_key(&self, key: &[u8]) -> Result<()> {
        self.check_available()?;
        *lock(&self.master_key)? = Some(key.to_vec());
        Ok(())
    }
}

/// In-memory flat fallback-хранилище
#[derive(Default)]
pub struct MemoryFallbackStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryFallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FallbackStore for MemoryFallbackStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.entries)?.keys().cloned().collect())
    }
}
