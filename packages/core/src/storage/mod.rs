// Модуль хранилища ключей
// Основное хранилище (redb / память) + flat fallback без шифрования

pub mod memory;
pub mod models;
pub mod redb;
pub mod secure_store;

pub use memory::{MemoryFallbackStore, MemoryRecordStore};
pub use models::{ConversationKeyRecord, FallbackPolicy, KeyScope, StoreOutcome, StoredKeyRecord};
pub use self::redb::RedbRecordStore;
pub use secure_store::{SecureKeyStore, SecureStoreSettings};

use crate::utils::error::Result;

/// Транзакционное хранилище записей с вторичными индексами
///
/// Каждая запись и удаление идут отдельной транзакцией; при одновременной записи
/// одного id побеждает последняя.
pub trait RecordStore: Send + Sync {
    fn put(&self, record: &StoredKeyRecord) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<StoredKeyRecord>>;

    /// Возвращает `true`, если запись существовала
    fn delete(&self, id: &str) -> Result<bool>;

    fn ids_by_owner(&self, owner_id: &str) -> Result<Vec<String>>;

    fn ids_by_type(&self, key_type: KeyScope) -> Result<Vec<String>>;

    fn all(&self) -> Result<Vec<StoredKeyRecord>>;

    /// Слот мастер-ключа
    fn load_master_key(&self) -> Result<Option<Vec<u8>>>;

    fn save_master_key(&self, key: &[u8]) -> Result<()>;
}

/// Legacy flat key-value хранилище (строковые ключи, без шифрования)
pub trait FallbackStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;
}
