//! Secure Key Store
//!
//! Два уровня:
//! - основное [`RecordStore`]: значения шифруются мастер-ключом (AES-256-GCM)
//!   со свежим IV на каждую запись;
//! - flat [`FallbackStore`]: plaintext, используется только при
//!   [`FallbackPolicy::AllowPlaintext`] и только когда основное хранилище
//!   недоступно.
//!
//! Мастер-ключ генерируется один раз и хранится в слоте `master_key`
//! основного хранилища. При повторном открытии он импортируется, а не
//! генерируется заново: иначе все ранее сохранённые записи станут нечитаемыми.

use crate::config::Config;
use crate::crypto::symmetric::{CipherMode, SymmetricKey};
use crate::storage::models::{
    ConversationKeyRecord, FallbackEntry, FallbackPolicy, KeyScope, StoreOutcome, StoredKeyRecord,
};
use crate::storage::{FallbackStore, RecordStore};
use crate::utils::b64;
use crate::utils::error::{CoreError, Result};
use crate::utils::time::current_timestamp_ms;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Настройки хранилища
#[derive(Debug, Clone)]
pub struct SecureStoreSettings {
    pub conversation_key_ttl_secs: i64,
    pub fallback_policy: FallbackPolicy,
}

impl Default for SecureStoreSettings {
    fn default() -> Self {
        Self {
            conversation_key_ttl_secs: Config::global().conversation_key_ttl_secs,
            fallback_policy: FallbackPolicy::Deny,
        }
    }
}

/// Расшифрованное значение вместе с метаданными записи
pub struct StoredSecret {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    /// Прочитано из зашифрованного tier
    pub encrypted: bool,
}

pub struct SecureKeyStore {
    primary: Option<Arc<dyn RecordStore>>,
    fallback: Option<Arc<dyn FallbackStore>>,
    master_key: Option<SymmetricKey>,
    settings: SecureStoreSettings,
}

impl SecureKeyStore {
    /// Открыть хранилище.
    ///
    /// Если основное хранилище не отвечает, store работает без него
    /// (см. [`SecureKeyStore::is_encrypted`]). Повреждённый мастер-ключ
    /// является ошибкой: генерировать новый поверх старых записей нельзя.
    pub fn open(
        primary: Option<Arc<dyn RecordStore>>,
        fallback: Option<Arc<dyn FallbackStore>>,
        settings: SecureStoreSettings,
    ) -> Result<Self> {
        let (primary, master_key) = match primary {
            Some(store) => match Self::load_or_create_master_key(store.as_ref()) {
                Ok(key) => (Some(store), Some(key)),
                Err(CoreError::StorageFailure(reason)) => {
                    warn!(
                        target: "storage::secure",
                        reason = %reason,
                        "Primary store unavailable, running without encrypted tier"
                    );
                    (None, None)
                }
                Err(e) => return Err(e),
            },
            None => (None, None),
        };

        Ok(Self {
            primary,
            fallback,
            master_key,
            settings,
        })
    }

    fn load_or_create_master_key(store: &dyn RecordStore) -> Result<SymmetricKey> {
        if let Some(bytes) = store.load_master_key()? {
            let bytes = Zeroizing::new(bytes);
            debug!(target: "storage::secure", "Master key re-imported");
            return SymmetricKey::from_bytes(&bytes, CipherMode::Gcm)
                .map_err(|e| CoreError::InvalidState(format!("Corrupted master key: {}", e)));
        }

        let key = SymmetricKey::generate(CipherMode::Gcm);
        store.save_master_key(key.as_bytes())?;
        info!(target: "storage::secure", "Master key generated");
        Ok(key)
    }

    /// Активен ли зашифрованный tier
    pub fn is_encrypted(&self) -> bool {
        self.primary.is_some() && self.master_key.is_some()
    }

    fn default_expiry(&self, scope: KeyScope, now_ms: i64) -> Option<i64> {
        match scope {
            KeyScope::PrivateKey => None,
            KeyScope::ConversationKey => {
                Some(now_ms + self.settings.conversation_key_ttl_secs * 1000)
            }
        }
    }

    /// Сохранить значение; owner = id, срок жизни по умолчанию для scope
    pub fn store(&self, scope: KeyScope, id: &str, plaintext: &[u8]) -> Result<StoreOutcome> {
        let expires_at = self.default_expiry(scope, current_timestamp_ms());
        self.store_record(scope, id, id, plaintext, expires_at)
    }

    /// Сохранить значение с явным владельцем и сроком жизни (Unix ms)
    pub fn store_record(
        &self,
        scope: KeyScope,
        id: &str,
        owner_id: &str,
        plaintext: &[u8],
        expires_at: Option<i64>,
    ) -> Result<StoreOutcome> {
        let record_id = scope.record_id(id);
        let now = current_timestamp_ms();

        let failure = match self.write_encrypted(&record_id, owner_id, scope, plaintext, now, expires_at) {
            Ok(()) => {
                // Старая plaintext-копия из периода деградации не должна пережить перезапись
                if let Some(fallback) = &self.fallback {
                    fallback.remove(&record_id)?;
                }
                debug!(target: "storage::secure", record_id = %record_id, "Stored encrypted record");
                return Ok(StoreOutcome { encrypted: true });
            }
            Err(e) => e,
        };

        match (self.settings.fallback_policy, &self.fallback) {
            (FallbackPolicy::AllowPlaintext, Some(fallback)) => {
                warn!(
                    target: "storage::secure",
                    record_id = %record_id,
                    reason = %failure,
                    "Encrypted store failed, writing PLAINTEXT to fallback store"
                );

                let entry = FallbackEntry {
                    owner_id: owner_id.to_string(),
                    data: b64::encode(plaintext),
                    created_at: now,
                    expires_at,
                };
                let value = Zeroizing::new(serde_json::to_string(&entry)?);
                fallback.set(&record_id, &value)?;
                Ok(StoreOutcome { encrypted: false })
            }
            _ => Err(failure),
        }
    }

    fn write_encrypted(
        &self,
        record_id: &str,
        owner_id: &str,
        scope: KeyScope,
        plaintext: &[u8],
        now: i64,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let (primary, master_key) = self.encrypted_tier()?;
        let (iv, encrypted_payload) = master_key.encrypt(plaintext)?;

        primary.put(&StoredKeyRecord {
            id: record_id.to_string(),
            owner_id: owner_id.to_string(),
            key_type: scope,
            encrypted_payload,
            iv,
            created_at: now,
            expires_at,
        })
    }

    fn encrypted_tier(&self) -> Result<(&Arc<dyn RecordStore>, &SymmetricKey)> {
        match (&self.primary, &self.master_key) {
            (Some(primary), Some(key)) => Ok((primary, key)),
            _ => Err(CoreError::StorageFailure("Encrypted store is not available".to_string())),
        }
    }

    /// Прочитать значение. Истёкшие записи считаются отсутствующими.
    pub fn get(&self, scope: KeyScope, id: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.get_entry(scope, id)?.map(|secret| secret.plaintext))
    }

    /// Как [`SecureKeyStore::get`], но с метаданными записи
    pub fn get_entry(&self, scope: KeyScope, id: &str) -> Result<Option<StoredSecret>> {
        let record_id = scope.record_id(id);
        let now = current_timestamp_ms();

        match self.read_encrypted(&record_id, now) {
            Ok(Some(secret)) => return Ok(Some(secret)),
            Ok(None) => {}
            Err(e @ CoreError::StorageFailure(_)) => {
                if self.settings.fallback_policy == FallbackPolicy::Deny {
                    return Err(e);
                }
                warn!(target: "storage::secure", record_id = %record_id, error = %e, "Encrypted read failed");
            }
            Err(e) => return Err(e),
        }

        if self.settings.fallback_policy == FallbackPolicy::Deny {
            return Ok(None);
        }

        self.read_fallback(&record_id, now)
    }

    fn read_encrypted(&self, record_id: &str, now: i64) -> Result<Option<StoredSecret>> {
        let (primary, master_key) = match self.encrypted_tier() {
            Ok(tier) => tier,
            Err(_) => return Ok(None),
        };

        let Some(record) = primary.get(record_id)? else {
            return Ok(None);
        };

        if record.is_expired(now) {
            debug!(target: "storage::secure", record_id = %record_id, "Expired record purged on read");
            if let Err(e) = primary.delete(record_id) {
                warn!(target: "storage::secure", record_id = %record_id, error = %e, "Failed to purge expired record");
            }
            return Ok(None);
        }

        let plaintext = master_key
            .decrypt(&record.iv, &record.encrypted_payload)
            .map_err(|e| CoreError::CryptoFailure(format!("Record {} unreadable: {}", record_id, e)))?;

        Ok(Some(StoredSecret {
            plaintext,
            created_at: record.created_at,
            expires_at: record.expires_at,
            encrypted: true,
        }))
    }

    fn read_fallback(&self, record_id: &str, now: i64) -> Result<Option<StoredSecret>> {
        let Some(fallback) = &self.fallback else {
            return Ok(None);
        };

        let Some(raw) = fallback.get(record_id)? else {
            return Ok(None);
        };
        let raw = Zeroizing::new(raw);

        let entry: FallbackEntry = serde_json::from_str(&raw)?;
        if entry.is_expired(now) {
            fallback.remove(record_id)?;
            return Ok(None);
        }

        Ok(Some(StoredSecret {
            plaintext: Zeroizing::new(b64::decode(&entry.data)?),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            encrypted: false,
        }))
    }

    /// Удалить запись из обоих tier
    pub fn clear(&self, scope: KeyScope, id: &str) -> Result<()> {
        let record_id = scope.record_id(id);

        let primary_result = match &self.primary {
            Some(primary) => primary.delete(&record_id).map(|_| ()),
            None => Ok(()),
        };

        // plaintext не должен пережить удаление, даже если основное хранилище упало
        if let Some(fallback) = &self.fallback {
            fallback.remove(&record_id)?;
        }

        primary_result
    }

    /// Удалить все записи владельца. Возвращает число удалённых записей.
    pub fn clear_all(&self, owner_id: &str) -> Result<usize> {
        let mut removed = 0;

        if let Some(primary) = &self.primary {
            for id in primary.ids_by_owner(owner_id)? {
                if primary.delete(&id)? {
                    removed += 1;
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            for key in fallback.keys()? {
                if let Some(entry) = Self::fallback_entry(fallback.as_ref(), &key)? {
                    if entry.owner_id == owner_id {
                        fallback.remove(&key)?;
                        removed += 1;
                    }
                }
            }
        }

        info!(target: "storage::secure", owner_id = %owner_id, removed, "Cleared owner records");
        Ok(removed)
    }

    /// Полный проход с удалением истёкших записей
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(current_timestamp_ms())
    }

    pub fn sweep_expired_at(&self, now_ms: i64) -> Result<usize> {
        let mut removed = 0;

        if let Some(primary) = &self.primary {
            for record in primary.all()? {
                if record.is_expired(now_ms) && primary.delete(&record.id)? {
                    removed += 1;
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            for key in fallback.keys()? {
                if let Some(entry) = Self::fallback_entry(fallback.as_ref(), &key)? {
                    if entry.is_expired(now_ms) {
                        fallback.remove(&key)?;
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            info!(target: "storage::secure", removed, "Swept expired records");
        }
        Ok(removed)
    }

    /// Чужие/нераспознанные ключи fallback-хранилища пропускаются
    fn fallback_entry(fallback: &dyn FallbackStore, key: &str) -> Result<Option<FallbackEntry>> {
        Ok(fallback
            .get(key)?
            .and_then(|raw| serde_json::from_str::<FallbackEntry>(&raw).ok()))
    }

    // === Удобные API ===

    pub fn store_private_key(&self, user_id: &str, private_key: &str) -> Result<StoreOutcome> {
        self.store(KeyScope::PrivateKey, user_id, private_key.as_bytes())
    }

    pub fn get_private_key(&self, user_id: &str) -> Result<Option<Zeroizing<String>>> {
        match self.get(KeyScope::PrivateKey, user_id)? {
            Some(bytes) => {
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|e| CoreError::SerializationError(format!("Private key is not UTF-8: {}", e)))?;
                Ok(Some(Zeroizing::new(text)))
            }
            None => Ok(None),
        }
    }

    pub fn store_conversation_key(&self, conversation_id: &str, key: &SymmetricKey) -> Result<StoreOutcome> {
        let now = current_timestamp_ms();
        let expires_at = self.default_expiry(KeyScope::ConversationKey, now);
        self.store_conversation_key_until(conversation_id, key, expires_at)
    }

    /// Сохранить ключ беседы с явным сроком жизни (Unix ms)
    pub fn store_conversation_key_until(
        &self,
        conversation_id: &str,
        key: &SymmetricKey,
        expires_at: Option<i64>,
    ) -> Result<StoreOutcome> {
        let payload = encode_conversation_key(key);
        self.store_record(KeyScope::ConversationKey, conversation_id, conversation_id, &payload, expires_at)
    }

    pub fn get_conversation_key(&self, conversation_id: &str) -> Result<Option<ConversationKeyRecord>> {
        let Some(secret) = self.get_entry(KeyScope::ConversationKey, conversation_id)? else {
            return Ok(None);
        };

        Ok(Some(ConversationKeyRecord {
            conversation_id: conversation_id.to_string(),
            key: decode_conversation_key(&secret.plaintext)?,
            created_at: secret.created_at,
            expires_at: secret.expires_at,
        }))
    }

    /// Заменить ключ беседы новым целиком
    pub fn rotate_conversation_key(
        &self,
        conversation_id: &str,
        mode: CipherMode,
    ) -> Result<(ConversationKeyRecord, StoreOutcome)> {
        let key = SymmetricKey::generate(mode);
        let created_at = current_timestamp_ms();
        let expires_at = self.default_expiry(KeyScope::ConversationKey, created_at);

        let outcome = self.store_conversation_key_until(conversation_id, &key, expires_at)?;
        info!(
            target: "storage::secure",
            conversation_id = %conversation_id,
            mode = ?mode,
            encrypted = outcome.encrypted,
            "Conversation key rotated"
        );

        Ok((
            ConversationKeyRecord {
                conversation_id: conversation_id.to_string(),
                key,
                created_at,
                expires_at,
            },
            outcome,
        ))
    }
}

// mode (1 байт) ‖ материал ключа
fn encode_conversation_key(key: &SymmetricKey) -> Zeroizing<Vec<u8>> {
    let mut payload = Zeroizing::new(Vec::with_capacity(1 + key.as_bytes().len()));
    payload.push(match key.mode() {
        CipherMode::Cbc => 0,
        CipherMode::Gcm => 1,
    });
    payload.extend_from_slice(key.as_bytes());
    payload
}

fn decode_conversation_key(payload: &[u8]) -> Result<SymmetricKey> {
    let (mode, material) = payload
        .split_first()
        .ok_or_else(|| CoreError::SerializationError("Empty conversation key payload".to_string()))?;

    let mode = match mode {
        0 => CipherMode::Cbc,
        1 => CipherMode::Gcm,
        other => {
            return Err(CoreError::SerializationError(format!(
                "Unknown cipher mode tag: {}",
                other
            )))
        }
    };

    Ok(SymmetricKey::from_bytes(material, mode)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryFallbackStore, MemoryRecordStore};

    fn settings(policy: FallbackPolicy) -> SecureStoreSettings {
        SecureStoreSettings {
            conversation_key_ttl_secs: 60,
            fallback_policy: policy,
        }
    }

    #[test]
    fn test_store_and_get_encrypted() {
        let primary = Arc::new(MemoryRecordStore::new());
        let store = SecureKeyStore::open(Some(primary.clone()), None, settings(FallbackPolicy::Deny)).unwrap();

        assert!(store.is_encrypted());
        let outcome = store.store(KeyScope::PrivateKey, "alice", b"secret pem").unwrap();
        assert!(outcome.encrypted);

        // На диске нет plaintext
        let raw = primary.get("private_key_alice").unwrap().unwrap();
        assert_ne!(raw.encrypted_payload, b"secret pem".to_vec());
        assert_eq!(raw.iv.len(), 12);

        assert_eq!(
            store.get(KeyScope::PrivateKey, "alice").unwrap().as_deref().map(|v| v.as_slice()),
            Some(&b"secret pem"[..])
        );
    }

    #[test]
    fn test_master_key_reused_on_reopen() {
        let primary = Arc::new(MemoryRecordStore::new());
        {
            let store = SecureKeyStore::open(Some(primary.clone()), None, settings(FallbackPolicy::Deny)).unwrap();
            store.store_private_key("bob", "pem").unwrap();
        }

        let reopened = SecureKeyStore::open(Some(primary), None, settings(FallbackPolicy::Deny)).unwrap();
        assert_eq!(reopened.get_private_key("bob").unwrap().as_deref().map(String::as_str), Some("pem"));
    }

    #[test]
    fn test_expired_conversation_key_is_absent() {
        let primary = Arc::new(MemoryRecordStore::new());
        let store = SecureKeyStore::open(Some(primary.clone()), None, settings(FallbackPolicy::Deny)).unwrap();
        let key = SymmetricKey::generate(CipherMode::Cbc);
        let now = current_timestamp_ms();

        store.store_conversation_key_until("live", &key, Some(now + 60_000)).unwrap();
        store.store_conversation_key_until("stale", &key, Some(now - 1)).unwrap();

        let live = store.get_conversation_key("live").unwrap().unwrap();
        assert_eq!(live.key.as_bytes(), key.as_bytes());
        assert_eq!(live.key.mode(), CipherMode::Cbc);

        assert!(store.get_conversation_key("stale").unwrap().is_none());
        // Ленивое удаление
        assert!(primary.get("conv_key_stale").unwrap().is_none());
    }

    #[test]
    fn test_sweep_expired() {
        let store = SecureKeyStore::open(
            Some(Arc::new(MemoryRecordStore::new())),
            None,
            settings(FallbackPolicy::Deny),
        )
        .unwrap();
        let key = SymmetricKey::generate(CipherMode::Gcm);

        store.store_conversation_key_until("a", &key, Some(1_000)).unwrap();
        store.store_conversation_key_until("b", &key, Some(5_000)).unwrap();
        store.store_private_key("u", "pem").unwrap();

        assert_eq!(store.sweep_expired_at(2_000).unwrap(), 1);
        assert_eq!(store.sweep_expired_at(10_000).unwrap(), 1);
        assert_eq!(store.sweep_expired_at(i64::MAX).unwrap(), 0);
    }

    #[test]
    fn test_fallback_requires_opt_in() {
        let primary = Arc::new(MemoryRecordStore::new());
        let fallback = Arc::new(MemoryFallbackStore::new());
        let store = SecureKeyStore::open(
            Some(primary.clone()),
            Some(fallback.clone()),
            settings(FallbackPolicy::Deny),
        )
        .unwrap();

        primary.set_available(false);
        let result = store.store_private_key("alice", "pem");
        assert!(matches!(result, Err(CoreError::StorageFailure(_))));
        assert!(fallback.is_empty());
    }

    #[test]
    fn test_plaintext_fallback_when_allowed() {
        let primary = Arc::new(MemoryRecordStore::new());
        let fallback = Arc::new(MemoryFallbackStore::new());
        let store = SecureKeyStore::open(
            Some(primary.clone()),
            Some(fallback.clone()),
            settings(FallbackPolicy::AllowPlaintext),
        )
        .unwrap();

        primary.set_available(false);
        let outcome = store.store_private_key("alice", "pem").unwrap();
        assert!(!outcome.encrypted);
        assert_eq!(fallback.len(), 1);

        let entry = store.get_entry(KeyScope::PrivateKey, "alice").unwrap().unwrap();
        assert!(!entry.encrypted);
        assert_eq!(entry.plaintext.as_slice(), b"pem");

        // clear убирает plaintext даже при недоступном основном хранилище
        assert!(store.clear(KeyScope::PrivateKey, "alice").is_err());
        assert!(fallback.is_empty());
    }

    #[test]
    fn test_clear_all_by_owner() {
        let primary = Arc::new(MemoryRecordStore::new());
        let store = SecureKeyStore::open(Some(primary), None, settings(FallbackPolicy::Deny)).unwrap();

        store.store_record(KeyScope::PrivateKey, "alice", "alice", b"pem", None).unwrap();
        store.store_record(KeyScope::ConversationKey, "c1", "alice", &[0u8; 33], None).unwrap();
        store.store_record(KeyScope::PrivateKey, "bob", "bob", b"pem", None).unwrap();

        assert_eq!(store.clear_all("alice").unwrap(), 2);
        assert!(store.get(KeyScope::PrivateKey, "alice").unwrap().is_none());
        assert!(store.get(KeyScope::PrivateKey, "bob").unwrap().is_some());
    }

    #[test]
    fn test_rotate_conversation_key() {
        let store = SecureKeyStore::open(
            Some(Arc::new(MemoryRecordStore::new())),
            None,
            settings(FallbackPolicy::Deny),
        )
        .unwrap();

        let (first, _) = store.rotate_conversation_key("c1", CipherMode::Cbc).unwrap();
        let (second, outcome) = store.rotate_conversation_key("c1", CipherMode::Gcm).unwrap();
        assert!(outcome.encrypted);
        assert_ne!(first.key.as_bytes(), second.key.as_bytes());

        let loaded = store.get_conversation_key("c1").unwrap().unwrap();
        assert_eq!(loaded.key.as_bytes(), second.key.as_bytes());
        assert_eq!(loaded.key.mode(), CipherMode::Gcm);
        assert_eq!(loaded.expires_at, second.expires_at);
    }

    #[test]
    fn test_no_primary_store() {
        let store = SecureKeyStore::open(None, None, settings(FallbackPolicy::AllowPlaintext)).unwrap();
        assert!(!store.is_encrypted());
        assert!(store.store_private_key("alice", "pem").is_err());
        assert!(store.get_private_key("alice").unwrap().is_none());
    }
}
