//! Redb-backed хранилище ключей.
//!
//! ACID транзакции redb; данные переживают перезапуск процесса.

use std::{fmt::Display, path::Path, sync::Arc};

use ::redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
};

use super::{KeyScope, RecordStore, StoredKeyRecord};
use crate::utils::error::{CoreError, Result};
use crate::utils::serialization;

/// Table: records
/// Key: синтетический id (`private_key_<user>` / `conv_key_<conversation>`)
/// Value: bincode StoredKeyRecord
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// owner_id → id
const OWNER_INDEX: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("owner_index");

/// key_type → id
const TYPE_INDEX: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("type_index");

/// Table: meta
/// Key: имя слота (`master_key`)
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const MASTER_KEY_SLOT: &str = "master_key";

fn storage_err<E: Display>(e: E) -> CoreError {
    CoreError::StorageFailure(e.to_string())
}

/// Хранилище на redb. Clone дешёвый (Arc).
#[derive(Clone)]
pub struct RedbRecordStore {
    db: Arc<Database>,
}

impl RedbRecordStore {
    /// Открыть или создать базу по пути; создаёт таблицы, если их нет.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        let txn = db.begin_write().map_err(storage_err)?;
        {
            let _ = txn.open_table(RECORDS).map_err(storage_err)?;
            let _ = txn.open_multimap_table(OWNER_INDEX).map_err(storage_err)?;
            let _ = txn.open_multimap_table(TYPE_INDEX).map_err(storage_err)?;
            let _ = txn.open_table(META).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn ids_from_index(
        &self,
        index: MultimapTableDefinition<'static, &'static str, &'static str>,
        key: &str,
    ) -> Result<Vec<String>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_multimap_table(index).map_err(storage_err)?;

        let mut ids = Vec::new();
        for item in table.get(key).map_err(storage_err)? {
            ids.push(item.map_err(storage_err)?.value().to_string());
        }
        Ok(ids)
    }
}

impl RecordStore for RedbRecordStore {
    fn put(&self, record: &StoredKeyRecord) -> Result<()> {
        let bytes = serialization::to_bytes(record)?;

        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut records = txn.open_table(RECORDS).map_err(storage_err)?;
            let mut owners = txn.open_multimap_table(OWNER_INDEX).map_err(storage_err)?;
            let mut types = txn.open_multimap_table(TYPE_INDEX).map_err(storage_err)?;

            let previous: Option<StoredKeyRecord> = match records
                .insert(record.id.as_str(), bytes.as_slice())
                .map_err(storage_err)?
            {
                Some(old) => Some(serialization::from_bytes(old.value())?),
                None => None,
            };

            if let Some(prev) = previous {
                owners
                    .remove(prev.owner_id.as_str(), prev.id.as_str())
                    .map_err(storage_err)?;
                types
                    .remove(prev.key_type.as_str(), prev.id.as_str())
                    .map_err(storage_err)?;
            }

            owners
                .insert(record.owner_id.as_str(), record.id.as_str())
                .map_err(storage_err)?;
            types
                .insert(record.key_type.as_str(), record.id.as_str())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;

        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<StoredKeyRecord>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(RECORDS).map_err(storage_err)?;

        let record = match table.get(id).map_err(storage_err)? {
            Some(value) => Some(serialization::from_bytes(value.value())?),
            None => None,
        };
        Ok(record)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let existed = {
            let mut records = txn.open_table(RECORDS).map_err(storage_err)?;
            let mut owners = txn.open_multimap_table(OWNER_INDEX).map_err(storage_err)?;
            let mut types = txn.open_multimap_table(TYPE_INDEX).map_err(storage_err)?;

            let removed: Option<StoredKeyRecord> = match records.remove(id).map_err(storage_err)? {
                Some(old) => Some(serialization::from_bytes(old.value())?),
                None => None,
            };

            match removed {
                Some(prev) => {
                    owners
                        .remove(prev.owner_id.as_str(), prev.id.as_str())
                        .map_err(storage_err)?;
                    types
                        .remove(prev.key_type.as_str(), prev.id.as_str())
                        .map_err(storage_err)?;
                    true
                }
                None => false,
            }
        };
        txn.commit().map_err(storage_err)?;

        Ok(existed)
    }

    fn ids_by_owner(&self, owner_id: &str) -> Result<Vec<String>> {
        self.ids_from_index(OWNER_INDEX, owner_id)
    }

    fn ids_by_type(&self, key_type: KeyScope) -> Result<Vec<String>> {
        self.ids_from_index(TYPE_INDEX, key_type.as_str())
    }

    fn all(&self) -> Result<Vec<StoredKeyRecord>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(RECORDS).map_err(storage_err)?;

        let mut records = Vec::new();
        for item in table.iter().map_err(storage_err)? {
            let (_, value) = item.map_err(storage_err)?;
            records.push(serialization::from_bytes(value.value())?);
        }
        Ok(records)
    }

    fn load_master_key(&self) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let table = txn.open_table(META).map_err(storage_err)?;

        let key = table
            .get(MASTER_KEY_SLOT)
            .map_err(storage_err)?
            .map(|value| value.value().to_vec());
        Ok(key)
    }

    fn save_master_key(&self, key: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(META).map_err(storage_err)?;
            table.insert(MASTER_KEY_SLOT, key).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }
}
