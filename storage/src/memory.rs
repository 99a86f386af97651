//! In-memory storage implementation for tests and ephemeral stores.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::{
    storage::{Column, Database, WriteBatch, WriteOp},
    Error,
};

/// Storage backed by ordinary B-tree maps, one per column.
///
/// Atomicity of [`Database::write`] is provided by holding the write lock
/// across the whole batch.
#[derive(Default)]
pub struct MemoryStorage {
    columns: RwLock<HashMap<Column, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Creates an empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryStorage {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .columns
            .read()
            .get(&column)
            .and_then(|m| m.get(key).cloned()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.columns
            .write()
            .entry(column)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), Error> {
        if let Some(m) = self.columns.write().get_mut(&column) {
            m.remove(key);
        }
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), Error> {
        let mut columns = self.columns.write();
        for op in batch.into_iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    columns.entry(column).or_default().insert(key, value);
                }
                WriteOp::Delete { column, key } => {
                    if let Some(m) = columns.get_mut(&column) {
                        m.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn iter_prefix<'a>(
        &'a self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>, Error> {
        // Collected under the read lock so the iterator does not hold it.
        let items: Vec<_> = self
            .columns
            .read()
            .get(&column)
            .map(|m| {
                m.range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(items.into_iter()))
    }

    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_and_prefix_scan() {
        let storage = MemoryStorage::new();

        let mut batch = WriteBatch::new();
        batch.put(Column::Nodes, b"ab".to_vec(), b"1".to_vec());
        batch.put(Column::Nodes, b"ac".to_vec(), b"2".to_vec());
        batch.put(Column::Nodes, b"b".to_vec(), b"3".to_vec());
        batch.delete(Column::Nodes, b"ac".to_vec());
        storage.write(batch).unwrap();

        let keys: Vec<_> = storage
            .iter_prefix(Column::Nodes, b"a")
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"ab".to_vec()]);
        assert_eq!(storage.get(Column::Nodes, b"b").unwrap(), Some(b"3".to_vec()));
    }
}
