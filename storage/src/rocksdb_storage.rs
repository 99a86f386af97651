// MIT LICENSE
//
// Copyright (c) 2021 Dash Core Group
//
// Permission is hereby granted, free of charge, to any
// person obtaining a copy of this software and associated
// documentation files (the "Software"), to deal in the
// Software without restriction, including without
// limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software
// is furnished to do so, subject to the following
// conditions:
//
// The above copyright notice and this permission notice
// shall be included in all copies or substantial portions
// of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF
// ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED
// TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A
// PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT
// SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY
// CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR
// IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Implementation of the storage abstraction over RocksDB.

use std::path::Path;

use std::sync::Arc;

use lazy_static::lazy_static;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded};

use crate::{
    storage::{Column, Database, WriteBatch, WriteOp},
    Error,
};

type Db = DBWithThreadMode<MultiThreaded>;

lazy_static! {
    static ref DEFAULT_OPTS: rocksdb::Options = {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_atomic_flush(true);
        opts
    };
}

/// Storage which uses RocksDB as its backend, one column family per
/// [`Column`].
pub struct RocksDbStorage {
    db: Db,
}

impl RocksDbStorage {
    /// Open (creating if missing) a RocksDB database at `path` with default
    /// parameters.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let cfs = Column::ALL
            .iter()
            .map(|c| ColumnFamilyDescriptor::new(c.name(), DEFAULT_OPTS.clone()));
        let db = Db::open_cf_descriptors(&DEFAULT_OPTS, path, cfs)?;
        Ok(RocksDbStorage { db })
    }

    fn cf(&self, column: Column) -> Result<Arc<BoundColumnFamily<'_>>, Error> {
        self.db
            .cf_handle(column.name())
            .ok_or(Error::MissingColumnFamily(column.name()))
    }
}

impl Database for RocksDbStorage {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.db.get_cf(&self.cf(column)?, key)?)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), Error> {
        Ok(self.db.put_cf(&self.cf(column)?, key, value)?)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), Error> {
        Ok(self.db.delete_cf(&self.cf(column)?, key)?)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), Error> {
        let mut db_batch = rocksdb::WriteBatchWithTransaction::<false>::default();
        for op in batch.into_iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    db_batch.put_cf(&self.cf(column)?, key, value)
                }
                WriteOp::Delete { column, key } => db_batch.delete_cf(&self.cf(column)?, key),
            }
        }
        Ok(self.db.write(db_batch)?)
    }

    fn iter_prefix<'a>(
        &'a self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>, Error> {
        let cf = self.cf(column)?;
        let prefix = prefix.to_vec();
        let iter = self.db.iterator_cf(
            &cf,
            rocksdb::IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        Ok(Box::new(
            iter.filter_map(|item| item.ok())
                .take_while(move |(k, _)| k.starts_with(&prefix[..]))
                .map(|(k, v)| (k.to_vec(), v.to_vec())),
        ))
    }

    fn flush(&self) -> Result<(), Error> {
        Ok(self.db.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage() -> (tempfile::TempDir, RocksDbStorage) {
        let dir = tempfile::TempDir::new().expect("cannot create tempdir");
        let storage = RocksDbStorage::open(dir.path()).expect("cannot open rocksdb");
        (dir, storage)
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let (_dir, storage) = temp_storage();

        storage.put(Column::Nodes, b"key", b"value").unwrap();
        assert_eq!(
            storage.get(Column::Nodes, b"key").unwrap(),
            Some(b"value".to_vec())
        );
        // Columns are isolated.
        assert_eq!(storage.get(Column::Roots, b"key").unwrap(), None);

        storage.delete(Column::Nodes, b"key").unwrap();
        assert_eq!(storage.get(Column::Nodes, b"key").unwrap(), None);
    }

    #[test]
    fn batch_commit_is_atomic_across_columns() {
        let (_dir, storage) = temp_storage();

        let mut batch = WriteBatch::new();
        batch.put(Column::Nodes, b"n1".to_vec(), b"v1".to_vec());
        batch.put(Column::Roots, b"r1".to_vec(), vec![]);
        storage.write(batch).unwrap();

        assert_eq!(
            storage.get(Column::Nodes, b"n1").unwrap(),
            Some(b"v1".to_vec())
        );
        assert_eq!(storage.get(Column::Roots, b"r1").unwrap(), Some(vec![]));
    }

    #[test]
    fn prefix_iteration_is_ordered_and_bounded() {
        let (_dir, storage) = temp_storage();

        for key in [&b"aa1"[..], b"aa2", b"ab1", b"b"] {
            storage.put(Column::WriteLogs, key, b"x").unwrap();
        }

        let keys: Vec<_> = storage
            .iter_prefix(Column::WriteLogs, b"aa")
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"aa1".to_vec(), b"aa2".to_vec()]);
    }
}
