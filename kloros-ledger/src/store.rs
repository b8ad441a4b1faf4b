//! A generic append-only, sled-backed ledger store, keyed
//! `"{ts_millis:020}:{seq:010}"` so iteration order is insertion order even
//! across process restarts ("Ledgers"; grounded on
//! `LockchainStorage`'s zero-padded `"root:{cycle:020}"` key layout,
//! generalized from a single Merkle-root tree to any `bincode`-encodable
//! record type).

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::instrument;

/// One append-only record stream, backed by its own `sled` tree.
pub struct LedgerStore<T> {
    tree: sled::Tree,
    seq: AtomicU64,
    _marker: PhantomData<T>,
}

impl<T> LedgerStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open (or create) the named tree inside the shared `sled` database at
    /// `db_path`. Every ledger stream (`phase_queue`, `phase_fitness`,
    /// `fitness_ledger`, `lifecycle_events`) lives in one database as a
    /// separate tree, so a single `flush` covers all of them.
    pub fn open(db_path: impl AsRef<Path>, tree_name: &str) -> Result<Self> {
        let db = sled::open(db_path)?;
        let tree = db.open_tree(tree_name)?;
        let seq = tree.len() as u64;
        Ok(Self {
            tree,
            seq: AtomicU64::new(seq),
            _marker: PhantomData,
        })
    }

    /// Append one record, assigning it the next monotonic key. Returns the
    /// key so callers can cross-reference (e.g. the Ledger Writer logging
    /// which key a dropped-on-backpressure observation would have taken).
    #[instrument(skip(self, record), fields(ts_millis))]
    pub fn append(&self, ts_millis: i64, record: &T) -> Result<String> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("{:020}:{:010}", ts_millis.max(0) as u64, seq);
        let bytes = bincode::serialize(record)?;
        self.tree.insert(key.as_bytes(), bytes)?;
        self.tree.flush()?;
        Ok(key)
    }

    /// Iterate every record in key (insertion) order.
    pub fn iter_all(&self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (_k, v) = entry?;
            out.push(bincode::deserialize(&v)?);
        }
        Ok(out)
    }

    /// Iterate records whose millisecond timestamp key falls in
    /// `[from_ts_millis, to_ts_millis)`.
    pub fn iter_range(&self, from_ts_millis: i64, to_ts_millis: i64) -> Result<Vec<T>> {
        let start = format!("{:020}:{:010}", from_ts_millis.max(0) as u64, 0);
        let end = format!("{:020}:{:010}", to_ts_millis.max(0) as u64, 0);
        let mut out = Vec::new();
        for entry in self.tree.range(start.as_bytes().to_vec()..end.as_bytes().to_vec()) {
            let (_k, v) = entry?;
            out.push(bincode::deserialize(&v)?);
        }
        Ok(out)
    }

    /// Total number of records ever appended (this process's view).
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the store currently holds no records.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn append_and_iter_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let store: LedgerStore<Sample> = LedgerStore::open(dir.path(), "fitness_ledger").unwrap();
        for v in 0..5u32 {
            store.append(1_000 + v as i64, &Sample { value: v }).unwrap();
        }
        let all = store.iter_all().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].value, 0);
        assert_eq!(all[4].value, 4);
    }

    #[test]
    fn range_query_filters_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store: LedgerStore<Sample> = LedgerStore::open(dir.path(), "fitness_ledger").unwrap();
        for v in 0..10u32 {
            store.append(v as i64 * 100, &Sample { value: v }).unwrap();
        }
        let subset = store.iter_range(200, 500).unwrap();
        assert_eq!(subset.iter().map(|s| s.value).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn reopening_continues_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store: LedgerStore<Sample> = LedgerStore::open(dir.path(), "fitness_ledger").unwrap();
            store.append(1, &Sample { value: 1 }).unwrap();
        }
        let store: LedgerStore<Sample> = LedgerStore::open(dir.path(), "fitness_ledger").unwrap();
        store.append(2, &Sample { value: 2 }).unwrap();
        assert_eq!(store.len(), 2);
    }
}
