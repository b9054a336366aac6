//! Contract with the underlying ordered key-value store.
//!
//! The engine never owns storage: rows, table definitions, sequences and
//! histogram segments are all persisted through this trait. Any store that
//! keeps keys in unsigned lexicographic byte order works (RocksDB column
//! families, LMDB, an in-memory tree). [`MemKv`] is the reference
//! implementation used throughout the test suite.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::error::Result;

/// Traversal direction for [`KvStore::range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Reverse,
}

/// Minimal ordered KV contract consumed by the engine.
///
/// Implementations must keep keys sorted by unsigned lexicographic byte
/// comparison; everything the engine guarantees about row ordering rests on
/// that. All calls are synchronous; retry and cancellation belong to the
/// caller.
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes `key` if present.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Iterates `(key, value)` pairs with `start <= key < end` in the given
    /// direction; `end: None` scans to the last key in the store.
    ///
    /// The iterator owns whatever snapshot or cursor the store needs;
    /// dropping it mid-iteration must release those resources.
    fn range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        direction: Direction,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send + '_>>;
}

/// In-memory ordered store backed by a `BTreeMap`.
///
/// Reference implementation of [`KvStore`]; range reads operate on a
/// snapshot taken when the iterator is created, so concurrent writes never
/// tear an in-flight scan.
#[derive(Default)]
pub struct MemKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvStore for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        direction: Direction,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send + '_>> {
        let map = self.map.read();
        let upper = match end {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = map
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        match direction {
            Direction::Forward => Ok(Box::new(snapshot.into_iter())),
            Direction::Reverse => Ok(Box::new(snapshot.into_iter().rev())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let kv = MemKv::new();
        kv.put(b"a", b"1").unwrap();
        kv.put(b"b", b"2").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        kv.delete(b"a").unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
        assert_eq!(kv.len(), 1);
    }

    #[test]
    fn test_range_is_byte_ordered() {
        let kv = MemKv::new();
        kv.put(&[0x01], b"a").unwrap();
        kv.put(&[0x7f], b"b").unwrap();
        kv.put(&[0x80], b"c").unwrap();
        kv.put(&[0xff], b"d").unwrap();

        let keys: Vec<_> = kv
            .range(&[0x00], None, Direction::Forward)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![vec![0x01], vec![0x7f], vec![0x80], vec![0xff]]);

        let keys: Vec<_> = kv
            .range(&[0x02], Some([0xff].as_slice()), Direction::Reverse)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![vec![0x80], vec![0x7f]]);
    }
}
