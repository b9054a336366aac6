//! Histogram index: per column value, coalesced arrival-count records.
//!
//! Answers "how many rows with column value V exist between A and B"
//! without touching the primary data. Events are folded into fixed-width
//! time segments of coalesced records, stored under
//!
//! ```text
//! +------------------+------------------+=====================+
//! | tablespace (u32) | segment idx (u64)|  column value bytes |
//! +------------------+------------------+=====================+
//! ```
//!
//! so one KV range scan visits all column values of one segment before
//! the next segment. Read iteration re-sorts records across column
//! values into a single time-ordered stream.

mod segment;

pub use segment::{merge, HistogramVersion, SegRecord, LOSS_TIME, MAX_INTERVAL};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::kv::{Direction, KvStore};

const LOCK_STRIPES: usize = 16;
const KEY_PREFIX_LEN: usize = 4 + 8;

/// One time-ordered histogram record as yielded by iteration.
///
/// Ordering is by start time, tie-broken by the column value's byte
/// order, which is what interleaves records of different column values
/// into one chronological stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HistogramRecord {
    /// Absolute time of the first event in the run, ms.
    pub start: i64,
    /// Encoded value of the indexed column.
    pub column_value: Vec<u8>,
    /// Absolute time of the last event in the run, ms.
    pub stop: i64,
    /// Number of events in the run.
    pub count: u32,
}

/// The histogram index of one (table, column) pair.
///
/// `tablespace` namespaces this index's keys within the shared KV store;
/// the embedder assigns one per indexed column. Updates to one segment
/// are serialized on a striped lock; different segments proceed
/// concurrently.
pub struct HistogramIndex {
    kv: Arc<dyn KvStore>,
    tablespace: u32,
    version: HistogramVersion,
    stripes: Vec<Mutex<()>>,
}

impl HistogramIndex {
    /// Opens the index for `tablespace` with the given encoding version.
    pub fn new(kv: Arc<dyn KvStore>, tablespace: u32, version: HistogramVersion) -> Self {
        Self {
            kv,
            tablespace,
            version,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// The encoding version this index is pinned to.
    pub fn version(&self) -> HistogramVersion {
        self.version
    }

    /// Folds one event at `time` for `column_value` into its segment.
    pub fn add_value(&self, column_value: &[u8], time: i64) -> Result<()> {
        let index = self.version.segment_index(time);
        let dtime = self.version.delta_time(time);
        let key = self.segment_key(index, column_value);

        let _guard = self.stripes[stripe_of(&key)].lock();
        let records = match self.kv.get(&key)? {
            Some(bytes) => self.version.decode_records(&bytes)?,
            None => Vec::new(),
        };
        let merged = segment::merge(&records, dtime);
        trace!(
            tablespace = self.tablespace,
            index,
            records = merged.len(),
            "histogram segment updated"
        );
        self.kv.put(&key, &self.version.encode_records(&merged))
    }

    /// Time-ordered iteration over `[start, stop]` (either bound may be
    /// open). Records whose gap to their predecessor is under `merge_time`
    /// ms are coalesced at read time, independently of the write-time loss
    /// tolerance.
    pub fn iterator(
        &self,
        start: Option<i64>,
        stop: Option<i64>,
        merge_time: i64,
    ) -> Result<HistogramIterator<'_>> {
        let mut scan_start = self.tablespace.to_be_bytes().to_vec();
        if let Some(t) = start {
            scan_start.extend_from_slice(&(self.version.segment_index(t) as u64).to_be_bytes());
        }
        let scan_end = prefix_successor(&self.tablespace.to_be_bytes());
        let kv_iter = self
            .kv
            .range(&scan_start, scan_end.as_deref(), Direction::Forward)?;
        Ok(HistogramIterator {
            version: self.version,
            start,
            stop,
            merge_time,
            kv_iter,
            pending: None,
            current: Vec::new().into_iter(),
            finished: false,
        })
    }

    fn segment_key(&self, index: i64, column_value: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(KEY_PREFIX_LEN + column_value.len());
        key.extend_from_slice(&self.tablespace.to_be_bytes());
        key.extend_from_slice(&(index as u64).to_be_bytes());
        key.extend_from_slice(column_value);
        key
    }
}

fn stripe_of(key: &[u8]) -> usize {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() as usize) % LOCK_STRIPES
}

/// The first key past every key starting with `prefix`, or `None` when the
/// prefix is all `0xFF` and no such key exists.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last == 0xFF {
            end.pop();
        } else {
            *last += 1;
            return Some(end);
        }
    }
    None
}

/// Streams [`HistogramRecord`]s in `(start, column_value)` order.
///
/// Segments are stored per column value, so records of one time span are
/// scattered across adjacent keys; the iterator reads one segment index
/// worth of keys at a time and re-sorts in memory. Dropping it mid-way
/// releases the KV cursor.
pub struct HistogramIterator<'a> {
    version: HistogramVersion,
    start: Option<i64>,
    stop: Option<i64>,
    merge_time: i64,
    kv_iter: Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send + 'a>,
    pending: Option<(i64, Vec<u8>, Vec<u8>)>,
    current: std::vec::IntoIter<HistogramRecord>,
    finished: bool,
}

impl HistogramIterator<'_> {
    fn next_entry(&mut self) -> Option<(i64, Vec<u8>, Vec<u8>)> {
        if let Some(entry) = self.pending.take() {
            return Some(entry);
        }
        // keys too short for the prefix cannot be ours
        loop {
            let (key, value) = self.kv_iter.next()?;
            if key.len() >= KEY_PREFIX_LEN {
                return Some(parse_key(&key, value));
            }
        }
    }

    /// Loads all segments sharing the next segment index and re-sorts
    /// their records. Returns false when the scan is exhausted.
    fn load_next_group(&mut self) -> Result<bool> {
        let Some((index, columnv, bytes)) = self.next_entry() else {
            return Ok(false);
        };
        let mut group = Vec::new();
        self.append_records(index, columnv, &bytes, &mut group)?;
        loop {
            match self.next_entry() {
                None => break,
                Some((i, columnv, bytes)) if i == index => {
                    self.append_records(i, columnv, &bytes, &mut group)?;
                }
                Some(entry) => {
                    self.pending = Some(entry);
                    break;
                }
            }
        }
        group.sort();
        self.current = group.into_iter();
        Ok(true)
    }

    /// Decodes one segment, coalescing runs whose gap is under the
    /// read-time merge threshold.
    fn append_records(
        &self,
        index: i64,
        columnv: Vec<u8>,
        bytes: &[u8],
        out: &mut Vec<HistogramRecord>,
    ) -> Result<()> {
        let base = self.version.segment_start(index);
        let mut acc: Option<HistogramRecord> = None;
        for seg in self.version.decode_records(bytes)? {
            let start = base + seg.dstart;
            let stop = base + seg.dstop;
            match acc.as_mut() {
                Some(r) if start - r.stop < self.merge_time => {
                    r.stop = stop;
                    r.count += seg.count;
                }
                Some(r) => {
                    out.push(r.clone());
                    *r = HistogramRecord {
                        start,
                        column_value: columnv.clone(),
                        stop,
                        count: seg.count,
                    };
                }
                None => {
                    acc = Some(HistogramRecord {
                        start,
                        column_value: columnv.clone(),
                        stop,
                        count: seg.count,
                    });
                }
            }
        }
        if let Some(r) = acc {
            out.push(r);
        }
        Ok(())
    }
}

fn parse_key(key: &[u8], value: Vec<u8>) -> (i64, Vec<u8>, Vec<u8>) {
    let mut index_bytes = [0u8; 8];
    index_bytes.copy_from_slice(&key[4..KEY_PREFIX_LEN]);
    (
        u64::from_be_bytes(index_bytes) as i64,
        key[KEY_PREFIX_LEN..].to_vec(),
        value,
    )
}

impl Iterator for HistogramIterator<'_> {
    type Item = Result<HistogramRecord>;

    fn next(&mut self) -> Option<Result<HistogramRecord>> {
        loop {
            if self.finished {
                return None;
            }
            match self.current.next() {
                Some(r) => {
                    if let Some(t) = self.start {
                        if r.stop < t {
                            continue;
                        }
                    }
                    if let Some(t) = self.stop {
                        if r.start > t {
                            self.finished = true;
                            return None;
                        }
                    }
                    return Some(Ok(r));
                }
                None => match self.load_next_group() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.finished = true;
                        return None;
                    }
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                },
            }
        }
    }
}
