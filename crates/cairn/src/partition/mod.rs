//! Time/value partitioning.
//!
//! A table's rows can be bucketed along two independent axes: a time axis
//! (the first key column, bucketed by a [`TimePartitionSchema`]) and a
//! value axis (one designated column; one partition per distinct value).
//! One time bucket is an interval; the interval holds the value
//! partitions active in that time range. Tables without a time axis have
//! a single implicit interval spanning all of time.
//!
//! Partitions are created when the first row lands in a time×value
//! combination and are immutable once handed out. The manager itself is
//! an in-memory registry; the physical realization of a partition (a key
//! range or a directory) belongs to the storage layer above.

mod time_schema;

pub use time_schema::{TimePartitionInfo, TimePartitionSchema};

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::codec::{read_string, write_string, ByteReader, ByteSink};
use crate::error::{CairnError, Result};

/// How a table's rows are split into partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitioningSpec {
    /// Single partition for everything.
    None,
    /// Bucketed by the time column only.
    Time {
        /// Name of the timestamp column driving the buckets.
        column: String,
        /// Bucket granularity.
        schema: TimePartitionSchema,
    },
    /// One partition per distinct value of one column.
    Value {
        /// Name of the column whose values split the table.
        column: String,
    },
    /// Both axes.
    TimeAndValue {
        /// Name of the timestamp column driving the buckets.
        time_column: String,
        /// Bucket granularity.
        schema: TimePartitionSchema,
        /// Name of the column whose values split each bucket.
        value_column: String,
    },
}

impl PartitioningSpec {
    /// The time column, if the spec has a time axis.
    pub fn time_column(&self) -> Option<&str> {
        match self {
            PartitioningSpec::Time { column, .. } => Some(column),
            PartitioningSpec::TimeAndValue { time_column, .. } => Some(time_column),
            _ => None,
        }
    }

    /// The time granularity, if the spec has a time axis.
    pub fn time_schema(&self) -> Option<TimePartitionSchema> {
        match self {
            PartitioningSpec::Time { schema, .. }
            | PartitioningSpec::TimeAndValue { schema, .. } => Some(*schema),
            _ => None,
        }
    }

    /// The value column, if the spec has a value axis.
    pub fn value_column(&self) -> Option<&str> {
        match self {
            PartitioningSpec::Value { column } => Some(column),
            PartitioningSpec::TimeAndValue { value_column, .. } => Some(value_column),
            _ => None,
        }
    }

    /// Follows a column rename through the spec.
    pub(crate) fn rename_column(self, old: &str, new: &str) -> Self {
        let fix = |c: String| if c == old { new.to_string() } else { c };
        match self {
            PartitioningSpec::None => PartitioningSpec::None,
            PartitioningSpec::Time { column, schema } => PartitioningSpec::Time {
                column: fix(column),
                schema,
            },
            PartitioningSpec::Value { column } => PartitioningSpec::Value { column: fix(column) },
            PartitioningSpec::TimeAndValue {
                time_column,
                schema,
                value_column,
            } => PartitioningSpec::TimeAndValue {
                time_column: fix(time_column),
                schema,
                value_column: fix(value_column),
            },
        }
    }

    pub(crate) fn encode<S: ByteSink>(&self, out: &mut S) -> Result<()> {
        match self {
            PartitioningSpec::None => out.write_u8(0),
            PartitioningSpec::Time { column, schema } => {
                out.write_u8(1)?;
                write_string(column, out)?;
                write_string(schema.name(), out)
            }
            PartitioningSpec::Value { column } => {
                out.write_u8(2)?;
                write_string(column, out)
            }
            PartitioningSpec::TimeAndValue {
                time_column,
                schema,
                value_column,
            } => {
                out.write_u8(3)?;
                write_string(time_column, out)?;
                write_string(schema.name(), out)?;
                write_string(value_column, out)
            }
        }
    }

    pub(crate) fn decode(r: &mut ByteReader) -> Result<Self> {
        let at = r.position();
        match r.read_u8()? {
            0 => Ok(PartitioningSpec::None),
            1 => Ok(PartitioningSpec::Time {
                column: read_string(r)?,
                schema: TimePartitionSchema::from_name(&read_string(r)?)?,
            }),
            2 => Ok(PartitioningSpec::Value {
                column: read_string(r)?,
            }),
            3 => Ok(PartitioningSpec::TimeAndValue {
                time_column: read_string(r)?,
                schema: TimePartitionSchema::from_name(&read_string(r)?)?,
                value_column: read_string(r)?,
            }),
            other => Err(CairnError::corruption(
                "",
                "",
                at,
                format!("unknown partitioning kind {other}"),
            )),
        }
    }
}

/// A value-partition discriminator, comparable so partitions within an
/// interval have a stable order. Enum column values are carried as their
/// dictionary index, never as the string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartitionValue {
    /// BYTE column value.
    Byte(i8),
    /// SHORT column value.
    Short(i16),
    /// INT column value.
    Int(i32),
    /// ENUM column value, as its dictionary index.
    Enum(u16),
    /// STRING column value.
    String(String),
}

impl std::fmt::Display for PartitionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionValue::Byte(v) => write!(f, "{v}"),
            PartitionValue::Short(v) => write!(f, "{v}"),
            PartitionValue::Int(v) => write!(f, "{v}"),
            PartitionValue::Enum(v) => write!(f, "{v}"),
            PartitionValue::String(v) => write!(f, "{v}"),
        }
    }
}

/// One physical partition, immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Inclusive start of the time bucket; `i64::MIN` without a time axis.
    pub start: i64,
    /// Exclusive end of the time bucket; `i64::MAX` without a time axis.
    pub end: i64,
    /// Directory name of the time bucket, if time-partitioned.
    pub dir: Option<String>,
    /// Value discriminator, if value-partitioned.
    pub value: Option<PartitionValue>,
}

/// One time bucket and its matching partitions, as yielded by iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInterval {
    /// Inclusive start of the bucket, ms.
    pub start: i64,
    /// Exclusive end of the bucket, ms.
    pub end: i64,
    /// Directory name of the bucket, if time-partitioned.
    pub dir: Option<String>,
    /// Partitions matching the iteration filter, in value order.
    pub partitions: Vec<Partition>,
}

struct Interval {
    start: i64,
    end: i64,
    dir: Option<String>,
    partitions: BTreeMap<Option<PartitionValue>, Partition>,
}

/// Registry of a table's partitions, keyed by interval start.
///
/// Thread-safe: lookups take a read lock, partition creation a write
/// lock. Iteration snapshots the matching intervals up front, so an
/// iterator never observes partitions created after it was opened and
/// holds no lock while being consumed.
pub struct PartitionManager {
    spec: PartitioningSpec,
    intervals: RwLock<BTreeMap<i64, Interval>>,
}

impl PartitionManager {
    /// Creates an empty manager for `spec`.
    pub fn new(spec: PartitioningSpec) -> Self {
        Self {
            spec,
            intervals: RwLock::new(BTreeMap::new()),
        }
    }

    /// The spec this manager was built for.
    pub fn spec(&self) -> &PartitioningSpec {
        &self.spec
    }

    /// Returns the partition for a row's coordinates, creating it if this
    /// is the first row in that time×value combination.
    pub fn create_and_get_partition(
        &self,
        instant: Option<i64>,
        value: Option<PartitionValue>,
    ) -> Result<Partition> {
        let (start, end, dir) = match self.spec.time_schema() {
            Some(schema) => {
                let instant = instant.ok_or_else(|| {
                    CairnError::Schema("time-partitioned table needs an instant".to_string())
                })?;
                let info = schema.partition_for(instant)?;
                (info.start, info.end, Some(info.dir))
            }
            None => (i64::MIN, i64::MAX, None),
        };
        if self.spec.value_column().is_some() && value.is_none() {
            return Err(CairnError::Schema(
                "value-partitioned table needs a partition value".to_string(),
            ));
        }

        {
            let intervals = self.intervals.read();
            if let Some(p) = intervals
                .get(&start)
                .and_then(|iv| iv.partitions.get(&value))
            {
                return Ok(p.clone());
            }
        }

        let mut intervals = self.intervals.write();
        let interval = intervals.entry(start).or_insert_with(|| Interval {
            start,
            end,
            dir: dir.clone(),
            partitions: BTreeMap::new(),
        });
        let partition = interval
            .partitions
            .entry(value.clone())
            .or_insert_with(|| {
                debug!(start, end, partition_value = ?value, "creating partition");
                Partition {
                    start,
                    end,
                    dir,
                    value,
                }
            });
        Ok(partition.clone())
    }

    /// Re-registers a partition discovered by the storage layer at load
    /// time (for example by parsing on-disk directory names back through
    /// the time schema).
    pub fn register_partition(&self, partition: Partition) {
        let mut intervals = self.intervals.write();
        let interval = intervals
            .entry(partition.start)
            .or_insert_with(|| Interval {
                start: partition.start,
                end: partition.end,
                dir: partition.dir.clone(),
                partitions: BTreeMap::new(),
            });
        interval
            .partitions
            .entry(partition.value.clone())
            .or_insert(partition);
    }

    /// Ascending iteration over intervals. With `start` given, intervals
    /// entirely before it (`end <= start`) are skipped. With a filter
    /// given, each interval exposes only the matching partitions, and
    /// intervals left empty by the filter are skipped altogether.
    pub fn iterator(
        &self,
        start: Option<i64>,
        filter: Option<&[PartitionValue]>,
    ) -> PartitionIntervalIter {
        let snapshot = self.collect(start, filter, false);
        PartitionIntervalIter {
            inner: snapshot.into_iter(),
        }
    }

    /// Descending iteration. With `start` given, intervals entirely after
    /// it (`start > instant`) are skipped.
    pub fn reverse_iterator(
        &self,
        start: Option<i64>,
        filter: Option<&[PartitionValue]>,
    ) -> PartitionIntervalIter {
        let snapshot = self.collect(start, filter, true);
        PartitionIntervalIter {
            inner: snapshot.into_iter(),
        }
    }

    fn collect(
        &self,
        instant: Option<i64>,
        filter: Option<&[PartitionValue]>,
        reverse: bool,
    ) -> Vec<PartitionInterval> {
        let intervals = self.intervals.read();
        let mut out = Vec::new();
        for iv in intervals.values() {
            match instant {
                Some(t) if !reverse && iv.end <= t => continue,
                Some(t) if reverse && iv.start > t => continue,
                _ => {}
            }
            let partitions: Vec<Partition> = iv
                .partitions
                .values()
                .filter(|p| match filter {
                    None => true,
                    Some(set) => p
                        .value
                        .as_ref()
                        .is_some_and(|v| set.contains(v)),
                })
                .cloned()
                .collect();
            if partitions.is_empty() {
                continue;
            }
            out.push(PartitionInterval {
                start: iv.start,
                end: iv.end,
                dir: iv.dir.clone(),
                partitions,
            });
        }
        if reverse {
            out.reverse();
        }
        out
    }
}

/// Snapshot iterator over [`PartitionInterval`]s.
pub struct PartitionIntervalIter {
    inner: std::vec::IntoIter<PartitionInterval>,
}

impl Iterator for PartitionIntervalIter {
    type Item = PartitionInterval;

    fn next(&mut self) -> Option<PartitionInterval> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yearly_manager() -> PartitionManager {
        PartitionManager::new(PartitioningSpec::TimeAndValue {
            time_column: "gentime".into(),
            schema: TimePartitionSchema::Yyyy,
            value_column: "pname".into(),
        })
    }

    // mid-2019 .. mid-2022, one instant per year
    const YEARS: [i64; 4] = [
        1_560_000_000_000, // 2019
        1_590_000_000_000, // 2020
        1_622_000_000_000, // 2021
        1_654_000_000_000, // 2022
    ];

    #[test]
    fn test_partition_created_once_per_combination() {
        let pm = yearly_manager();
        let a = pm
            .create_and_get_partition(Some(YEARS[0]), Some(PartitionValue::Enum(0)))
            .unwrap();
        let b = pm
            .create_and_get_partition(Some(YEARS[0] + 1000), Some(PartitionValue::Enum(0)))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(pm.iterator(None, None).count(), 1);
    }

    #[test]
    fn test_jump_to_start_ascending_and_descending() {
        let pm = yearly_manager();
        for t in YEARS {
            pm.create_and_get_partition(Some(t), Some(PartitionValue::Enum(0)))
                .unwrap();
        }
        // seek inside 2021: ascending yields 2021, 2022
        let dirs: Vec<Option<String>> = pm
            .iterator(Some(YEARS[2]), None)
            .map(|iv| iv.dir)
            .collect();
        assert_eq!(
            dirs,
            vec![Some("2021".to_string()), Some("2022".to_string())]
        );
        // descending from the same point yields 2021, 2020, 2019
        let dirs: Vec<Option<String>> = pm
            .reverse_iterator(Some(YEARS[2]), None)
            .map(|iv| iv.dir)
            .collect();
        assert_eq!(
            dirs,
            vec![
                Some("2021".to_string()),
                Some("2020".to_string()),
                Some("2019".to_string())
            ]
        );
        // past the last interval: nothing
        assert_eq!(pm.iterator(Some(2_000_000_000_000), None).count(), 0);
    }

    #[test]
    fn test_filter_skips_empty_intervals() {
        let pm = yearly_manager();
        pm.create_and_get_partition(Some(YEARS[0]), Some(PartitionValue::Enum(0)))
            .unwrap();
        pm.create_and_get_partition(Some(YEARS[1]), Some(PartitionValue::Enum(1)))
            .unwrap();
        let got: Vec<PartitionInterval> = pm
            .iterator(None, Some(&[PartitionValue::Enum(1)]))
            .collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].dir.as_deref(), Some("2020"));
        assert_eq!(got[0].partitions.len(), 1);
        assert_eq!(got[0].partitions[0].value, Some(PartitionValue::Enum(1)));
    }

    #[test]
    fn test_value_only_table_has_single_implicit_interval() {
        let pm = PartitionManager::new(PartitioningSpec::Value {
            column: "pname".into(),
        });
        for v in 0..3u16 {
            pm.create_and_get_partition(None, Some(PartitionValue::Enum(v)))
                .unwrap();
        }
        let got: Vec<PartitionInterval> = pm.iterator(None, None).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].start, i64::MIN);
        assert_eq!(got[0].end, i64::MAX);
        assert_eq!(got[0].partitions.len(), 3);
        // jump-to-start is a no-op on the implicit interval
        assert_eq!(pm.iterator(Some(123), None).count(), 1);
    }

    #[test]
    fn test_missing_coordinates_are_schema_errors() {
        let pm = yearly_manager();
        assert!(matches!(
            pm.create_and_get_partition(None, Some(PartitionValue::Enum(0))),
            Err(CairnError::Schema(_))
        ));
        assert!(matches!(
            pm.create_and_get_partition(Some(0), None),
            Err(CairnError::Schema(_))
        ));
    }

    #[test]
    fn test_spec_encode_decode_roundtrip() {
        let specs = [
            PartitioningSpec::None,
            PartitioningSpec::Time {
                column: "t".into(),
                schema: TimePartitionSchema::YyyyDoy,
            },
            PartitioningSpec::Value { column: "v".into() },
            PartitioningSpec::TimeAndValue {
                time_column: "t".into(),
                schema: TimePartitionSchema::YyyyMm,
                value_column: "v".into(),
            },
        ];
        for spec in specs {
            let mut buf = Vec::new();
            spec.encode(&mut buf).unwrap();
            let mut r = ByteReader::new(&buf);
            assert_eq!(PartitioningSpec::decode(&mut r).unwrap(), spec);
        }
    }
}
