//! Histogram segments and the adaptive run-merging rule.
//!
//! A segment covers one fixed-width time bucket of one column value and
//! holds sorted, non-overlapping `(delta-start, delta-stop, count)`
//! records, deltas relative to the segment base time. [`merge`] folds one
//! new event into a record list: arrivals within the normal packet jitter
//! extend an existing record, true gaps start a new one.
//!
//! # On-disk encoding
//!
//! Per record, both versions big-endian:
//!
//! ```text
//! V1 (10 bytes)                      V2 (12 bytes)
//! +--------+--------+------+         +--------+--------+--------+
//! | dstart | dstop  | count|         | dstart | dstop  | count  |
//! | i32    | i32    | u16  |         | u32    | u32    | u32    |
//! +--------+--------+------+         +--------+--------+--------+
//! ```
//!
//! V1 buckets are one hour and its segment index is the plain truncated
//! quotient, so negative timestamps produce negative indices and deltas
//! and do not collate correctly against positive ones. V2 buckets are
//! 2^22 ms and the index is taken from the sign-inverted timestamp, which
//! orders correctly across the epoch.

use crate::codec::ByteReader;
use crate::error::{CairnError, Result};

/// Slack in ms between events before they count as a gap, not jitter.
pub const LOSS_TIME: i64 = 1_000;

/// Gap in ms above which two events are never coalesced.
pub const MAX_INTERVAL: i64 = 120_000;

const V1_SEGMENT_WIDTH: i64 = 3_600_000;
const V2_SEGMENT_SHIFT: u32 = 22;
const SIGN64: u64 = 1 << 63;

/// One coalesced run: delta times from the segment base, in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegRecord {
    /// Delta of the first event from the segment base.
    pub dstart: i64,
    /// Delta of the last event from the segment base.
    pub dstop: i64,
    /// Number of events in the run.
    pub count: u32,
}

impl SegRecord {
    fn singleton(dtime: i64) -> Self {
        Self {
            dstart: dtime,
            dstop: dtime,
            count: 1,
        }
    }
}

/// Folds one event at `dtime` into a sorted record list, returning the new
/// list. Pure: the input is never mutated, two calls with equal inputs
/// give equal outputs.
pub fn merge(records: &[SegRecord], dtime: i64) -> Vec<SegRecord> {
    let mut left: Option<usize> = None;
    let mut right: Option<usize> = None;
    for (i, r) in records.iter().enumerate() {
        if dtime >= r.dstart {
            if dtime <= r.dstop {
                // duplicate arrival inside an existing run
                let mut out = records.to_vec();
                out[i].count += 1;
                return out;
            }
            left = Some(i);
        } else {
            right = Some(i);
            break;
        }
    }

    let merge_left = left.is_some_and(|i| can_extend(&records[i], dtime - records[i].dstop));
    let merge_right = right.is_some_and(|i| can_extend(&records[i], records[i].dstart - dtime));

    let (merge_left, merge_right) = if merge_left && merge_right {
        select_best_merge(dtime, &records[left.unwrap()], &records[right.unwrap()])
    } else {
        (merge_left, merge_right)
    };

    let mut out = records.to_vec();
    match (merge_left, merge_right) {
        (true, true) => {
            let (li, ri) = (left.unwrap(), right.unwrap());
            out[li] = SegRecord {
                dstart: out[li].dstart,
                dstop: out[ri].dstop,
                count: out[li].count + out[ri].count + 1,
            };
            out.remove(ri);
        }
        (true, false) => {
            let li = left.unwrap();
            out[li].dstop = dtime;
            out[li].count += 1;
        }
        (false, true) => {
            let ri = right.unwrap();
            out[ri].dstart = dtime;
            out[ri].count += 1;
        }
        (false, false) => {
            let at = match (left, right) {
                (Some(li), _) => li + 1,
                (None, Some(ri)) => ri,
                (None, None) => 0,
            };
            out.insert(at, SegRecord::singleton(dtime));
        }
    }
    out
}

/// Whether a record absorbs an event `gap` ms away from its near edge: the
/// gap must be under [`MAX_INTERVAL`], and under the record's average
/// inter-arrival interval plus [`LOSS_TIME`] (a single-point record has no
/// interval yet and absorbs anything under [`MAX_INTERVAL`]).
fn can_extend(r: &SegRecord, gap: i64) -> bool {
    if gap >= MAX_INTERVAL {
        return false;
    }
    if r.count == 1 {
        return true;
    }
    let avg_interval = (r.dstop - r.dstart) / i64::from(r.count - 1);
    gap < avg_interval + LOSS_TIME
}

/// Both sides qualify: keep both only when the gaps are within
/// [`LOSS_TIME`] of each other, otherwise the smaller gap wins.
fn select_best_merge(dtime: i64, left: &SegRecord, right: &SegRecord) -> (bool, bool) {
    let gap_left = dtime - left.dstop;
    let gap_right = right.dstart - dtime;
    if (gap_left - gap_right).abs() >= LOSS_TIME {
        if gap_left < gap_right {
            (true, false)
        } else {
            (false, true)
        }
    } else {
        (true, true)
    }
}

/// Segment time grid and record field widths, fixed per table at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HistogramVersion {
    /// Hour segments, 16-bit counts. Legacy: kept readable, writes should
    /// use V2.
    V1 = 1,
    /// 2^22 ms segments indexed from the sign-inverted timestamp, 32-bit
    /// counts.
    V2 = 2,
}

impl HistogramVersion {
    /// Creates a HistogramVersion from its on-disk number.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// The segment index containing `time`.
    pub fn segment_index(&self, time: i64) -> i64 {
        match self {
            HistogramVersion::V1 => time / V1_SEGMENT_WIDTH,
            HistogramVersion::V2 => (((time as u64) ^ SIGN64) >> V2_SEGMENT_SHIFT) as i64,
        }
    }

    /// The base time of segment `index`.
    pub fn segment_start(&self, index: i64) -> i64 {
        match self {
            HistogramVersion::V1 => index * V1_SEGMENT_WIDTH,
            HistogramVersion::V2 => (((index as u64) << V2_SEGMENT_SHIFT) ^ SIGN64) as i64,
        }
    }

    /// The delta of `time` from its segment's base. For V1 this follows
    /// the truncated division of the index, so negative times yield
    /// negative deltas; V2 deltas are always in `[0, 2^22)`.
    pub fn delta_time(&self, time: i64) -> i64 {
        match self {
            HistogramVersion::V1 => time % V1_SEGMENT_WIDTH,
            HistogramVersion::V2 => time - self.segment_start(self.segment_index(time)),
        }
    }

    /// Encoded record width in bytes.
    pub fn record_width(&self) -> usize {
        match self {
            HistogramVersion::V1 => 10,
            HistogramVersion::V2 => 12,
        }
    }

    /// Serializes a record list. V1 counts saturate at their 16-bit cap.
    pub fn encode_records(&self, records: &[SegRecord]) -> Vec<u8> {
        let mut out = Vec::with_capacity(records.len() * self.record_width());
        for r in records {
            match self {
                HistogramVersion::V1 => {
                    out.extend_from_slice(&(r.dstart as i32).to_be_bytes());
                    out.extend_from_slice(&(r.dstop as i32).to_be_bytes());
                    out.extend_from_slice(&(r.count.min(u32::from(u16::MAX)) as u16).to_be_bytes());
                }
                HistogramVersion::V2 => {
                    out.extend_from_slice(&(r.dstart as u32).to_be_bytes());
                    out.extend_from_slice(&(r.dstop as u32).to_be_bytes());
                    out.extend_from_slice(&r.count.to_be_bytes());
                }
            }
        }
        out
    }

    /// Deserializes a record list; a trailing partial record is corruption.
    pub fn decode_records(&self, bytes: &[u8]) -> Result<Vec<SegRecord>> {
        let width = self.record_width();
        if bytes.len() % width != 0 {
            return Err(CairnError::corruption(
                "",
                "",
                bytes.len() - bytes.len() % width,
                format!(
                    "segment length {} is not a multiple of the {width}-byte record",
                    bytes.len()
                ),
            ));
        }
        let mut r = ByteReader::new(bytes);
        let mut out = Vec::with_capacity(bytes.len() / width);
        while r.remaining() > 0 {
            out.push(match self {
                HistogramVersion::V1 => SegRecord {
                    dstart: i64::from(r.read_u32()? as i32),
                    dstop: i64::from(r.read_u32()? as i32),
                    count: u32::from(r.read_u16()?),
                },
                HistogramVersion::V2 => SegRecord {
                    dstart: i64::from(r.read_u32()?),
                    dstop: i64::from(r.read_u32()?),
                    count: r.read_u32()?,
                },
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(times: &[i64]) -> Vec<SegRecord> {
        times.iter().fold(Vec::new(), |acc, &t| merge(&acc, t))
    }

    #[test]
    fn test_merge_coalesces_jitter_and_splits_gaps() {
        let records = feed(&[0, 500, 1000, 130_000]);
        assert_eq!(
            records,
            vec![
                SegRecord { dstart: 0, dstop: 1000, count: 3 },
                SegRecord { dstart: 130_000, dstop: 130_000, count: 1 },
            ]
        );
    }

    #[test]
    fn test_merge_is_order_independent() {
        let forward = feed(&[0, 500, 1000, 130_000]);
        let backward = feed(&[130_000, 1000, 500, 0]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_duplicate_inside_run_only_bumps_count() {
        let records = feed(&[0, 500, 1000, 500]);
        assert_eq!(records, vec![SegRecord { dstart: 0, dstop: 1000, count: 4 }]);
    }

    #[test]
    fn test_event_between_two_runs_merges_both() {
        // singletons 10s apart, event dead center: both gaps equal within
        // the loss tolerance, so everything coalesces into one run
        let base = vec![
            SegRecord { dstart: 0, dstop: 0, count: 1 },
            SegRecord { dstart: 10_000, dstop: 10_000, count: 1 },
        ];
        let out = merge(&base, 5_000);
        assert_eq!(out, vec![SegRecord { dstart: 0, dstop: 10_000, count: 3 }]);
    }

    #[test]
    fn test_closer_side_wins_when_gaps_differ() {
        let base = vec![
            SegRecord { dstart: 0, dstop: 0, count: 1 },
            SegRecord { dstart: 50_000, dstop: 50_000, count: 1 },
        ];
        // 10s to the left run, 40s to the right one
        let out = merge(&base, 10_000);
        assert_eq!(
            out,
            vec![
                SegRecord { dstart: 0, dstop: 10_000, count: 2 },
                SegRecord { dstart: 50_000, dstop: 50_000, count: 1 },
            ]
        );
    }

    #[test]
    fn test_merge_does_not_mutate_input() {
        let base = vec![SegRecord { dstart: 0, dstop: 0, count: 1 }];
        let snapshot = base.clone();
        let _ = merge(&base, 500);
        assert_eq!(base, snapshot);
    }

    #[test]
    fn test_established_rate_rejects_slow_arrival() {
        // 10 points at 100ms cadence: average interval 100ms, so an event
        // 2s later is a gap even though 2s < MAX_INTERVAL
        let times: Vec<i64> = (0..10).map(|i| i * 100).collect();
        let mut records = feed(&times);
        records = merge(&records, 900 + 2000);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], SegRecord { dstart: 2900, dstop: 2900, count: 1 });
    }

    #[test]
    fn test_v2_segment_index_orders_across_epoch() {
        let v = HistogramVersion::V2;
        let times = [i64::MIN, -1, 0, 1, i64::MAX];
        let idx: Vec<i64> = times.iter().map(|&t| v.segment_index(t)).collect();
        let mut sorted = idx.clone();
        sorted.sort_unstable();
        assert_eq!(idx, sorted);
        for &t in &times {
            let d = v.delta_time(t);
            assert!((0..(1 << V2_SEGMENT_SHIFT)).contains(&d));
            assert_eq!(v.segment_start(v.segment_index(t)) + d, t);
        }
    }

    #[test]
    fn test_v1_segment_math_reconstructs_time() {
        let v = HistogramVersion::V1;
        for t in [-7_200_001, -1, 0, 1, 3_599_999, 3_600_000, 7_250_000] {
            assert_eq!(v.segment_start(v.segment_index(t)) + v.delta_time(t), t);
        }
    }

    #[test]
    fn test_record_encoding_roundtrip_both_versions() {
        let records = vec![
            SegRecord { dstart: 0, dstop: 1000, count: 3 },
            SegRecord { dstart: 130_000, dstop: 200_000, count: 70_000 },
        ];
        let v2 = HistogramVersion::V2;
        assert_eq!(v2.decode_records(&v2.encode_records(&records)).unwrap(), records);

        // V1 saturates the 16-bit count and keeps signed deltas
        let v1 = HistogramVersion::V1;
        let v1_records = vec![SegRecord { dstart: -500, dstop: -100, count: 2 }];
        assert_eq!(
            v1.decode_records(&v1.encode_records(&v1_records)).unwrap(),
            v1_records
        );
        let decoded = v1.decode_records(&v1.encode_records(&records)).unwrap();
        assert_eq!(decoded[1].count, u32::from(u16::MAX));
    }

    #[test]
    fn test_partial_record_is_corruption() {
        let v = HistogramVersion::V2;
        let mut bytes = v.encode_records(&[SegRecord { dstart: 0, dstop: 1, count: 1 }]);
        bytes.pop();
        assert!(matches!(
            v.decode_records(&bytes),
            Err(CairnError::Corruption { .. })
        ));
    }
}
