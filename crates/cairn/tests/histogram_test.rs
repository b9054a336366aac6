//! Integration tests for the histogram index against an in-memory store:
//! write-time coalescing, arrival-order independence, and stability of
//! both segment encodings across the negative/positive time boundary.

use std::sync::Arc;

use cairn::{HistogramIndex, HistogramRecord, HistogramVersion, KvStore, MemKv};

fn index(version: HistogramVersion) -> HistogramIndex {
    let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
    HistogramIndex::new(kv, 1, version)
}

fn records(h: &HistogramIndex) -> Vec<HistogramRecord> {
    h.iterator(None, None, 0).unwrap().map(|r| r.unwrap()).collect()
}

#[test]
fn test_loss_and_gap_thresholds_in_order() {
    let h = index(HistogramVersion::V2);
    for t in [0, 500, 1000, 130_000] {
        h.add_value(b"pkt", t).unwrap();
    }
    let got = records(&h);
    assert_eq!(got.len(), 2);
    assert_eq!((got[0].start, got[0].stop, got[0].count), (0, 1000, 3));
    assert_eq!((got[1].start, got[1].stop, got[1].count), (130_000, 130_000, 1));
}

#[test]
fn test_reverse_arrival_gives_identical_records() {
    let forward = index(HistogramVersion::V2);
    let backward = index(HistogramVersion::V2);
    for t in [0, 500, 1000, 130_000] {
        forward.add_value(b"pkt", t).unwrap();
    }
    for t in [130_000, 1000, 500, 0] {
        backward.add_value(b"pkt", t).unwrap();
    }
    assert_eq!(records(&forward), records(&backward));
}

#[test]
fn test_v2_stable_across_epoch_boundary() {
    let h = index(HistogramVersion::V2);
    // same burst shape on both sides of time zero
    for base in [-10_000_000_000i64, 10_000_000_000] {
        for dt in [0, 400, 800] {
            h.add_value(b"pkt", base + dt).unwrap();
        }
    }
    let got = records(&h);
    assert_eq!(got.len(), 2);
    assert_eq!((got[0].start, got[0].stop, got[0].count), (-10_000_000_000, -9_999_999_200, 3));
    assert_eq!((got[1].start, got[1].stop, got[1].count), (10_000_000_000, 10_000_000_800, 3));
}

#[test]
fn test_v1_positive_times_roundtrip() {
    let h = index(HistogramVersion::V1);
    // spread across two hour segments
    for t in [100, 600, 3_600_100, 3_600_600] {
        h.add_value(b"pkt", t).unwrap();
    }
    let got = records(&h);
    assert_eq!(got.len(), 2);
    assert_eq!((got[0].start, got[0].stop, got[0].count), (100, 600, 2));
    assert_eq!((got[1].start, got[1].stop, got[1].count), (3_600_100, 3_600_600, 2));
}

#[test]
fn test_per_column_value_separation() {
    let h = index(HistogramVersion::V2);
    for t in [0, 200, 400] {
        h.add_value(b"pkt_a", t).unwrap();
        h.add_value(b"pkt_b", t + 100).unwrap();
    }
    let got = records(&h);
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].column_value, b"pkt_a".to_vec());
    assert_eq!((got[0].start, got[0].stop, got[0].count), (0, 400, 3));
    assert_eq!(got[1].column_value, b"pkt_b".to_vec());
    assert_eq!((got[1].start, got[1].stop, got[1].count), (100, 500, 3));
}

#[test]
fn test_iterator_early_drop_is_clean() {
    let h = index(HistogramVersion::V2);
    for t in 0..50 {
        h.add_value(b"pkt", t * 300_000).unwrap();
    }
    let mut it = h.iterator(None, None, 0).unwrap();
    let first = it.next().unwrap().unwrap();
    assert_eq!(first.start, 0);
    drop(it);
    // the index stays usable after an abandoned scan
    assert!(!records(&h).is_empty());
}
