// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Storage engine integration tests: mapped vectors, timelines, timeline DB.
//!
//! Run with: `cargo test`

use tempfile::TempDir;

use henhouse::storage::db::TimelineDb;
use henhouse::storage::timeline::{Data, DataRecord, Timeline, ADD_BUCKET_BACK_LIMIT};

fn tmp_dir() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn open_tl(dir: &TempDir, resolution: u64) -> Timeline {
    Timeline::open(dir.path(), resolution).expect("open timeline")
}

fn put(tl: &mut Timeline, t: u64, c: i64) -> bool {
    tl.put(t, c).expect("put")
}

// ───────────────────── mapped vector ──────────────────────────────────────

#[test]
fn test_mapped_vec_push_and_reopen() {
    let dir = tmp_dir();
    let path = dir.path().join("_.d");

    {
        let mut vec = Data::open(&path, 4096).expect("open");
        assert!(vec.is_empty());
        assert_eq!(vec.len(), 0);

        for i in 0..3i64 {
            vec.push_back(DataRecord {
                value: i,
                integral: i,
                second_integral: i * i,
            })
            .expect("push");
        }
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.front().unwrap().value, 0);
        assert_eq!(vec.back().unwrap().value, 2);
        assert_eq!(vec.get(1).value, 1);
    }

    // Reopen: header and records must survive.
    let vec = Data::open(&path, 4096).expect("reopen");
    assert_eq!(vec.len(), 3);
    assert_eq!(vec.back().unwrap().value, 2);
}

#[test]
fn test_mapped_vec_grows_past_initial_size() {
    let dir = tmp_dir();
    let path = dir.path().join("_.d");

    // One page holds (4096 - 8) / 24 = 170 data records; push well past that.
    let mut vec = Data::open(&path, 4096).expect("open");
    for i in 0..500i64 {
        vec.push_back(DataRecord {
            value: i,
            integral: 0,
            second_integral: 0,
        })
        .expect("push");
    }
    assert_eq!(vec.len(), 500);
    assert_eq!(vec.get(499).value, 499);
    assert_eq!(vec.get(170).value, 170);

    let on_disk = std::fs::metadata(&path).expect("stat").len();
    assert!(on_disk > 4096, "file should have grown, is {on_disk} bytes");
}

// ───────────────────── timeline basics ────────────────────────────────────

#[test]
fn test_empty_timeline_summary_is_zero() {
    let dir = tmp_dir();
    let tl = open_tl(&dir, 5);

    let s = tl.summary();
    assert_eq!(s.resolution, 5);
    assert_eq!(s.from, 0);
    assert_eq!(s.to, 0);
    assert_eq!(s.sum, 0);
    assert_eq!(s.size, 0);
    assert_eq!(s.mean, 0.0);
    assert_eq!(s.variance, 0.0);
}

#[test]
fn test_empty_timeline_diff_and_get_are_zero() {
    let dir = tmp_dir();
    let tl = open_tl(&dir, 5);

    let d = tl.diff(0, 1000, 0);
    assert_eq!(d.resolution, 5);
    assert_eq!(d.sum, 0);
    assert_eq!(d.size, 0);

    let g = tl.get(123, 0);
    assert_eq!(g.query_time, 123);
    assert_eq!(g.value, DataRecord::default());
}

#[test]
fn test_basic_counter() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);

    for t in [100, 105, 110, 115] {
        assert!(put(&mut tl, t, 1));
    }

    let d = tl.diff(95, 115, 0);
    assert_eq!(d.sum, 4);
    assert_eq!(d.mean, 1.0);
    assert_eq!(d.variance, 0.0);
    assert_eq!(d.size, 4);
}

#[test]
fn test_burst_in_single_bucket() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);

    // All three land in bucket [200, 205).
    assert!(put(&mut tl, 200, 3));
    assert!(put(&mut tl, 201, 2));
    assert!(put(&mut tl, 202, 5));

    let s = tl.summary();
    assert_eq!(s.sum, 10);
    assert_eq!(s.size, 1);
    assert_eq!(s.mean, 10.0);
    assert_eq!(s.variance, 0.0);

    assert_eq!(tl.diff(200, 205, 0).sum, 10);
}

#[test]
fn test_gap_creates_second_index_range() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);

    assert!(put(&mut tl, 300, 7));
    assert!(put(&mut tl, 1000, 3));

    let s = tl.summary();
    assert_eq!(s.from, 300);
    assert_eq!(s.to, 1005);
    assert_eq!(s.size, 141);
    assert_eq!(s.sum, 10);

    // The second anchor sits at a bucket boundary at or before 1000.
    let records = tl.index.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].time, 300);
    assert_eq!(records[0].pos, 0);
    assert_eq!(records[1].pos, 1);
    assert!(records[1].time <= 1000);
    assert_eq!((records[1].time - records[0].time) % 5, 0);
}

#[test]
fn test_diff_across_gap() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);
    assert!(put(&mut tl, 300, 7));
    assert!(put(&mut tl, 1000, 3));

    let d = tl.diff(300, 1000, 0);
    assert_eq!(d.sum, 10);
    assert_eq!(d.size, 140);
    assert!(d.variance >= 0.0);
}

#[test]
fn test_diff_inside_gap_is_zero() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);
    assert!(put(&mut tl, 300, 7));
    assert!(put(&mut tl, 1000, 3));

    // Both endpoints fall in the un-materialized stretch: the left endpoint
    // steps forward and aliases the right, so aggregates are zero.
    let d = tl.diff(500, 600, 0);
    assert_eq!(d.sum, 0);
    assert_eq!(d.variance, 0.0);
    assert_eq!(d.left, d.right);
}

#[test]
fn test_same_bucket_diff_past_the_tail() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);
    assert!(put(&mut tl, 200, 3));
    assert!(put(&mut tl, 201, 2));

    // Both endpoints clamp to the single stored bucket.
    let d = tl.diff(207, 208, 0);
    assert_eq!(d.size, 0);
    assert_eq!(d.sum, 0);
    assert_eq!(d.left, d.right);
    assert_eq!(d.left.value, 5);
}

#[test]
fn test_diff_swaps_reversed_endpoints() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);
    for t in [100, 105, 110, 115] {
        assert!(put(&mut tl, t, 1));
    }

    let fwd = tl.diff(95, 115, 0);
    let rev = tl.diff(115, 95, 0);
    assert_eq!(fwd.sum, rev.sum);
    assert_eq!(fwd.size, rev.size);
    assert_eq!(fwd.mean, rev.mean);
}

#[test]
fn test_partial_window_sums_inner_buckets() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);
    assert!(put(&mut tl, 100, 2));
    assert!(put(&mut tl, 105, 3));
    assert!(put(&mut tl, 110, 5));

    // (105, 115] covers the buckets at 105 and 110.
    let d = tl.diff(105, 115, 0);
    assert_eq!(d.sum, 8);
    assert_eq!(d.size, 2);
    assert_eq!(d.mean, 4.0);

    // A window opening before the first bucket covers everything.
    let all = tl.diff(95, 110, 0);
    assert_eq!(all.sum, 10);
    assert_eq!(all.size, 3);
}

#[test]
fn test_get_resolves_times_to_buckets() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);
    assert!(put(&mut tl, 100, 1));
    assert!(put(&mut tl, 105, 2));
    assert!(put(&mut tl, 110, 3));

    // Mid-bucket time resolves to its bucket.
    let g = tl.get(106, 0);
    assert_eq!(g.value.value, 2);
    assert_eq!(g.range_time, 100);
    assert_eq!(g.pos + g.offset, 1);

    // A time before the first bucket resolves to bucket zero.
    let g = tl.get(50, 0);
    assert_eq!(g.value.value, 1);

    // A time past the tail clamps to the last bucket.
    let g = tl.get(99_999, 0);
    assert_eq!(g.value.value, 3);
}

#[test]
fn test_diff_walk_with_index_offset_hint() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);

    // Every put skips a bucket, so the index collects many ranges.
    for i in 0..50u64 {
        assert!(put(&mut tl, i * 10, 1));
    }

    // A monotone walk that threads the hint back must match fresh lookups.
    let mut hint = 0;
    let mut t = 0u64;
    while t <= 500 {
        let hinted = tl.diff(t.saturating_sub(20), t, hint);
        let fresh = tl.diff(t.saturating_sub(20), t, 0);
        assert_eq!(hinted.sum, fresh.sum, "t = {t}");
        assert_eq!(hinted.size, fresh.size, "t = {t}");
        assert_eq!(hinted.mean, fresh.mean, "t = {t}");
        hint = hinted.index_offset;
        t += 25;
    }
}

// ───────────────────── write refusal ──────────────────────────────────────

#[test]
fn test_out_of_order_put_is_refused() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);
    for t in [100, 105, 110, 115] {
        assert!(put(&mut tl, t, 1));
    }

    assert!(!put(&mut tl, 90, 99));

    let s = tl.summary();
    assert_eq!(s.sum, 4);
    assert_eq!(s.size, 4);
}

#[test]
fn test_put_too_far_behind_tail_is_refused() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);

    // 200 consecutive buckets at t = 0, 5, …, 995.
    for i in 0..200u64 {
        assert!(put(&mut tl, i * 5, 1));
    }

    // t = 100 is bucket 20; 200 − 20 = 180 ≥ 60 behind the tail.
    assert!(!put(&mut tl, 100, 42));
    assert_eq!(tl.summary().sum, 200);

    // Just inside the look-back window the write is accepted.
    let inside = (200 - ADD_BUCKET_BACK_LIMIT + 1) * 5;
    assert!(put(&mut tl, inside, 42));
    assert_eq!(tl.summary().sum, 242);
}

#[test]
fn test_in_range_update_propagates_running_sums() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);
    for t in [100, 105, 110, 115] {
        assert!(put(&mut tl, t, 1));
    }

    // Lands in bucket 0, forcing a ripple through all four buckets.
    assert!(put(&mut tl, 102, 7));

    let records = tl.data.records();
    assert_eq!(records[0].value, 8);
    for k in 1..records.len() {
        assert_eq!(records[k].integral - records[k - 1].integral, records[k].value);
        assert_eq!(
            records[k].second_integral - records[k - 1].second_integral,
            records[k].value * records[k].value
        );
    }

    assert_eq!(tl.diff(95, 115, 0).sum, 11);
}

// ───────────────────── index invariants ───────────────────────────────────

#[test]
fn test_index_times_strictly_increase() {
    let dir = tmp_dir();
    let mut tl = open_tl(&dir, 5);

    // Every put skips a bucket, so each one re-anchors the index.
    for i in 0..300u64 {
        assert!(put(&mut tl, i * 10, 1));
    }

    let records = tl.index.records();
    assert!(records.len() > 255, "index should have grown past one page");
    for i in 1..records.len() {
        assert!(records[i - 1].time < records[i].time);
        assert!(records[i - 1].pos < records[i].pos);
    }
    assert_eq!(records[0].pos, 0);

    assert_eq!(tl.summary().sum, 300);
    assert_eq!(tl.diff(0, 3000, 0).sum, 300);
}

// ───────────────────── persistence ────────────────────────────────────────

#[test]
fn test_reopen_preserves_results() {
    let dir = tmp_dir();

    let (before_summary, before_diff) = {
        let mut tl = open_tl(&dir, 5);
        for t in [100, 105, 110, 115] {
            assert!(put(&mut tl, t, 1));
        }
        assert!(put(&mut tl, 500, 9));
        (tl.summary(), tl.diff(95, 500, 0))
        // Timeline dropped here — simulates restart.
    };

    let tl = open_tl(&dir, 5);
    let after_summary = tl.summary();
    let after_diff = tl.diff(95, 500, 0);

    assert_eq!(before_summary.from, after_summary.from);
    assert_eq!(before_summary.to, after_summary.to);
    assert_eq!(before_summary.sum, after_summary.sum);
    assert_eq!(before_summary.size, after_summary.size);
    assert_eq!(before_summary.mean, after_summary.mean);
    assert_eq!(before_summary.variance, after_summary.variance);

    assert_eq!(before_diff.sum, after_diff.sum);
    assert_eq!(before_diff.size, after_diff.size);
    assert_eq!(before_diff.mean, after_diff.mean);
    assert_eq!(before_diff.variance, after_diff.variance);
}

#[test]
fn test_reopen_does_not_touch_files() {
    let dir = tmp_dir();
    {
        let mut tl = open_tl(&dir, 5);
        for t in [100, 105, 110] {
            assert!(put(&mut tl, t, 2));
        }
    }

    let index_path = dir.path().join("_.i");
    let data_path = dir.path().join("_.d");
    let index_before = std::fs::read(&index_path).expect("read index");
    let data_before = std::fs::read(&data_path).expect("read data");

    {
        let tl = open_tl(&dir, 5);
        let _ = tl.summary();
        let _ = tl.get(105, 0);
    }

    assert_eq!(index_before, std::fs::read(&index_path).expect("reread index"));
    assert_eq!(data_before, std::fs::read(&data_path).expect("reread data"));
}

#[test]
fn test_resolution_is_fixed_at_creation() {
    let dir = tmp_dir();
    {
        let mut tl = open_tl(&dir, 5);
        assert!(put(&mut tl, 100, 1));
    }

    // Reopening with a different server-wide resolution keeps the stored one.
    let tl = open_tl(&dir, 60);
    assert_eq!(tl.summary().resolution, 5);
}

// ───────────────────── timeline db ────────────────────────────────────────

#[test]
fn test_db_put_and_query_roundtrip() {
    let dir = tmp_dir();
    let mut db = TimelineDb::new(dir.path(), 4, 5);

    assert!(db.put("web.hits", 100, 1).expect("put"));
    assert!(db.put("web.hits", 105, 2).expect("put"));

    let s = db.summary("web.hits").expect("summary");
    assert_eq!(s.sum, 3);
    assert_eq!(s.size, 2);

    assert_eq!(db.key_index_size("web.hits").expect("index size"), 1);
    assert_eq!(db.key_data_size("web.hits").expect("data size"), 2);

    let g = db.get("web.hits", 105).expect("get");
    assert_eq!(g.value.value, 2);
}

#[test]
fn test_db_sanitized_keys_collide_on_purpose() {
    let dir = tmp_dir();
    let mut db = TimelineDb::new(dir.path(), 4, 5);

    assert!(db.put("foo.bar", 100, 1).expect("put"));
    assert!(db.put("foo_bar", 105, 2).expect("put"));

    // Both names sanitize to foo_bar and share one timeline.
    assert_eq!(db.summary("foo.bar").expect("summary").sum, 3);
    assert!(dir.path().join("foo_bar").is_dir());
}

#[test]
fn test_db_long_keys_nest_directories() {
    let dir = tmp_dir();
    let mut db = TimelineDb::new(dir.path(), 4, 5);

    let key = "aaaaaaaabbbbbbbbccccccccddddddddrest";
    assert!(db.put(key, 100, 1).expect("put"));

    let expected = dir
        .path()
        .join("aaaaaaaa")
        .join("bbbbbbbb")
        .join("cccccccc")
        .join("dddddddd")
        .join("rest");
    assert!(expected.is_dir());
    assert!(expected.join("_.i").is_file());
    assert!(expected.join("_.d").is_file());
}

#[test]
fn test_db_lru_eviction_reopens_from_disk() {
    let dir = tmp_dir();
    // Cache of one: every key switch evicts and later reopens.
    let mut db = TimelineDb::new(dir.path(), 1, 5);

    assert!(db.put("k1", 100, 1).expect("put"));
    assert!(db.put("k2", 100, 5).expect("put"));
    assert!(db.put("k1", 105, 2).expect("put"));
    assert!(db.put("k2", 105, 6).expect("put"));

    assert_eq!(db.summary("k1").expect("summary").sum, 3);
    assert_eq!(db.summary("k2").expect("summary").sum, 11);
}
