// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-key timeline: an append-only, time-bucketed counter series.
//!
//! A timeline couples two mapped vectors in one directory:
//!
//! ```text
//! _.i  index: { time, pos } anchors     — sparse, one entry per gap
//! _.d  data : { value, integral, second_integral } buckets — dense
//! ```
//!
//! Each data bucket covers `resolution` seconds. The index maps a time to a
//! run of consecutive buckets: entry `i` covers times
//! `[index[i].time, index[i+1].time)` and buckets `[index[i].pos,
//! index[i+1].pos)`. Buckets carry running sums of value and value², so any
//! range aggregate is two binary searches and a subtraction — O(log index)
//! regardless of range width. The price is forward propagation of the sums
//! when a write lands inside the existing range, bounded by
//! [`ADD_BUCKET_BACK_LIMIT`].

use std::path::Path;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::Result;
use crate::storage::mapped_vec::{MappedVec, Meta, PAGE_SIZE};
use crate::{invariant, require};

// ─────────────────────────────── constants ───────────────────────────────────

/// How many buckets behind the tail an in-range update may land. Anything
/// further back is refused so insert cost stays predictable while slow
/// writers get a window to catch up.
pub const ADD_BUCKET_BACK_LIMIT: u64 = 60;

const INDEX_FILE: &str = "_.i";
const DATA_FILE: &str = "_.d";

// ─────────────────────────────── records ─────────────────────────────────────

/// One index anchor: the lower time bound of a run of buckets and the data
/// position of that run's first bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct IndexRecord {
    pub time: u64,
    pub pos: u64,
}

#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct IndexMeta {
    pub size: u64,
    /// Seconds per bucket. Fixed when the timeline is created; never mutated.
    pub resolution: u64,
}

impl Meta for IndexMeta {
    fn len(&self) -> u64 {
        self.size
    }
    fn set_len(&mut self, n: u64) {
        self.size = n;
    }
}

/// One bucket: the count accumulated in it plus running sums over all buckets
/// up to and including this one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DataRecord {
    pub value: i64,
    pub integral: i64,
    pub second_integral: i64,
}

#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DataMeta {
    pub size: u64,
}

impl Meta for DataMeta {
    fn len(&self) -> u64 {
        self.size
    }
    fn set_len(&mut self, n: u64) {
        self.size = n;
    }
}

pub type Data = MappedVec<DataMeta, DataRecord>;

// ─────────────────────────────── results ─────────────────────────────────────

/// Where a time landed in the index/data pair.
///
/// `index_offset` is the index position of the resolved range; clients
/// walking monotonically increasing times hand it back to skip the binary
/// search. `empty` marks a query that fell in an un-materialized gap (or an
/// empty index) rather than on a stored bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosResult {
    pub index_offset: u64,
    pub time: u64,
    pub pos: u64,
    pub offset: u64,
    pub empty: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetResult {
    pub index_offset: u64,
    pub query_time: u64,
    pub range_time: u64,
    pub pos: u64,
    pub offset: u64,
    pub value: DataRecord,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffResult {
    /// Resolution of the smallest bucket.
    pub resolution: u64,
    /// Hand back to a subsequent diff for faster monotone walks.
    pub index_offset: u64,
    pub sum: i64,
    pub mean: f64,
    pub variance: f64,
    pub size: i64,
    pub left: DataRecord,
    pub right: DataRecord,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryResult {
    pub from: u64,
    pub to: u64,
    pub resolution: u64,
    pub sum: i64,
    pub mean: f64,
    pub variance: f64,
    pub size: i64,
}

// ─────────────────────────────── index ───────────────────────────────────────

/// The index side of a timeline: a mapped vector of anchors plus the
/// binary-search helpers that locate a time within them.
pub struct Index {
    vec: MappedVec<IndexMeta, IndexRecord>,
}

impl Index {
    pub fn open(path: &Path, resolution: u64) -> Result<Self> {
        require!(resolution > 0, "timeline resolution must be positive");

        let mut vec: MappedVec<IndexMeta, IndexRecord> = MappedVec::open(path, PAGE_SIZE)?;
        if vec.meta().resolution == 0 {
            vec.meta_mut().resolution = resolution;
        }
        Ok(Index { vec })
    }

    pub fn resolution(&self) -> u64 {
        self.vec.meta().resolution
    }

    pub fn len(&self) -> u64 {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    pub fn records(&self) -> &[IndexRecord] {
        self.vec.records()
    }

    pub fn back(&self) -> Option<&IndexRecord> {
        self.vec.back()
    }

    pub fn push_back(&mut self, record: IndexRecord) -> Result<()> {
        self.vec.push_back(record)
    }

    /// Greatest entry with `time <= t`, searching `[start..]` only.
    /// `None` when `t` precedes every entry. The index must be non-empty.
    pub fn find_range(&self, t: u64, start: u64) -> Option<usize> {
        require!(start < self.len(), "search offset {start} >= index size {}", self.len());

        let records = self.records();
        let i = start as usize + records[start as usize..].partition_point(|r| r.time <= t);
        if i == 0 {
            None
        } else {
            Some(i - 1)
        }
    }

    /// Resolve `t` against the range at `range_idx`, whose successor (if any)
    /// is `next_idx`. When the computed bucket would overlap the successor's
    /// run the query landed in a gap between indexed ranges: the offset is
    /// clamped to the last bucket of this run and the result marked `empty`.
    pub fn find_pos_from_range(&self, t: u64, range_idx: usize, next_idx: Option<usize>) -> PosResult {
        let records = self.records();
        let range = records[range_idx];

        let t = t.max(range.time);
        let mut offset = (t - range.time) / self.resolution();
        let mut empty = false;

        if let Some(next_idx) = next_idx {
            let next = records[next_idx];
            if range.pos + offset >= next.pos {
                offset = next.pos - range.pos - 1;
                empty = true;
            }
        }

        PosResult {
            index_offset: range_idx as u64,
            time: range.time,
            pos: range.pos,
            offset,
            empty,
        }
    }

    /// Full lookup: empty index yields the empty sentinel, a time before the
    /// first range resolves to bucket zero, anything else goes through
    /// [`find_range`](Self::find_range) starting at `start`.
    pub fn find_pos(&self, t: u64, start: u64) -> PosResult {
        if self.is_empty() {
            return PosResult {
                index_offset: 0,
                time: t,
                pos: 0,
                offset: 0,
                empty: true,
            };
        }

        match self.find_range(t, start) {
            None => PosResult {
                index_offset: 0,
                time: self.records()[0].time,
                pos: 0,
                offset: 0,
                empty: false,
            },
            Some(range_idx) => {
                let next_idx = if range_idx + 1 < self.len() as usize {
                    Some(range_idx + 1)
                } else {
                    None
                };
                self.find_pos_from_range(t, range_idx, next_idx)
            }
        }
    }
}

// ─────────────────────────────── sum helpers ─────────────────────────────────

/// Turn `current` into a summed bucket given its predecessor: partial sum(x)
/// and partial sum(x²) up to and including `current`.
fn propagate(prev: &DataRecord, current: &mut DataRecord) {
    current.integral = prev.integral + current.value;
    current.second_integral = prev.second_integral + current.value * current.value;
}

/// Aggregate the half-open bucket span between two summed buckets.
///
/// mean = sum(x) / n, and
/// variance = sum(x²)/n − mean² (the mean of squares minus the squared mean).
fn diff_buckets(
    resolution: u64,
    index_offset: u64,
    a: &DataRecord,
    b: &DataRecord,
    n: i64,
) -> DiffResult {
    require!(resolution > 0);
    require!(n > 0);

    let sum = b.integral - a.integral;
    let second_sum = b.second_integral - a.second_integral;
    let mean = sum as f64 / n as f64;
    let second_mean = second_sum as f64 / n as f64;
    let variance = second_mean - mean * mean;

    DiffResult {
        resolution,
        index_offset,
        sum,
        mean,
        variance,
        size: n,
        left: *a,
        right: *b,
    }
}

fn clamp(p: &mut PosResult, size: u64) {
    require!(p.pos < size);

    if p.pos + p.offset < size {
        return;
    }
    p.offset = size - p.pos - 1;
    p.empty = true;
}

// ─────────────────────────────── timeline ────────────────────────────────────

/// One key's index/data pair. **Not** thread-safe; owned by a single worker.
pub struct Timeline {
    pub index: Index,
    pub data: Data,
}

impl Timeline {
    /// Open (or create) the timeline stored in `dir`.
    pub fn open(dir: &Path, resolution: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let index = Index::open(&dir.join(INDEX_FILE), resolution)?;
        let data = Data::open(&dir.join(DATA_FILE), PAGE_SIZE)?;
        Ok(Timeline { index, data })
    }

    /// Append count `c` at logical time `t`. Returns `Ok(false)` when the
    /// write is refused: older than the newest indexed range, or landing more
    /// than [`ADD_BUCKET_BACK_LIMIT`] buckets behind the tail.
    pub fn put(&mut self, t: u64, c: i64) -> Result<bool> {
        if self.index.is_empty() {
            invariant!(self.data.is_empty(), "index empty but data populated");

            self.data.push_back(DataRecord {
                value: c,
                integral: c,
                second_integral: c * c,
            })?;
            self.index.push_back(IndexRecord { time: t, pos: 0 })?;
            return Ok(true);
        }

        let last_idx = self.index.len() as usize - 1;
        let last = self.index.records()[last_idx];

        // Writes older than the newest range are dropped.
        if t < last.time {
            return Ok(false);
        }

        // Resolve against the last range only to keep a fixed insert cost.
        let p = self.index.find_pos_from_range(t, last_idx, None);
        let pos = p.pos + p.offset;

        if pos < self.data.len() {
            // Bucket is current or in the recent past; no index change.
            if self.data.len() - pos >= ADD_BUCKET_BACK_LIMIT {
                return Ok(false);
            }

            let prev = if pos > 0 {
                *self.data.get(pos - 1)
            } else {
                DataRecord::default()
            };
            {
                let current = self.data.get_mut(pos);
                current.value += c;
                propagate(&prev, current);
            }
            // Ripple the running sums forward to the tail.
            for k in pos + 1..self.data.len() {
                let prev = *self.data.get(k - 1);
                propagate(&prev, self.data.get_mut(k));
            }
        } else {
            // Beyond the end: append a fresh bucket.
            invariant!(!self.data.is_empty(), "populated index but no data");
            let prev = *self.data.get(self.data.len() - 1);
            let mut current = DataRecord {
                value: c,
                ..Default::default()
            };
            propagate(&prev, &mut current);
            self.data.push_back(current)?;

            let new_pos = self.data.len() - 1;
            if pos == new_pos {
                // Contiguous with the old tail; the last range still covers it.
                return Ok(true);
            }

            // We skipped buckets: re-anchor the index at the bucket boundary.
            let resolution = self.index.resolution();
            let aliased_time = p.time + p.offset * resolution;
            invariant!(aliased_time <= t);
            self.index.push_back(IndexRecord {
                time: aliased_time,
                pos: new_pos,
            })?;
        }

        Ok(true)
    }

    /// Whole-series aggregate. An empty timeline reports zeros with the
    /// configured resolution.
    pub fn summary(&self) -> SummaryResult {
        let resolution = self.index.resolution();

        if self.index.is_empty() {
            return SummaryResult {
                resolution,
                ..Default::default()
            };
        }
        invariant!(!self.data.is_empty(), "populated index but no data");

        let records = self.index.records();
        let front = records[0];
        let back = records[records.len() - 1];

        let from = front.time;
        invariant!(self.data.len() > back.pos);
        let tail_buckets = self.data.len() - back.pos;
        let to = back.time + tail_buckets * resolution;

        let n = ((to - from) / resolution) as i64;
        let first = DataRecord::default();
        let last = self.data.records()[self.data.len() as usize - 1];

        let d = diff_buckets(resolution, 0, &first, &last, n);
        SummaryResult {
            from,
            to,
            resolution,
            sum: d.sum,
            mean: d.mean,
            variance: d.variance,
            size: n,
        }
    }

    /// Point lookup: the bucket covering `t`, clamped to the data tail.
    /// `index_offset` seeds the binary search for monotone walks.
    pub fn get(&self, t: u64, index_offset: u64) -> GetResult {
        if self.data.is_empty() {
            return GetResult {
                query_time: t,
                ..Default::default()
            };
        }

        let mut p = self.index.find_pos(t, index_offset);
        clamp(&mut p, self.data.len());

        GetResult {
            index_offset: p.index_offset,
            query_time: t,
            range_time: p.time,
            pos: p.pos,
            offset: p.offset,
            value: *self.data.get(p.pos + p.offset),
        }
    }

    /// Left endpoint for [`diff`](Self::diff): the bucket *before* `t`, so
    /// that subtracting running sums yields the half-open interval `(a, b]`.
    /// An `empty` lookup (gap or clamp) steps one slot forward first, which
    /// may alias the right endpoint; such diffs come out with zero size.
    fn get_left(&self, t: u64, index_offset: u64) -> GetResult {
        let mut p = self.index.find_pos(t, index_offset);
        clamp(&mut p, self.data.len());

        let i = p.pos + p.offset + u64::from(p.empty);
        let value = if i > 0 {
            *self.data.get(i - 1)
        } else {
            DataRecord::default()
        };

        GetResult {
            index_offset: p.index_offset,
            query_time: t,
            range_time: p.time,
            pos: p.pos,
            offset: p.offset,
            value,
        }
    }

    /// Aggregate over `(a, b]`. Endpoints are swapped if reversed, snapped to
    /// the stored series, and diffed through the running sums.
    pub fn diff(&self, a: u64, b: u64, index_offset: u64) -> DiffResult {
        let resolution = self.index.resolution();

        let (a, b) = if a > b { (b, a) } else { (a, b) };
        if self.data.is_empty() {
            return DiffResult {
                resolution,
                ..Default::default()
            };
        }

        let ar = self.get_left(a, index_offset);
        let br = self.get(b, index_offset);

        let b = br.query_time.max(br.range_time);
        let a = ar.query_time.min(b);

        let n = ((b - a) / resolution) as i64;
        if n == 0 {
            return DiffResult {
                resolution,
                left: ar.value,
                right: br.value,
                ..Default::default()
            };
        }

        invariant!(ar.index_offset <= br.index_offset);
        diff_buckets(resolution, ar.index_offset, &ar.value, &br.value, n)
    }
}
