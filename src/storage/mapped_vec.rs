// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Growable typed array backed by one memory-mapped file.
//!
//! ## File Layout
//!
//! ```text
//! [ M (fixed-size header, first field = size: u64) ]
//! [ R[0] | R[1] | … | R[max-1] ]   (packed records)
//! [ unused tail up to file size ]
//! ```
//!
//! `max` = (file_size − sizeof(M)) / sizeof(R). When an append finds the
//! mapping full, the file is grown to
//! `max(file_size + sizeof(R), file_size × 1.5 + sizeof(R))`, re-mapped, and
//! every derived pointer is recomputed from the new mapping base — no record
//! reference may be held across a `push_back`.
//!
//! `meta.size` is the sole source of truth for the number of valid records.
//! It is incremented only *after* the new slot has been written, so a torn
//! append leaves the previous state intact.
//!
//! **Not** thread-safe; each mapping is owned by exactly one worker.

use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{HenhouseError, Result};
use crate::require;

// ─────────────────────────────── constants ───────────────────────────────────

/// Fresh index/data files start one page long.
pub const PAGE_SIZE: u64 = 4096;

// ─────────────────────────────── header trait ────────────────────────────────

/// A mapping header. Implementations are plain `#[repr(C)]` structs whose
/// first field is `size: u64`; any further fields are theirs to manage.
/// A freshly created file is zero-filled, so the zero header must be a valid
/// empty state.
pub trait Meta: FromBytes + IntoBytes + KnownLayout + Immutable {
    fn len(&self) -> u64;
    fn set_len(&mut self, n: u64);
}

// ─────────────────────────────── MappedVec ───────────────────────────────────

/// Persistent growable vector of `R` records behind an `M` header.
pub struct MappedVec<M, R> {
    file: File,
    map: MmapMut,
    /// Records the current mapping can hold; recomputed on every resize.
    capacity: u64,
    path: PathBuf,
    _marker: PhantomData<(M, R)>,
}

impl<M, R> MappedVec<M, R>
where
    M: Meta,
    R: FromBytes + IntoBytes + KnownLayout + Immutable + Copy,
{
    const META_SIZE: usize = mem::size_of::<M>();
    const RECORD_SIZE: usize = mem::size_of::<R>();

    /// Open `path`, creating it when absent.
    ///
    /// A fresh file is extended to at least `initial_size` (never below one
    /// header plus one record); its zero-filled header means `size == 0`.
    /// An existing file keeps its header and records untouched.
    pub fn open(path: &Path, initial_size: u64) -> Result<Self> {
        require!(initial_size > 0, "initial mapping size must be positive");

        let open_err = |e: std::io::Error| HenhouseError::StorageOpen {
            path: path.to_path_buf(),
            source: e,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(open_err)?;

        let min_size = (Self::META_SIZE + Self::RECORD_SIZE) as u64;
        let len = file.metadata().map_err(open_err)?.len();
        if len == 0 {
            file.set_len(initial_size.max(min_size)).map_err(open_err)?;
        } else if len < min_size {
            // A header alone is not a usable mapping; treat as corrupt.
            return Err(HenhouseError::Storage(format!(
                "mapping {path:?} is truncated ({len} bytes)"
            )));
        }

        // Safety: the file stays open for the lifetime of the mapping and is
        // only resized through `grow`, which re-maps before any access.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(open_err)?;
        let capacity = ((map.len() - Self::META_SIZE) / Self::RECORD_SIZE) as u64;

        let vec = MappedVec {
            file,
            map,
            capacity,
            path: path.to_path_buf(),
            _marker: PhantomData,
        };
        require!(
            vec.len() <= vec.capacity,
            "mapping {:?} claims {} records but holds at most {}",
            vec.path,
            vec.len(),
            vec.capacity
        );
        Ok(vec)
    }

    /// Header access, re-derived from the live mapping.
    pub fn meta(&self) -> &M {
        M::ref_from_prefix(&self.map[..])
            .expect("mapping always holds a full header")
            .0
    }

    pub fn meta_mut(&mut self) -> &mut M {
        M::mut_from_prefix(&mut self.map[..])
            .expect("mapping always holds a full header")
            .0
    }

    /// Number of valid records.
    pub fn len(&self) -> u64 {
        self.meta().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The valid prefix of records as a slice.
    pub fn records(&self) -> &[R] {
        let n = self.len() as usize;
        <[R]>::ref_from_prefix_with_elems(&self.map[Self::META_SIZE..], n)
            .expect("valid records lie inside the mapping")
            .0
    }

    /// In-bounds access; `pos >= len()` is a contract violation.
    pub fn get(&self, pos: u64) -> &R {
        require!(
            pos < self.len(),
            "record access out of range: {pos} >= {}",
            self.len()
        );
        &self.records()[pos as usize]
    }

    pub fn get_mut(&mut self, pos: u64) -> &mut R {
        let n = self.len();
        require!(pos < n, "record access out of range: {pos} >= {n}");
        let records = <[R]>::mut_from_prefix_with_elems(&mut self.map[Self::META_SIZE..], n as usize)
            .expect("valid records lie inside the mapping")
            .0;
        &mut records[pos as usize]
    }

    pub fn front(&self) -> Option<&R> {
        self.records().first()
    }

    pub fn back(&self) -> Option<&R> {
        self.records().last()
    }

    /// Append one record, growing the file when the mapping is full.
    /// The slot is written before the size is bumped.
    pub fn push_back(&mut self, record: R) -> Result<()> {
        let next = self.len();
        if next >= self.capacity {
            self.grow()?;
        }

        let off = Self::META_SIZE + next as usize * Self::RECORD_SIZE;
        self.map[off..off + Self::RECORD_SIZE].copy_from_slice(record.as_bytes());
        self.meta_mut().set_len(next + 1);
        Ok(())
    }

    /// Resize the backing file by the growth factor and re-map. All derived
    /// references are invalidated; callers go through accessors afterwards.
    fn grow(&mut self) -> Result<()> {
        let cur = self.map.len() as u64;
        let record = Self::RECORD_SIZE as u64;
        let new_size = (cur + record).max(cur + cur / 2 + record);

        let path = self.path.clone();
        let open_err = |e: std::io::Error| HenhouseError::StorageOpen {
            path: path.clone(),
            source: e,
        };
        self.file.set_len(new_size).map_err(open_err)?;
        self.map = unsafe { MmapMut::map_mut(&self.file) }.map_err(open_err)?;
        let old_capacity = self.capacity;
        self.capacity = ((self.map.len() - Self::META_SIZE) / Self::RECORD_SIZE) as u64;
        crate::invariant!(self.capacity > old_capacity);
        Ok(())
    }
}
