// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Storage engine: mapped vectors, per-key timelines, and the LRU database
//! that fronts them.

pub mod db;
pub mod mapped_vec;
pub mod timeline;
