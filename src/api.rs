// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP query API — runs alongside the ingest listener.
//!
//! Endpoints:
//!   GET /summary?keys=k1,k2                       → whole-series stats (JSON)
//!   GET /diff?keys=…&a=…&b=…                      → range stats per key (JSON)
//!   GET /values?keys=…&a=…&b=…&step=…&size=…      → multi-point walk
//!       optional flags: sum | mean | var | agg     (scalar to extract)
//!                       csv | xy                   (output shape)
//!
//! Every query fans out per key to the sharded server and awaits the oneshot
//! results. Validation failures are 400 with an explanatory message; worker
//! failures surface as zero-valued stats rather than an error, matching the
//! rest of the system.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::server::Server;
use crate::storage::db::NO_OFFSET;
use crate::storage::timeline::DiffResult;

/// Shared state passed to all handlers.
pub struct AppState {
    pub server: Arc<Server>,
    /// Cap on total points a single /values response may return.
    pub max_response_values: u64,
}

// ──────────────── request / response types ────────────────────────────────

#[derive(Deserialize)]
pub struct SummaryParams {
    keys: String,
}

#[derive(Deserialize)]
pub struct DiffParams {
    keys: String,
    a: Option<u64>,
    b: Option<u64>,
}

/// Flag parameters (`sum`, `csv`, …) arrive as bare query keys; serde maps
/// them to `Some("")`, so presence is all that matters.
#[derive(Deserialize)]
pub struct ValuesParams {
    keys: String,
    a: Option<u64>,
    b: Option<u64>,
    step: Option<u64>,
    size: Option<u64>,
    sum: Option<String>,
    var: Option<String>,
    agg: Option<String>,
    csv: Option<String>,
    xy: Option<String>,
}

#[derive(Serialize)]
struct SummaryStats {
    from: u64,
    to: u64,
    resolution: u64,
    sum: i64,
    mean: f64,
    variance: f64,
    points: i64,
}

#[derive(Serialize)]
struct KeySummary {
    key: String,
    stats: SummaryStats,
}

/// A boundary bucket: its own value and the running total up to it.
#[derive(Serialize)]
struct BucketStats {
    val: i64,
    agg: i64,
}

#[derive(Serialize)]
struct DiffStats {
    sum: i64,
    mean: f64,
    variance: f64,
    points: i64,
    resolution: u64,
    left: BucketStats,
    right: BucketStats,
}

#[derive(Serialize)]
struct KeyDiff {
    key: String,
    stats: DiffStats,
}

/// Which scalar a /values walk extracts from each diff.
#[derive(Clone, Copy)]
enum Scalar {
    Sum,
    Mean,
    Variance,
    RunningTotal,
}

impl Scalar {
    fn extract(self, r: &DiffResult) -> f64 {
        match self {
            Scalar::Sum => r.sum as f64,
            Scalar::Mean => r.mean,
            Scalar::Variance => r.variance,
            Scalar::RunningTotal => r.right.integral as f64,
        }
    }
}

// ──────────────── router ──────────────────────────────────────────────────

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/summary", get(handle_summary))
        .route("/diff", get(handle_diff))
        .route("/values", get(handle_values))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the query API on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<AppState>) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP query API listening");
    }

    if let Err(e) = axum::serve(listener, build_router(state)).await {
        error!(error = %e, "HTTP server error");
    }
}

// ──────────────── helpers ─────────────────────────────────────────────────

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
}

fn split_keys(raw: &str) -> Result<Vec<&str>, Response> {
    let keys: Vec<&str> = raw.split(',').map(str::trim).filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        Err(bad_request("missing or empty 'keys' parameter"))
    } else {
        Ok(keys)
    }
}

// ──────────────── handlers ────────────────────────────────────────────────

async fn handle_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SummaryParams>,
) -> Response {
    let keys = match split_keys(&params.keys) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    let mut out = Vec::with_capacity(keys.len());
    for key in &keys {
        let s = state.server.summary(key).await.unwrap_or_default();
        out.push(KeySummary {
            key: (*key).to_string(),
            stats: SummaryStats {
                from: s.from,
                to: s.to,
                resolution: s.resolution,
                sum: s.sum,
                mean: s.mean,
                variance: s.variance,
                points: s.size,
            },
        });
    }

    (StatusCode::OK, Json(out)).into_response()
}

async fn handle_diff(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DiffParams>,
) -> Response {
    let keys = match split_keys(&params.keys) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    let a = params.a.unwrap_or(0);
    let b = params.b.unwrap_or(u64::MAX);

    let mut out = Vec::with_capacity(keys.len());
    for key in &keys {
        let r = state.server.diff(key, a, b, NO_OFFSET).await.unwrap_or_default();
        out.push(KeyDiff {
            key: (*key).to_string(),
            stats: DiffStats {
                sum: r.sum,
                mean: r.mean,
                variance: r.variance,
                points: r.size,
                resolution: r.resolution,
                left: BucketStats {
                    val: r.left.value,
                    agg: r.left.integral,
                },
                right: BucketStats {
                    val: r.right.value,
                    agg: r.right.integral,
                },
            },
        });
    }

    (StatusCode::OK, Json(out)).into_response()
}

async fn handle_values(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ValuesParams>,
) -> Response {
    let keys = match split_keys(&params.keys) {
        Ok(k) => k,
        Err(resp) => return resp,
    };

    let (mut a, mut b) = (params.a.unwrap_or(0), params.b.unwrap_or(u64::MAX));
    if a > b {
        std::mem::swap(&mut a, &mut b);
    }
    let step = params.step.unwrap_or(1);
    let size = params.size.unwrap_or(step);

    if step < 1 {
        return bad_request("cannot go beyond second precision, for step");
    }
    if size < 1 {
        return bad_request("cannot go beyond second precision, for segment size");
    }

    let points = u128::from((b - a) / step) + 1;
    let total = points * keys.len() as u128;
    if total > u128::from(state.max_response_values) {
        return bad_request(&format!(
            "query too large: {total} points requested, limit is {}",
            state.max_response_values
        ));
    }

    let scalar = if params.sum.is_some() {
        Scalar::Sum
    } else if params.var.is_some() {
        Scalar::Variance
    } else if params.agg.is_some() {
        Scalar::RunningTotal
    } else {
        Scalar::Mean
    };

    // One walk per key; the index offset from each diff seeds the next
    // lookup so the monotone scan skips repeated binary searches.
    let mut series: Vec<(String, Vec<(u64, f64)>)> = Vec::with_capacity(keys.len());
    for key in &keys {
        let s = state.server.summary(key).await.unwrap_or_default();
        if s.resolution > 0 && size < s.resolution {
            return bad_request(&format!(
                "segment size {size} is below the timeline resolution {}",
                s.resolution
            ));
        }

        let mut values = Vec::with_capacity(points as usize);
        let mut index_offset = 0;
        let mut t = a;
        loop {
            let r = state
                .server
                .diff(key, t.saturating_sub(size), t, index_offset)
                .await
                .unwrap_or_default();
            index_offset = r.index_offset;
            values.push((t, scalar.extract(&r)));

            match t.checked_add(step) {
                Some(next) if next <= b => t = next,
                _ => break,
            }
        }
        series.push(((*key).to_string(), values));
    }

    if params.csv.is_some() {
        use std::fmt::Write as _;
        let mut out = String::new();
        for (key, values) in &series {
            for (t, v) in values {
                let _ = writeln!(out, "{key},{t},{v}");
            }
        }
        (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv")], out).into_response()
    } else if params.xy.is_some() {
        let mut obj = serde_json::Map::new();
        for (key, values) in series {
            let points: Vec<Value> = values
                .into_iter()
                .map(|(t, v)| json!({ "x": t, "y": v }))
                .collect();
            obj.insert(key, Value::Array(points));
        }
        (StatusCode::OK, Json(Value::Object(obj))).into_response()
    } else {
        let mut obj = serde_json::Map::new();
        for (key, values) in series {
            let points: Vec<Value> = values.into_iter().map(|(_, v)| json!(v)).collect();
            obj.insert(key, Value::Array(points));
        }
        (StatusCode::OK, Json(Value::Object(obj))).into_response()
    }
}
