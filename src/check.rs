// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Contract checks for programmer errors.
//!
//! A failed `require!` or `invariant!` is never a recoverable condition: the
//! caller violated the API contract (out-of-range access, zero resolution,
//! empty key). The process prints the failed expression with a backtrace and
//! aborts.

use std::backtrace::Backtrace;

/// Report a violated contract and abort. Called by the macros below.
pub fn contract_failed(kind: &str, expr: &str, msg: &str, file: &str, line: u32) -> ! {
    let trace = Backtrace::force_capture();
    tracing::error!(kind, expr, file, line, "{msg}");
    eprintln!("!! {kind} failed: {expr}");
    eprintln!("!! {msg}");
    eprintln!("!! at {file}:{line}");
    eprintln!("{trace}");
    std::process::abort();
}

/// Precondition check on caller-supplied state.
#[macro_export]
macro_rules! require {
    ($cond:expr $(,)?) => {
        $crate::require!($cond, "precondition violated")
    };
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            $crate::check::contract_failed(
                "precondition",
                stringify!($cond),
                &format!($($msg)+),
                file!(),
                line!(),
            );
        }
    };
}

/// Internal consistency check; a failure means corrupted state, not bad input.
#[macro_export]
macro_rules! invariant {
    ($cond:expr $(,)?) => {
        $crate::invariant!($cond, "invariant violated")
    };
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            $crate::check::contract_failed(
                "invariant",
                stringify!($cond),
                &format!($($msg)+),
                file!(),
                line!(),
            );
        }
    };
}
