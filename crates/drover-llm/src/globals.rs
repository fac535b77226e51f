// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Process-global provider flags.
//!
//! The provider layer honours a single global `modify_params` flag (whether
//! it may rewrite requests to satisfy provider quirks).  The flag is shared
//! by every conversation in the process, so each transport call runs inside
//! a mutex-guarded scope that sets the flag and restores the previous value
//! afterwards — two conversations with different settings can never observe
//! each other's value mid-call.

use std::sync::OnceLock;

use tokio::sync::Mutex;

static MODIFY_PARAMS: OnceLock<Mutex<bool>> = OnceLock::new();

fn lock() -> &'static Mutex<bool> {
    MODIFY_PARAMS.get_or_init(|| Mutex::new(true))
}

/// Run `f` with the global `modify_params` flag set to `flag`.
///
/// The lock is held for the whole call, serializing transport calls that
/// depend on the global.  The previous value is restored on exit.
pub async fn scoped_modify_params<T, F, Fut>(flag: bool, f: F) -> T
where
    F: FnOnce(bool) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let mut guard = lock().lock().await;
    let previous = *guard;
    *guard = flag;
    let out = f(flag).await;
    *guard = previous;
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
