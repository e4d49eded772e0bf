//! Generic cached method
//!
//! The memoization primitive every other reactive method builds on.

use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::debug;

use super::{scope, DependencyKey, EngineStats, HostHandle, MethodKey};
use crate::error::Result;

/// Returns the cached result of `name` on `host`, recomputing it first when
/// the entry is missing or invalidated.
///
/// The method's own key is recorded into the caller's frame before anything
/// else, so a cached method calling another cached method gets an edge even
/// on a cache hit.
pub fn call<T: Clone + 'static>(
    host: &HostHandle,
    name: &'static str,
    compute: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let key = host.method_key(name);
    scope::record(key);

    let cached = host.graph().cache().lookup::<T>(&key, host.label())?;
    if let Some(value) = cached {
        return Ok(value);
    }

    let (value, deps) = recompute(host, &key, compute)?;
    host.graph()
        .cache_mut()
        .commit(key, Rc::new(value.clone()), deps);
    Ok(value)
}

/// Runs `compute` inside a fresh dependency frame.
///
/// On error the frame is discarded and nothing is committed, leaving the
/// entry invalidated so the next read retries.
pub(crate) fn recompute<T>(
    host: &HostHandle,
    key: &MethodKey,
    compute: impl FnOnce() -> Result<T>,
) -> Result<(T, BTreeSet<DependencyKey>)> {
    let guard = scope::ScopeGuard::enter();
    let value = compute()?;
    let deps = guard.finish();

    debug!(
        host = %host.label(),
        method = key.name,
        deps = deps.len(),
        "recomputed cached method"
    );
    host.graph().record(EngineStats {
        recomputed: 1,
        ..EngineStats::default()
    });
    Ok((value, deps))
}
