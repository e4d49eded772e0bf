//! Dependency tracking scope
//!
//! A thread-local stack of dependency frames. Every cached computation runs
//! inside its own frame; parameter and cached-method reads land in the
//! innermost frame. Frames are owned by [`ScopeGuard`], which pops on drop,
//! so the stack is restored on early returns and panics alike.

use std::cell::RefCell;
use std::collections::BTreeSet;

use super::DependencyKey;

thread_local! {
    static FRAMES: RefCell<Vec<BTreeSet<DependencyKey>>> = const { RefCell::new(Vec::new()) };
}

/// Records `key` into the innermost active frame. No-op outside a scope.
pub fn record(key: impl Into<DependencyKey>) {
    let key = key.into();
    FRAMES.with(|frames| {
        if let Some(frame) = frames.borrow_mut().last_mut() {
            frame.insert(key);
        }
    });
}

/// Number of frames currently open on this thread.
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

pub fn is_tracking() -> bool {
    depth() > 0
}

/// RAII frame for one computation.
pub struct ScopeGuard {
    active: bool,
}

impl ScopeGuard {
    pub fn enter() -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(BTreeSet::new()));
        Self { active: true }
    }

    /// Closes the frame and hands back everything read inside it.
    pub fn finish(mut self) -> BTreeSet<DependencyKey> {
        self.active = false;
        FRAMES.with(|frames| frames.borrow_mut().pop().unwrap_or_default())
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.active {
            FRAMES.with(|frames| {
                let _ = frames.borrow_mut().pop();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{HostId, ParamKey};

    fn param(host: HostId, name: &'static str) -> DependencyKey {
        ParamKey { host, name }.into()
    }

    #[test]
    fn test_record_outside_scope_is_noop() {
        record(param(HostId::new(), "price"));
        assert_eq!(depth(), 0);
        assert!(!is_tracking());
    }

    #[test]
    fn test_nested_frames_are_isolated() {
        let host = HostId::new();
        let outer = ScopeGuard::enter();
        record(param(host, "a"));

        let inner = ScopeGuard::enter();
        record(param(host, "b"));
        let inner_deps = inner.finish();

        record(param(host, "c"));
        let outer_deps = outer.finish();

        assert_eq!(inner_deps.len(), 1);
        assert!(inner_deps.contains(&param(host, "b")));
        assert_eq!(outer_deps.len(), 2);
        assert!(!outer_deps.contains(&param(host, "b")));
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_dropped_guard_pops_frame() {
        fn failing() -> Result<(), &'static str> {
            let _guard = ScopeGuard::enter();
            assert_eq!(depth(), 1);
            Err("boom")
        }

        assert!(failing().is_err());
        assert_eq!(depth(), 0);
    }
}
