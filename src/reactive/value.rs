//! Tracked parameters
//!
//! A [`Tracked`] is a named value owned by one host. Reading it inside a
//! cached computation records a dependency edge; writing an unequal value
//! invalidates everything that read it, directly or through other cached
//! methods.

use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::fmt;
use tracing::debug;

use super::{scope, HostHandle, ParamKey};
use crate::error::{Error, Result};

/// Change detection contract for tracked values.
///
/// Floats compare through `OrderedFloat`: NaN equals NaN, `-0.0` equals
/// `0.0`, and there is no tolerance. Arrays are equal when they have the
/// same length and are element-wise equal under the float rule.
pub trait TrackedValue: Clone + fmt::Debug + 'static {
    fn same_value(&self, other: &Self) -> bool;
}

impl TrackedValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        OrderedFloat(*self) == OrderedFloat(*other)
    }
}

impl TrackedValue for bool {
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl TrackedValue for i64 {
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl TrackedValue for usize {
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl TrackedValue for Vec<f64> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

impl<T: TrackedValue> TrackedValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_value(b),
            _ => false,
        }
    }
}

/// Host-scoped parameter holder
pub struct Tracked<T> {
    host: HostHandle,
    name: &'static str,
    value: RefCell<Option<T>>,
}

impl<T: TrackedValue> Tracked<T> {
    pub fn new(host: &HostHandle, name: &'static str) -> Self {
        Self {
            host: host.clone(),
            name,
            value: RefCell::new(None),
        }
    }

    pub fn with_value(host: &HostHandle, name: &'static str, value: T) -> Self {
        let param = Self::new(host, name);
        param.set(value);
        param
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self) -> ParamKey {
        ParamKey {
            host: self.host.id(),
            name: self.name,
        }
    }

    /// Current value; records a dependency when called inside a cached
    /// computation.
    pub fn get(&self) -> Result<T> {
        scope::record(self.key());
        self.value
            .borrow()
            .clone()
            .ok_or_else(|| Error::UninitializedParameter {
                host: self.host.label().to_string(),
                name: self.name,
            })
    }

    /// Current value without recording a dependency.
    pub fn peek(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    /// Whether a value was ever assigned. Records nothing, so it can guard
    /// optional constraints without creating an edge.
    pub fn is_set(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Stores `value`; returns `true` when it differed from the previous one
    /// and dependents were invalidated. The first assignment never
    /// invalidates.
    pub fn set(&self, value: T) -> bool {
        let changed = match self.value.borrow().as_ref() {
            None => false,
            Some(current) => !current.same_value(&value),
        };
        *self.value.borrow_mut() = Some(value);

        if changed {
            let invalidated = self.host.graph().invalidate(self.key());
            debug!(
                host = %self.host.label(),
                param = self.name,
                invalidated,
                "tracked parameter changed"
            );
        }
        changed
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("host", &self.host.label())
            .field("name", &self.name)
            .field("value", &self.value.borrow())
            .finish()
    }
}
