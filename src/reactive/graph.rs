use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::ops::AddAssign;
use std::rc::Rc;
use tracing::debug;

use super::cache::CacheStore;
use super::{
    constraint, cost, method, DependencyKey, HostId, MethodKey, Output, Tracked, TrackedValue,
};
use crate::error::Result;
use crate::solver::{CostTerms, RowHandles, RowSet, Solver};

/// What to do when a constraint's result changes shape after its rows exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeChangePolicy {
    /// Fail with `Error::ShapeChanged`; solver rows stay untouched.
    #[default]
    Reject,
    /// Retire the old rows in place and create rows for the new shape.
    Rebuild,
}

/// Counters accumulated between two calls to [`Graph::take_stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub recomputed: u64,
    pub invalidated: u64,
    pub rows_created: u64,
    pub bounds_patched: u64,
    pub cells_patched: u64,
    pub rows_retired: u64,
}

impl AddAssign for EngineStats {
    fn add_assign(&mut self, rhs: Self) {
        self.recomputed += rhs.recomputed;
        self.invalidated += rhs.invalidated;
        self.rows_created += rhs.rows_created;
        self.bounds_patched += rhs.bounds_patched;
        self.cells_patched += rhs.cells_patched;
        self.rows_retired += rhs.rows_retired;
    }
}

/// Shared state of one optimization run: every host's cache entries plus the
/// solver they write rows into.
///
/// Borrows of the inner cells are never held across a host computation, so
/// cached methods can call each other freely.
pub struct Graph {
    cache: RefCell<CacheStore>,
    solver: RefCell<Box<dyn Solver>>,
    policy: ShapeChangePolicy,
    stats: RefCell<EngineStats>,
}

impl Graph {
    pub fn new(solver: Box<dyn Solver>, policy: ShapeChangePolicy) -> Rc<Self> {
        Rc::new(Self {
            cache: RefCell::new(CacheStore::default()),
            solver: RefCell::new(solver),
            policy,
            stats: RefCell::new(EngineStats::default()),
        })
    }

    /// Registers a new host identity in this graph.
    pub fn host(self: &Rc<Self>, label: impl Into<String>) -> HostHandle {
        HostHandle {
            id: HostId::new(),
            label: Rc::from(label.into()),
            graph: Rc::clone(self),
        }
    }

    pub fn policy(&self) -> ShapeChangePolicy {
        self.policy
    }

    /// Runs the invalidation propagator seeded with `key`; returns how many
    /// entries were invalidated.
    pub fn invalidate(&self, key: impl Into<DependencyKey>) -> usize {
        let key = key.into();
        let invalidated = self.cache.borrow_mut().invalidate_from(key);
        if !invalidated.is_empty() {
            debug!(
                seed = %key,
                methods = ?invalidated.iter().map(|k| k.name).collect::<Vec<_>>(),
                "invalidated cached methods"
            );
        }
        self.record(EngineStats {
            invalidated: invalidated.len() as u64,
            ..EngineStats::default()
        });
        invalidated.len()
    }

    /// Tears down every cache entry of `host` and retires the rows they
    /// owned. Methods of other hosts that read from `host` are invalidated.
    pub fn release_host(&self, host: HostId) -> Result<EngineStats> {
        let (invalidated, owned) = self.cache.borrow_mut().forget_host(host);
        let mut stats = EngineStats {
            invalidated: invalidated.len() as u64,
            ..EngineStats::default()
        };
        {
            let mut solver = self.solver_mut();
            for row in owned.iter().flat_map(|rows| rows.iter()) {
                constraint::retire_row(&mut *solver, *row, &mut stats)?;
            }
        }
        debug!(
            %host,
            retired = stats.rows_retired,
            invalidated = stats.invalidated,
            "released host"
        );
        self.record(stats);
        Ok(stats)
    }

    pub fn solver(&self) -> Ref<'_, dyn Solver> {
        Ref::map(self.solver.borrow(), |solver| solver.as_ref())
    }

    pub fn solver_mut(&self) -> RefMut<'_, dyn Solver> {
        RefMut::map(self.solver.borrow_mut(), |solver| solver.as_mut())
    }

    pub fn stats(&self) -> EngineStats {
        *self.stats.borrow()
    }

    pub fn take_stats(&self) -> EngineStats {
        std::mem::take(&mut *self.stats.borrow_mut())
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.borrow().len()
    }

    pub(crate) fn cache(&self) -> Ref<'_, CacheStore> {
        self.cache.borrow()
    }

    pub(crate) fn cache_mut(&self) -> RefMut<'_, CacheStore> {
        self.cache.borrow_mut()
    }

    pub(crate) fn record(&self, stats: EngineStats) {
        *self.stats.borrow_mut() += stats;
    }
}

/// Cheap handle a host keeps to reach its graph
#[derive(Clone)]
pub struct HostHandle {
    id: HostId,
    label: Rc<str>,
    graph: Rc<Graph>,
}

impl HostHandle {
    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn graph(&self) -> &Rc<Graph> {
        &self.graph
    }

    pub fn method_key(&self, name: &'static str) -> MethodKey {
        MethodKey {
            host: self.id,
            name,
        }
    }

    pub fn param<T: TrackedValue>(&self, name: &'static str) -> Tracked<T> {
        Tracked::new(self, name)
    }

    /// Creates a decision variable in the run's solver.
    pub fn add_variable(&self, name: &str, lower: f64, upper: f64) -> crate::solver::VariableId {
        let qualified = format!("{}.{}", self.label, name);
        self.graph.solver_mut().add_variable(&qualified, lower, upper)
    }

    /// Generic cached method (see [`method::call`]).
    pub fn cached<T: Clone + 'static>(
        &self,
        name: &'static str,
        compute: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        method::call(self, name, compute)
    }

    /// Cached constraint method (see [`constraint::call`]).
    pub fn cached_constraint(
        &self,
        name: &'static str,
        compute: impl FnOnce() -> Result<Option<RowSet>>,
    ) -> Result<Option<RowHandles>> {
        constraint::call(self, name, compute)
    }

    /// Cached cost method (see [`cost::call`]).
    pub fn cached_cost(
        &self,
        name: &'static str,
        compute: impl FnOnce() -> Result<Option<CostTerms>>,
    ) -> Result<Option<CostTerms>> {
        cost::call(self, name, compute)
    }

    /// Shadow prices of a constraint's rows from the latest solve.
    pub fn shadow_price(&self, name: &'static str, label: &str) -> Option<Output> {
        constraint::get_output(self, name, label)
    }

    /// Number of times `name` has been computed on this host.
    pub fn recomputations(&self, name: &'static str) -> u64 {
        self.graph.cache().recomputations(&self.method_key(name))
    }

    /// `None` when `name` was never read, otherwise whether its entry is valid.
    pub fn is_cached(&self, name: &'static str) -> Option<bool> {
        self.graph.cache().is_valid(&self.method_key(name))
    }

    pub fn rows(&self, name: &'static str) -> Option<RowHandles> {
        self.graph.cache().rows(&self.method_key(name))
    }

    /// Dependencies recorded by the last successful computation of `name`.
    pub fn dependencies(&self, name: &'static str) -> Vec<DependencyKey> {
        self.graph
            .cache()
            .deps(&self.method_key(name))
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}
