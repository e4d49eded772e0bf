use serde::Serialize;
use std::rc::Rc;
use tracing::info;

use super::{AnyHost, EngineStats, Graph, Host, HostHandle, HostId, Output, ShapeChangePolicy};
use crate::error::Result;
use crate::solver::{LinearExpr, LpModel, SolveOutcome, Solver};

/// Summary of one sync-and-solve cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleReport {
    pub outcome: SolveOutcome,
    pub stats: EngineStats,
}

/// All hosts of one optimization run plus the graph they share.
///
/// Scheduling of cycles is up to the caller; the model only guarantees that
/// a solve sees the latest committed parameter values.
pub struct OptimizationModel {
    graph: Rc<Graph>,
    hosts: Vec<Rc<dyn AnyHost>>,
}

impl OptimizationModel {
    pub fn new(solver: Box<dyn Solver>, policy: ShapeChangePolicy) -> Self {
        Self {
            graph: Graph::new(solver, policy),
            hosts: Vec::new(),
        }
    }

    /// Model backed by an in-memory [`LpModel`].
    pub fn with_lp(policy: ShapeChangePolicy) -> Self {
        Self::new(Box::new(LpModel::new()), policy)
    }

    pub fn graph(&self) -> &Rc<Graph> {
        &self.graph
    }

    /// New host identity for an element about to be added.
    pub fn host(&self, label: impl Into<String>) -> HostHandle {
        self.graph.host(label)
    }

    pub fn add<H: Host>(&mut self, host: H) -> Rc<H> {
        let host = Rc::new(host);
        self.hosts.push(host.clone());
        host
    }

    /// Removes a host from the run, retiring the rows it owned.
    pub fn remove(&mut self, host: HostId) -> Result<bool> {
        let before = self.hosts.len();
        self.hosts.retain(|existing| existing.host_handle().id() != host);
        if self.hosts.len() == before {
            return Ok(false);
        }
        self.graph.release_host(host)?;
        Ok(true)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &dyn AnyHost> {
        self.hosts.iter().map(|host| host.as_ref())
    }

    /// Reads every constraint of every host; only invalidated ones recompute.
    pub fn sync_constraints(&self) -> Result<()> {
        for host in &self.hosts {
            host.sync_constraints()?;
        }
        Ok(())
    }

    /// Flat sum of every host's costs.
    pub fn objective(&self) -> Result<LinearExpr> {
        self.hosts
            .iter()
            .map(|host| host.cost_total())
            .sum::<Result<LinearExpr>>()
    }

    pub fn solve(&self) -> Result<CycleReport> {
        self.sync_constraints()?;
        let objective = self.objective()?;

        let outcome = {
            let mut solver = self.graph.solver_mut();
            solver.set_objective(objective);
            solver.solve()?
        };
        let stats = self.graph.take_stats();

        info!(
            objective = outcome.objective_value,
            rows = outcome.rows,
            recomputed = stats.recomputed,
            rows_created = stats.rows_created,
            cells_patched = stats.cells_patched,
            bounds_patched = stats.bounds_patched,
            "optimization cycle complete"
        );
        Ok(CycleReport { outcome, stats })
    }

    pub fn collect_outputs(&self) -> Result<Vec<Output>> {
        let mut outputs = Vec::new();
        for host in &self.hosts {
            outputs.extend(host.collect_outputs()?);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{MethodRegistry, Tracked};
    use crate::solver::CostTerms;
    use once_cell::sync::Lazy;

    struct Fixed {
        handle: HostHandle,
        amount: Tracked<Option<f64>>,
    }

    static FIXED_METHODS: Lazy<MethodRegistry<Fixed>> = Lazy::new(|| {
        MethodRegistry::new("fixed")
            .cost("fee", |f| Ok(f.amount.get()?.map(|a| CostTerms::from(LinearExpr::constant(a)))))
    });

    impl Host for Fixed {
        fn handle(&self) -> &HostHandle {
            &self.handle
        }

        fn registry() -> &'static MethodRegistry<Self> {
            &FIXED_METHODS
        }
    }

    #[test]
    fn test_objective_skips_absent_costs() {
        let mut model = OptimizationModel::with_lp(ShapeChangePolicy::Reject);
        for amount in [Some(3.0), None] {
            let handle = model.host("fixed");
            let amount = Tracked::with_value(&handle, "amount", amount);
            model.add(Fixed { handle, amount });
        }

        assert_eq!(model.objective().unwrap().constant_value(), 3.0);
        assert_eq!(model.hosts().count(), 2);
    }
}
