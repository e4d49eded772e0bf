use once_cell::sync::Lazy;
use open_energy_incremental::reactive::{
    AnyHost, Graph, Host, HostHandle, MethodRegistry, OptimizationModel, ShapeChangePolicy, Tracked,
};
use open_energy_incremental::solver::{
    CostTerms, LinearExpr, LpModel, RowHandles, RowSet, Shaped, VariableId,
};
use open_energy_incremental::Error;
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

fn graph() -> Rc<Graph> {
    Graph::new(Box::new(LpModel::new()), ShapeChangePolicy::Reject)
}

/// `var <= threshold`
struct Limit {
    handle: HostHandle,
    var: VariableId,
    threshold: Tracked<f64>,
}

static LIMIT_METHODS: Lazy<MethodRegistry<Limit>> = Lazy::new(|| {
    MethodRegistry::<Limit>::new("limit").priced_constraint("upper", "limit_price", |limit| {
        Ok(Some(LinearExpr::from(limit.var).leq(limit.threshold.get()?).into()))
    })
});

impl Host for Limit {
    fn handle(&self) -> &HostHandle {
        &self.handle
    }

    fn registry() -> &'static MethodRegistry<Self> {
        &LIMIT_METHODS
    }
}

fn limit(graph: &Rc<Graph>, threshold: f64) -> Limit {
    let handle = graph.host("limit");
    Limit {
        var: handle.add_variable("var", 0.0, f64::INFINITY),
        threshold: Tracked::with_value(&handle, "threshold", threshold),
        handle,
    }
}

#[test]
fn threshold_change_patches_the_existing_row() {
    let graph = graph();
    let host = limit(&graph, 5.0);

    let rows = host.constraint("upper").unwrap();
    let Some(Shaped::Single(row)) = rows else {
        panic!("expected a single row, got {rows:?}");
    };
    assert_eq!(graph.solver().row_bounds(row).unwrap().1, 5.0);
    assert_eq!(host.handle().recomputations("upper"), 1);

    host.constraint("upper").unwrap();
    assert_eq!(host.handle().recomputations("upper"), 1);

    assert!(!host.threshold.set(5.0));
    assert_eq!(host.handle().is_cached("upper"), Some(true));
    assert_eq!(host.handle().recomputations("upper"), 1);

    assert!(host.threshold.set(8.0));
    assert_eq!(host.handle().is_cached("upper"), Some(false));

    assert_eq!(host.constraint("upper").unwrap(), Some(Shaped::Single(row)));
    assert_eq!(host.handle().recomputations("upper"), 2);
    assert_eq!(graph.solver().row_bounds(row).unwrap().1, 8.0);
    assert_eq!(graph.solver().num_rows(), 1);
}

#[test]
fn repeated_reads_are_idempotent() {
    let graph = graph();
    let host = limit(&graph, 5.0);
    let first = host.constraint("upper").unwrap();
    for _ in 0..5 {
        assert_eq!(host.constraint("upper").unwrap(), first);
    }
    assert_eq!(host.handle().recomputations("upper"), 1);
    assert_eq!(graph.take_stats().rows_created, 1);
}

struct Fee {
    handle: HostHandle,
    amount: Tracked<Option<f64>>,
}

static FEE_METHODS: Lazy<MethodRegistry<Fee>> = Lazy::new(|| {
    MethodRegistry::<Fee>::new("fee").cost("fee", |fee| {
        Ok(fee.amount.get()?.map(|amount| CostTerms::from(LinearExpr::constant(amount))))
    })
});

impl Host for Fee {
    fn handle(&self) -> &HostHandle {
        &self.handle
    }

    fn registry() -> &'static MethodRegistry<Self> {
        &FEE_METHODS
    }
}

#[test]
fn absent_costs_add_nothing_to_the_objective() {
    let mut model = OptimizationModel::with_lp(ShapeChangePolicy::Reject);
    for amount in [Some(3.0), None] {
        let handle = model.host("fee");
        let amount = Tracked::with_value(&handle, "amount", amount);
        model.add(Fee { handle, amount });
    }

    let objective = model.objective().unwrap();
    assert_eq!(objective.constant_value(), 3.0);
    assert!(objective.is_constant());
}

#[test]
fn shadow_prices_need_a_solve() {
    let mut model = OptimizationModel::with_lp(ShapeChangePolicy::Reject);
    let host = limit(model.graph(), 5.0);
    let host = model.add(host);

    assert_eq!(host.handle().shadow_price("upper", "limit_price"), None);
    model.sync_constraints().unwrap();
    assert_eq!(host.handle().shadow_price("upper", "limit_price"), None);
    assert!(model.collect_outputs().unwrap().is_empty());
}

#[test]
fn invalidation_is_transitive() {
    let graph = graph();
    let host = graph.host("battery");
    let capacity = Tracked::with_value(&host, "capacity_kwh", 10.0);
    let inner_runs = Cell::new(0);
    let outer_runs = Cell::new(0);

    let usable = || {
        host.cached("usable_kwh", || {
            inner_runs.set(inner_runs.get() + 1);
            Ok(capacity.get()? * 0.7)
        })
    };
    let doubled = || {
        host.cached("doubled", || {
            outer_runs.set(outer_runs.get() + 1);
            Ok(usable()? * 2.0)
        })
    };

    assert_eq!(doubled().unwrap(), 14.0);
    assert_eq!((inner_runs.get(), outer_runs.get()), (1, 1));

    capacity.set(20.0);
    assert_eq!(host.is_cached("usable_kwh"), Some(false));
    assert_eq!(host.is_cached("doubled"), Some(false));

    assert_eq!(doubled().unwrap(), 28.0);
    assert_eq!((inner_runs.get(), outer_runs.get()), (2, 2));
    assert_eq!(host.is_cached("usable_kwh"), Some(true));
}

#[test]
fn methods_can_depend_on_other_hosts() {
    let graph = graph();
    let load = graph.host("load");
    let site = graph.host("site");
    let demand = Tracked::with_value(&load, "demand_kw", vec![1.0, 2.0]);
    let var = site.add_variable("import", 0.0, f64::INFINITY);

    let read = || {
        site.cached_constraint("cover_demand", || {
            let peak = demand.get()?.into_iter().fold(0.0, f64::max);
            Ok(Some(LinearExpr::from(var).geq(peak).into()))
        })
    };

    let rows = read().unwrap().unwrap();
    assert!(site.dependencies("cover_demand").iter().all(|dep| dep.host() == load.id()));

    demand.set(vec![1.0, 3.5]);
    assert_eq!(site.is_cached("cover_demand"), Some(false));
    assert_eq!(read().unwrap(), Some(rows.clone()));
    let row = *rows.iter().next().unwrap();
    assert_eq!(graph.solver().row_bounds(row).unwrap().0, 3.5);
}

#[test]
fn failed_computation_retries_on_next_read() {
    let graph = graph();
    let host = graph.host("grid");
    let fuse: Tracked<f64> = host.param("fuse_kw");
    let var = host.add_variable("import", 0.0, f64::INFINITY);
    let read = || {
        host.cached_constraint("fuse_limit", || {
            Ok(Some(LinearExpr::from(var).leq(fuse.get()?).into()))
        })
    };

    assert!(matches!(read(), Err(Error::UninitializedParameter { name: "fuse_kw", .. })));
    assert_eq!(graph.solver().num_rows(), 0);

    fuse.set(16.0);
    assert!(read().unwrap().is_some());
    assert_eq!(host.recomputations("fuse_limit"), 1);
}

#[test]
fn removing_a_host_retires_its_rows() {
    let mut model = OptimizationModel::with_lp(ShapeChangePolicy::Reject);
    let host = limit(model.graph(), 5.0);
    let host = model.add(host);
    model.sync_constraints().unwrap();

    assert!(model.remove(host.handle().id()).unwrap());
    assert_eq!(model.hosts().count(), 0);
    let solver = model.graph().solver();
    assert_eq!(solver.num_rows(), 1, "row indices are never reused");
    assert_eq!(solver.row_bounds(solver_row(0)).unwrap(), (f64::NEG_INFINITY, f64::INFINITY));
    assert!(solver.row_coefficients(solver_row(0)).unwrap().is_empty());
}

fn solver_row(index: usize) -> open_energy_incremental::solver::RowId {
    open_energy_incremental::solver::RowId(index)
}

#[test]
fn host_types_are_reported() {
    let graph = graph();
    let host = limit(&graph, 1.0);
    let host: &dyn AnyHost = &host;
    assert_eq!(host.host_type(), "limit");
}

/// Rows as the solver holds them: bounds plus coefficient map
fn snapshot(graph: &Graph, rows: &RowHandles) -> Vec<((f64, f64), BTreeMap<VariableId, f64>)> {
    let solver = graph.solver();
    rows.iter()
        .map(|row| (solver.row_bounds(*row).unwrap(), solver.row_coefficients(*row).unwrap()))
        .collect()
}

struct Rows {
    graph: Rc<Graph>,
    handle: HostHandle,
    vars: Vec<VariableId>,
    weights: Tracked<Vec<f64>>,
    upper: Tracked<Vec<f64>>,
}

impl Rows {
    fn new(weights: Vec<f64>, upper: Vec<f64>) -> Self {
        let graph = graph();
        let handle = graph.host("rows");
        let vars = (0..3)
            .map(|i| handle.add_variable(&format!("x{i}"), 0.0, 1.0))
            .collect();
        Self {
            weights: Tracked::with_value(&handle, "weights", weights),
            upper: Tracked::with_value(&handle, "upper", upper),
            graph,
            handle,
            vars,
        }
    }

    fn read(&self) -> RowHandles {
        self.handle
            .cached_constraint("weighted", || {
                let weights = self.weights.get()?;
                let upper = self.upper.get()?;
                let rows = upper
                    .iter()
                    .enumerate()
                    .map(|(i, bound)| {
                        let mut expr = LinearExpr::zero();
                        for (j, var) in self.vars.iter().enumerate() {
                            expr.add_term(*var, weights[i * 3 + j]);
                        }
                        expr.leq(*bound)
                    })
                    .collect::<Vec<_>>();
                Ok(Some(RowSet::from(rows)))
            })
            .unwrap()
            .unwrap()
    }
}

fn weight() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.0), -5.0f64..5.0]
}

proptest! {
    #[test]
    fn patching_matches_a_cold_build(
        w1 in prop::collection::vec(weight(), 9),
        w2 in prop::collection::vec(weight(), 9),
        u1 in prop::collection::vec(-10.0f64..10.0, 3),
        u2 in prop::collection::vec(-10.0f64..10.0, 3),
    ) {
        let warm = Rows::new(w1, u1);
        let rows = warm.read();
        warm.weights.set(w2.clone());
        warm.upper.set(u2.clone());
        prop_assert_eq!(warm.read(), rows.clone());

        let cold = Rows::new(w2, u2);
        let cold_rows = cold.read();

        prop_assert_eq!(snapshot(&warm.graph, &rows), snapshot(&cold.graph, &cold_rows));
        prop_assert_eq!(warm.graph.solver().num_rows(), 3);
    }
}
