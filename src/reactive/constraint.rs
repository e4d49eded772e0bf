//! Cached constraint method
//!
//! Caches like any other method, but also owns the solver rows its result
//! describes. The first non-empty result creates rows; every later
//! recomputation with the same shape patches those rows in place, touching
//! only the bounds and matrix cells that actually moved. Keeping the rows
//! alive is what lets the solver reuse its previous basis.

use itertools::{EitherOrBoth, Itertools};
use ordered_float::OrderedFloat;
use std::rc::Rc;
use tracing::{debug, trace, warn};

use super::{
    method, scope, EngineStats, HostHandle, MethodKey, Output, OutputValue, ShapeChangePolicy,
};
use crate::error::{Error, Result};
use crate::solver::{RowHandles, RowId, RowSet, RowSpec, Shaped, Solver};

/// Reads constraint `name` on `host`, recomputing and syncing its rows when
/// the entry is missing or invalidated. Returns the row handles (none while
/// the constraint does not apply).
///
/// Rows are only touched after the full result is computed and its shape is
/// checked; a failing computation or a rejected shape change leaves both the
/// solver and the entry as they were.
pub fn call(
    host: &HostHandle,
    name: &'static str,
    compute: impl FnOnce() -> Result<Option<RowSet>>,
) -> Result<Option<RowHandles>> {
    let key = host.method_key(name);
    scope::record(key);

    let cached = host
        .graph()
        .cache()
        .lookup::<Rc<Option<RowSet>>>(&key, host.label())?;
    if cached.is_some() {
        return Ok(host.graph().cache().rows(&key));
    }

    let (result, deps) = method::recompute(host, &key, compute)?;
    let previous = host.graph().cache().rows(&key);

    let (rows, stats) = {
        let mut solver = host.graph().solver_mut();
        sync_rows(
            &mut *solver,
            host,
            &key,
            previous,
            result.as_ref(),
            host.graph().policy(),
        )?
    };
    host.graph().record(stats);

    let mut cache = host.graph().cache_mut();
    cache.commit(key, Rc::new(Rc::new(result)), deps);
    cache.set_rows(&key, rows.clone());
    Ok(rows)
}

/// Shadow prices for the rows owned by constraint `name`.
///
/// Independent of the cache: reads whatever duals the solver currently holds.
/// Returns `None` before the constraint produced rows or before a solve.
pub fn get_output(host: &HostHandle, name: &'static str, label: &str) -> Option<Output> {
    let rows = host.graph().cache().rows(&host.method_key(name))?;
    let solver = host.graph().solver();

    let value = match rows {
        Shaped::Single(row) => OutputValue::Scalar(solver.row_dual(row)?),
        Shaped::List(rows) if rows.is_empty() => return None,
        Shaped::List(rows) => OutputValue::Series(
            rows.iter()
                .map(|row| solver.row_dual(*row))
                .collect::<Option<Vec<_>>>()?,
        ),
    };

    Some(Output {
        host: host.label().to_string(),
        method: name,
        label: label.to_string(),
        value,
    })
}

fn sync_rows(
    solver: &mut dyn Solver,
    host: &HostHandle,
    key: &MethodKey,
    previous: Option<RowHandles>,
    next: Option<&RowSet>,
    policy: ShapeChangePolicy,
) -> Result<(Option<RowHandles>, EngineStats)> {
    let mut stats = EngineStats::default();

    match (previous, next) {
        (None, None) => Ok((None, stats)),
        (None, Some(set)) => {
            let rows = create_rows(solver, set, &mut stats);
            debug!(
                host = %host.label(),
                method = key.name,
                rows = rows.len(),
                "created constraint rows"
            );
            Ok((Some(rows), stats))
        }
        (Some(rows), Some(set)) if rows.same_shape(set) => {
            for (row, expr) in rows.iter().zip(set.iter()) {
                patch_row(solver, *row, &expr.to_spec(), &mut stats)?;
            }
            debug!(
                host = %host.label(),
                method = key.name,
                bounds = stats.bounds_patched,
                cells = stats.cells_patched,
                "patched constraint rows"
            );
            Ok((Some(rows), stats))
        }
        (previous, next) => {
            let from = previous.as_ref().map_or("no rows".to_string(), Shaped::describe);
            let to = next.map_or("no rows".to_string(), Shaped::describe);

            if policy == ShapeChangePolicy::Reject {
                return Err(Error::ShapeChanged {
                    host: host.label().to_string(),
                    method: key.name,
                    from,
                    to,
                });
            }

            warn!(
                host = %host.label(),
                method = key.name,
                %from,
                %to,
                "constraint changed shape, rebuilding rows"
            );
            if let Some(old) = &previous {
                for row in old.iter() {
                    retire_row(solver, *row, &mut stats)?;
                }
            }
            let rows = next.map(|set| create_rows(solver, set, &mut stats));
            Ok((rows, stats))
        }
    }
}

fn create_rows(solver: &mut dyn Solver, set: &RowSet, stats: &mut EngineStats) -> RowHandles {
    let specs: Vec<RowSpec> = set.iter().map(|row| row.to_spec()).collect();
    let ids = solver.add_rows(&specs);
    stats.rows_created += ids.len() as u64;
    match set {
        Shaped::Single(_) => Shaped::Single(ids[0]),
        Shaped::List(_) => Shaped::List(ids),
    }
}

fn same(a: f64, b: f64) -> bool {
    OrderedFloat(a) == OrderedFloat(b)
}

/// Brings `row` in line with `target`, writing only what differs.
fn patch_row(
    solver: &mut dyn Solver,
    row: RowId,
    target: &RowSpec,
    stats: &mut EngineStats,
) -> Result<()> {
    let (lower, upper) = solver.row_bounds(row)?;
    if !same(lower, target.lower) || !same(upper, target.upper) {
        trace!(%row, lower = target.lower, upper = target.upper, "patching row bounds");
        solver.set_row_bounds(row, target.lower, target.upper)?;
        stats.bounds_patched += 1;
    }

    let current = solver.row_coefficients(row)?;
    let changed: Vec<_> = current
        .iter()
        .merge_join_by(target.coefficients.iter(), |a, b| a.0.cmp(b.0))
        .filter_map(|pair| match pair {
            EitherOrBoth::Both((var, old), (_, new)) => (!same(*old, *new)).then_some((*var, *new)),
            EitherOrBoth::Left((var, _)) => Some((*var, 0.0)),
            EitherOrBoth::Right((var, new)) => Some((*var, *new)),
        })
        .collect();

    for (variable, value) in changed {
        trace!(%row, %variable, value, "patching coefficient");
        solver.set_coefficient(row, variable, value)?;
        stats.cells_patched += 1;
    }
    Ok(())
}

/// Neutralizes a row without deleting it: free bounds, no coefficients.
pub(crate) fn retire_row(
    solver: &mut dyn Solver,
    row: RowId,
    stats: &mut EngineStats,
) -> Result<()> {
    let free = RowSpec::free();
    solver.set_row_bounds(row, free.lower, free.upper)?;
    for variable in solver.row_coefficients(row)?.into_keys() {
        solver.set_coefficient(row, variable, 0.0)?;
    }
    stats.rows_retired += 1;
    Ok(())
}
