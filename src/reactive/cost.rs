//! Cached cost method
//!
//! Objective contributions are cached like any other method but own no
//! solver state: the objective is re-assembled as a flat sum before every
//! solve, which does not disturb the rows the solver keeps between cycles.

use super::{method, HostHandle};
use crate::error::Result;
use crate::solver::{CostTerms, LinearExpr};

pub fn call(
    host: &HostHandle,
    name: &'static str,
    compute: impl FnOnce() -> Result<Option<CostTerms>>,
) -> Result<Option<CostTerms>> {
    method::call(host, name, compute)
}

/// Sums cost results; methods that returned `None` contribute nothing.
pub fn total<'a>(costs: impl IntoIterator<Item = &'a Option<CostTerms>>) -> LinearExpr {
    costs
        .into_iter()
        .flatten()
        .map(CostTerms::total)
        .sum()
}
