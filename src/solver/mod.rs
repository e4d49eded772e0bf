//! Solver boundary
//!
//! The reactive layer talks to the solver only through [`Solver`]. Rows and
//! variables are addressed by stable indices so that a row created in the
//! first optimization cycle can be patched in place in every later cycle.

pub mod expr;
pub mod lp;

pub use expr::*;
pub use lp::LpModel;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Handle of a decision variable inside one solver instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableId(pub usize);

impl VariableId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// Handle of a constraint row inside one solver instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub usize);

impl RowId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Solver-specific errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("unknown row {0}")]
    UnknownRow(RowId),
    #[error("unknown variable {0}")]
    UnknownVariable(VariableId),
    #[error("problem is infeasible")]
    Infeasible,
    #[error("problem is unbounded")]
    Unbounded,
    #[error("solver backend failed: {0}")]
    Backend(String),
    #[error("no solver backend compiled in (enable the 'optimization' feature)")]
    BackendUnavailable,
}

/// Result of a successful solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub objective_value: f64,
    pub rows: usize,
    pub variables: usize,
}

/// Persistent solver handle.
///
/// Implementations keep every row alive for their whole lifetime; row
/// indices are never reused.
#[cfg_attr(test, mockall::automock)]
pub trait Solver {
    fn add_variable(&mut self, name: &str, lower: f64, upper: f64) -> VariableId;

    fn add_row(&mut self, row: &RowSpec) -> RowId;

    fn add_rows(&mut self, rows: &[RowSpec]) -> Vec<RowId> {
        rows.iter().map(|row| self.add_row(row)).collect()
    }

    fn num_rows(&self) -> usize;

    fn row_bounds(&self, row: RowId) -> Result<(f64, f64), SolverError>;

    fn row_coefficients(&self, row: RowId) -> Result<BTreeMap<VariableId, f64>, SolverError>;

    fn set_row_bounds(&mut self, row: RowId, lower: f64, upper: f64) -> Result<(), SolverError>;

    /// Writes one matrix cell. A zero value removes the variable from the row.
    fn set_coefficient(
        &mut self,
        row: RowId,
        variable: VariableId,
        value: f64,
    ) -> Result<(), SolverError>;

    /// Dual value of `row` from the most recent solve, if one is available.
    fn row_dual(&self, row: RowId) -> Option<f64>;

    fn variable_value(&self, variable: VariableId) -> Option<f64>;

    /// Replaces the (minimised) objective.
    fn set_objective(&mut self, objective: LinearExpr);

    fn solve(&mut self) -> Result<SolveOutcome, SolverError>;
}
