//! Persistent linear model
//!
//! `LpModel` keeps variables, rows and the objective in memory with stable
//! indices. Row bounds and individual matrix cells can be changed in place,
//! which is what the reactive layer relies on between optimization cycles.
//!
//! Solving hands the current model to `good_lp` using the pure-Rust clarabel
//! backend. Like the battery scheduler, the model is solved as a continuous
//! relaxation; integer variables are not supported.

use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{LinearExpr, RowId, RowSpec, SolveOutcome, Solver, SolverError, VariableId};

#[derive(Debug, Clone)]
struct VariableDef {
    name: String,
    lower: f64,
    upper: f64,
}

#[derive(Debug, Clone)]
struct LpSolution {
    values: Vec<f64>,
    duals: Vec<f64>,
    objective_value: f64,
}

#[derive(Debug, Default)]
pub struct LpModel {
    variables: Vec<VariableDef>,
    rows: Vec<RowSpec>,
    objective: LinearExpr,
    /// Cleared by every mutation so duals and values never describe a stale model.
    solution: Option<LpSolution>,
}

impl LpModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn variable_name(&self, variable: VariableId) -> Option<&str> {
        self.variables.get(variable.index()).map(|def| def.name.as_str())
    }

    pub fn row(&self, row: RowId) -> Option<&RowSpec> {
        self.rows.get(row.index())
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn has_solution(&self) -> bool {
        self.solution.is_some()
    }

    fn row_mut(&mut self, row: RowId) -> Result<&mut RowSpec, SolverError> {
        self.solution = None;
        self.rows.get_mut(row.index()).ok_or(SolverError::UnknownRow(row))
    }

    #[cfg(feature = "optimization")]
    fn solve_lp(&self) -> Result<LpSolution, SolverError> {
        use good_lp::{
            clarabel, constraint, variable, DualValues, Expression, ProblemVariables,
            ResolutionError, Solution, SolutionWithDual, SolverModel,
        };

        enum RowRefs {
            Equal(good_lp::constraint::ConstraintReference),
            Range {
                lower: Option<good_lp::constraint::ConstraintReference>,
                upper: Option<good_lp::constraint::ConstraintReference>,
            },
        }

        let mut problem = ProblemVariables::new();
        let vars: Vec<good_lp::Variable> = self
            .variables
            .iter()
            .map(|def| {
                let mut definition = variable().name(def.name.clone());
                if def.lower.is_finite() {
                    definition = definition.min(def.lower);
                }
                if def.upper.is_finite() {
                    definition = definition.max(def.upper);
                }
                problem.add(definition)
            })
            .collect();

        let objective: Expression = self
            .objective
            .terms()
            .map(|(var, coef)| coef * vars[var.index()])
            .sum();

        let mut model = problem.minimise(objective).using(clarabel);

        let mut refs = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let expr: Expression = row
                .coefficients
                .iter()
                .map(|(var, coef)| *coef * vars[var.index()])
                .sum();

            if row.lower == row.upper && row.upper.is_finite() {
                refs.push(RowRefs::Equal(
                    model.add_constraint(constraint!(expr == row.upper)),
                ));
            } else {
                let lower = row
                    .lower
                    .is_finite()
                    .then(|| model.add_constraint(constraint!(expr.clone() >= row.lower)));
                let upper = row
                    .upper
                    .is_finite()
                    .then(|| model.add_constraint(constraint!(expr.clone() <= row.upper)));
                refs.push(RowRefs::Range { lower, upper });
            }
        }

        let mut solution = model.solve().map_err(|err| match err {
            ResolutionError::Infeasible => SolverError::Infeasible,
            ResolutionError::Unbounded => SolverError::Unbounded,
            other => SolverError::Backend(other.to_string()),
        })?;

        let values: Vec<f64> = vars.iter().map(|var| solution.value(*var)).collect();

        // good_lp reports each dual as d(objective)/d(rhs) of its own
        // constraint. At most one side of a range row is active.
        let dual_values = solution.compute_dual();
        let duals = refs
            .into_iter()
            .map(|r| match r {
                RowRefs::Equal(c) => dual_values.dual(c),
                RowRefs::Range { lower, upper } => {
                    lower.map_or(0.0, |c| dual_values.dual(c))
                        + upper.map_or(0.0, |c| dual_values.dual(c))
                }
            })
            .collect();

        let objective_value = self.objective.evaluate(|var| values[var.index()]);

        Ok(LpSolution {
            values,
            duals,
            objective_value,
        })
    }

    #[cfg(not(feature = "optimization"))]
    fn solve_lp(&self) -> Result<LpSolution, SolverError> {
        Err(SolverError::BackendUnavailable)
    }
}

impl Solver for LpModel {
    fn add_variable(&mut self, name: &str, lower: f64, upper: f64) -> VariableId {
        self.solution = None;
        self.variables.push(VariableDef {
            name: name.to_string(),
            lower,
            upper,
        });
        VariableId(self.variables.len() - 1)
    }

    fn add_row(&mut self, row: &RowSpec) -> RowId {
        self.solution = None;
        self.rows.push(row.clone());
        RowId(self.rows.len() - 1)
    }

    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn row_bounds(&self, row: RowId) -> Result<(f64, f64), SolverError> {
        self.row(row)
            .map(|spec| (spec.lower, spec.upper))
            .ok_or(SolverError::UnknownRow(row))
    }

    fn row_coefficients(&self, row: RowId) -> Result<BTreeMap<VariableId, f64>, SolverError> {
        self.row(row)
            .map(|spec| spec.coefficients.clone())
            .ok_or(SolverError::UnknownRow(row))
    }

    fn set_row_bounds(&mut self, row: RowId, lower: f64, upper: f64) -> Result<(), SolverError> {
        let spec = self.row_mut(row)?;
        spec.lower = lower;
        spec.upper = upper;
        Ok(())
    }

    fn set_coefficient(
        &mut self,
        row: RowId,
        variable: VariableId,
        value: f64,
    ) -> Result<(), SolverError> {
        if variable.index() >= self.variables.len() {
            return Err(SolverError::UnknownVariable(variable));
        }
        let spec = self.row_mut(row)?;
        if value == 0.0 {
            spec.coefficients.remove(&variable);
        } else {
            spec.coefficients.insert(variable, value);
        }
        Ok(())
    }

    fn row_dual(&self, row: RowId) -> Option<f64> {
        self.solution
            .as_ref()
            .and_then(|solution| solution.duals.get(row.index()).copied())
    }

    fn variable_value(&self, variable: VariableId) -> Option<f64> {
        self.solution
            .as_ref()
            .and_then(|solution| solution.values.get(variable.index()).copied())
    }

    fn set_objective(&mut self, objective: LinearExpr) {
        self.solution = None;
        self.objective = objective;
    }

    fn solve(&mut self) -> Result<SolveOutcome, SolverError> {
        debug!(
            rows = self.rows.len(),
            variables = self.variables.len(),
            "solving linear model"
        );
        let solution = self.solve_lp()?;
        let outcome = SolveOutcome {
            objective_value: solution.objective_value,
            rows: self.rows.len(),
            variables: self.variables.len(),
        };
        info!(objective = outcome.objective_value, "linear model solved");
        self.solution = Some(solution);
        Ok(outcome)
    }
}
