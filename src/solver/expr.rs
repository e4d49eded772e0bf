use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use super::{RowId, VariableId};

/// Affine expression over decision variables: `sum(coef * var) + constant`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: BTreeMap<VariableId, f64>,
    constant: f64,
}

impl LinearExpr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn term(variable: VariableId, coefficient: f64) -> Self {
        let mut expr = Self::zero();
        expr.add_term(variable, coefficient);
        expr
    }

    /// Accumulates `coefficient` onto `variable`'s existing coefficient.
    pub fn add_term(&mut self, variable: VariableId, coefficient: f64) {
        *self.terms.entry(variable).or_insert(0.0) += coefficient;
    }

    pub fn coefficient(&self, variable: VariableId) -> f64 {
        self.terms.get(&variable).copied().unwrap_or(0.0)
    }

    pub fn constant_value(&self) -> f64 {
        self.constant
    }

    pub fn terms(&self) -> impl Iterator<Item = (VariableId, f64)> + '_ {
        self.terms.iter().map(|(var, coef)| (*var, *coef))
    }

    pub fn is_constant(&self) -> bool {
        self.terms.values().all(|coef| *coef == 0.0)
    }

    /// Evaluates the expression against a variable assignment.
    pub fn evaluate(&self, value_of: impl Fn(VariableId) -> f64) -> f64 {
        self.terms
            .iter()
            .map(|(var, coef)| coef * value_of(*var))
            .sum::<f64>()
            + self.constant
    }

    pub fn leq(self, upper: f64) -> RowExpr {
        RowExpr::new(self, None, Some(upper))
    }

    pub fn geq(self, lower: f64) -> RowExpr {
        RowExpr::new(self, Some(lower), None)
    }

    pub fn equals(self, value: f64) -> RowExpr {
        RowExpr::new(self, Some(value), Some(value))
    }

    pub fn between(self, lower: f64, upper: f64) -> RowExpr {
        RowExpr::new(self, Some(lower), Some(upper))
    }
}

impl From<VariableId> for LinearExpr {
    fn from(variable: VariableId) -> Self {
        Self::term(variable, 1.0)
    }
}

impl From<f64> for LinearExpr {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

impl AddAssign for LinearExpr {
    fn add_assign(&mut self, rhs: Self) {
        for (var, coef) in rhs.terms {
            self.add_term(var, coef);
        }
        self.constant += rhs.constant;
    }
}

impl Add for LinearExpr {
    type Output = LinearExpr;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl Neg for LinearExpr {
    type Output = LinearExpr;

    fn neg(self) -> Self::Output {
        self * -1.0
    }
}

impl Sub for LinearExpr {
    type Output = LinearExpr;

    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl Mul<f64> for LinearExpr {
    type Output = LinearExpr;

    fn mul(mut self, rhs: f64) -> Self::Output {
        for coef in self.terms.values_mut() {
            *coef *= rhs;
        }
        self.constant *= rhs;
        self
    }
}

impl Mul<VariableId> for f64 {
    type Output = LinearExpr;

    fn mul(self, rhs: VariableId) -> Self::Output {
        LinearExpr::term(rhs, self)
    }
}

impl Sum for LinearExpr {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(LinearExpr::zero(), |acc, expr| acc + expr)
    }
}

/// One bounded linear constraint as produced by a host computation
#[derive(Debug, Clone, PartialEq)]
pub struct RowExpr {
    pub expr: LinearExpr,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl RowExpr {
    pub fn new(expr: LinearExpr, lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { expr, lower, upper }
    }

    /// Solver-side form: the constant moves into the bounds, a missing bound
    /// becomes an infinite one and zero coefficients are dropped.
    pub fn to_spec(&self) -> RowSpec {
        let shift = self.expr.constant_value();
        RowSpec {
            lower: self.lower.map_or(f64::NEG_INFINITY, |lower| lower - shift),
            upper: self.upper.map_or(f64::INFINITY, |upper| upper - shift),
            coefficients: self
                .expr
                .terms()
                .filter(|(_, coef)| *coef != 0.0)
                .collect(),
        }
    }
}

/// A row exactly as the solver stores it
#[derive(Debug, Clone, PartialEq)]
pub struct RowSpec {
    pub lower: f64,
    pub upper: f64,
    pub coefficients: BTreeMap<VariableId, f64>,
}

impl RowSpec {
    /// A row with free bounds and no coefficients; it constrains nothing.
    pub fn free() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            coefficients: BTreeMap::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.lower == f64::NEG_INFINITY && self.upper == f64::INFINITY
    }
}

/// Either one item or an ordered list of items.
///
/// Constraint results, their row handles and cost terms all come in this
/// shape; patching requires the shape to stay the same between cycles.
#[derive(Debug, Clone, PartialEq)]
pub enum Shaped<T> {
    Single(T),
    List(Vec<T>),
}

pub type RowSet = Shaped<RowExpr>;
pub type RowHandles = Shaped<RowId>;
pub type CostTerms = Shaped<LinearExpr>;

impl<T> Shaped<T> {
    pub fn len(&self) -> usize {
        match self {
            Shaped::Single(_) => 1,
            Shaped::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Shaped::Single(item) => std::slice::from_ref(item).iter(),
            Shaped::List(items) => items.iter(),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Shaped<U> {
        match self {
            Shaped::Single(item) => Shaped::Single(f(item)),
            Shaped::List(items) => Shaped::List(items.iter().map(f).collect()),
        }
    }

    pub fn same_shape<U>(&self, other: &Shaped<U>) -> bool {
        match (self, other) {
            (Shaped::Single(_), Shaped::Single(_)) => true,
            (Shaped::List(a), Shaped::List(b)) => a.len() == b.len(),
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Shaped::Single(_) => "a single row".to_string(),
            Shaped::List(items) => format!("a list of {} rows", items.len()),
        }
    }
}

impl CostTerms {
    pub fn total(&self) -> LinearExpr {
        self.iter().cloned().sum()
    }
}

impl From<LinearExpr> for CostTerms {
    fn from(expr: LinearExpr) -> Self {
        Shaped::Single(expr)
    }
}

impl From<Vec<LinearExpr>> for CostTerms {
    fn from(exprs: Vec<LinearExpr>) -> Self {
        Shaped::List(exprs)
    }
}

impl From<RowExpr> for RowSet {
    fn from(row: RowExpr) -> Self {
        Shaped::Single(row)
    }
}

impl From<Vec<RowExpr>> for RowSet {
    fn from(rows: Vec<RowExpr>) -> Self {
        Shaped::List(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: VariableId = VariableId(0);
    const Y: VariableId = VariableId(1);

    #[test]
    fn test_terms_accumulate() {
        let expr = 2.0 * X + 3.0 * Y + LinearExpr::from(X) - 1.0 * Y;
        assert_eq!(expr.coefficient(X), 3.0);
        assert_eq!(expr.coefficient(Y), 2.0);
        assert_eq!(expr.constant_value(), 0.0);
    }

    #[test]
    fn test_constant_moves_into_bounds() {
        let row = (LinearExpr::from(X) + LinearExpr::constant(2.0)).between(1.0, 10.0);
        let spec = row.to_spec();
        assert_eq!(spec.lower, -1.0);
        assert_eq!(spec.upper, 8.0);
        assert_eq!(spec.coefficients.get(&X), Some(&1.0));
    }

    #[test]
    fn test_missing_bound_becomes_infinite() {
        let spec = LinearExpr::from(X).leq(5.0).to_spec();
        assert_eq!(spec.lower, f64::NEG_INFINITY);
        assert_eq!(spec.upper, 5.0);
    }

    #[test]
    fn test_spec_drops_cancelled_terms() {
        let spec = (LinearExpr::from(X) - LinearExpr::from(X) + 1.0 * Y)
            .equals(0.0)
            .to_spec();
        assert!(!spec.coefficients.contains_key(&X));
        assert_eq!(spec.coefficients.len(), 1);
    }

    #[test]
    fn test_shape_comparison() {
        let single: Shaped<i32> = Shaped::Single(1);
        let pair: Shaped<i32> = Shaped::List(vec![1, 2]);
        let other_pair: Shaped<&str> = Shaped::List(vec!["a", "b"]);
        assert!(pair.same_shape(&other_pair));
        assert!(!single.same_shape(&pair));
        assert!(!pair.same_shape(&Shaped::<i32>::List(vec![1])));
    }

    #[test]
    fn test_cost_total_sums_terms() {
        let costs = CostTerms::List(vec![LinearExpr::constant(1.5), 2.0 * X]);
        let total = costs.total();
        assert_eq!(total.constant_value(), 1.5);
        assert_eq!(total.coefficient(X), 2.0);
    }
}
