//! Per-host-type method registry
//!
//! Each host type builds its registry once (usually in a `once_cell` static)
//! listing its reactive methods by name and kind. The model uses it to run
//! the uniform passes: sync all constraints, sum all costs, collect all
//! outputs.

use strum::{AsRefStr, Display};

use super::{HostHandle, Output, OutputValue};
use crate::error::{Error, Result};
use crate::solver::{CostTerms, LinearExpr, RowHandles, RowSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum MethodKind {
    Constraint,
    Cost,
    Output,
}

pub type ConstraintFn<H> = fn(&H) -> Result<Option<RowSet>>;
pub type CostFn<H> = fn(&H) -> Result<Option<CostTerms>>;
pub type OutputFn<H> = fn(&H) -> Result<Option<OutputValue>>;

enum Compute<H> {
    Constraint(ConstraintFn<H>),
    Cost(CostFn<H>),
    Output(OutputFn<H>),
}

pub struct MethodSpec<H> {
    pub name: &'static str,
    /// Label of the emitted output; for constraints, of their shadow prices.
    pub label: Option<&'static str>,
    compute: Compute<H>,
}

impl<H> MethodSpec<H> {
    pub fn kind(&self) -> MethodKind {
        match self.compute {
            Compute::Constraint(_) => MethodKind::Constraint,
            Compute::Cost(_) => MethodKind::Cost,
            Compute::Output(_) => MethodKind::Output,
        }
    }
}

pub struct MethodRegistry<H> {
    host_type: &'static str,
    methods: Vec<MethodSpec<H>>,
}

impl<H> MethodRegistry<H> {
    pub fn new(host_type: &'static str) -> Self {
        Self {
            host_type,
            methods: Vec::new(),
        }
    }

    fn register(
        mut self,
        name: &'static str,
        label: Option<&'static str>,
        compute: Compute<H>,
    ) -> Self {
        assert!(
            self.get(name).is_none(),
            "method `{name}` registered twice on host type `{}`",
            self.host_type
        );
        self.methods.push(MethodSpec { name, label, compute });
        self
    }

    pub fn constraint(self, name: &'static str, compute: ConstraintFn<H>) -> Self {
        self.register(name, None, Compute::Constraint(compute))
    }

    /// A constraint whose row duals are reported under `label`.
    pub fn priced_constraint(
        self,
        name: &'static str,
        label: &'static str,
        compute: ConstraintFn<H>,
    ) -> Self {
        self.register(name, Some(label), Compute::Constraint(compute))
    }

    pub fn cost(self, name: &'static str, compute: CostFn<H>) -> Self {
        self.register(name, None, Compute::Cost(compute))
    }

    pub fn output(self, name: &'static str, label: &'static str, compute: OutputFn<H>) -> Self {
        self.register(name, Some(label), Compute::Output(compute))
    }

    pub fn host_type(&self) -> &'static str {
        self.host_type
    }

    pub fn get(&self, name: &str) -> Option<&MethodSpec<H>> {
        self.methods.iter().find(|spec| spec.name == name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodSpec<H>> {
        self.methods.iter()
    }

    pub fn of_kind(&self, kind: MethodKind) -> impl Iterator<Item = &MethodSpec<H>> {
        self.methods.iter().filter(move |spec| spec.kind() == kind)
    }

    fn unknown(&self, kind: MethodKind, name: &str) -> Error {
        Error::UnknownMethod {
            host_type: self.host_type,
            kind,
            method: name.to_string(),
        }
    }
}

/// A model element with reactive methods.
pub trait Host: 'static {
    fn handle(&self) -> &HostHandle;

    fn registry() -> &'static MethodRegistry<Self>
    where
        Self: Sized;

    /// Reads registered constraint `name` through the cache.
    fn constraint(&self, name: &'static str) -> Result<Option<RowHandles>>
    where
        Self: Sized,
    {
        let registry = Self::registry();
        match registry.get(name).map(|spec| &spec.compute) {
            Some(Compute::Constraint(compute)) => {
                self.handle().cached_constraint(name, || compute(self))
            }
            _ => Err(registry.unknown(MethodKind::Constraint, name)),
        }
    }

    /// Reads registered cost `name` through the cache.
    fn cost(&self, name: &'static str) -> Result<Option<CostTerms>>
    where
        Self: Sized,
    {
        let registry = Self::registry();
        match registry.get(name).map(|spec| &spec.compute) {
            Some(Compute::Cost(compute)) => self.handle().cached_cost(name, || compute(self)),
            _ => Err(registry.unknown(MethodKind::Cost, name)),
        }
    }

    /// Evaluates registered output `name`. Outputs read solver values, which
    /// are not tracked, so they are never cached.
    fn output(&self, name: &'static str) -> Result<Option<Output>>
    where
        Self: Sized,
    {
        let registry = Self::registry();
        match registry.get(name) {
            Some(MethodSpec {
                label,
                compute: Compute::Output(compute),
                ..
            }) => Ok(compute(self)?.map(|value| Output {
                host: self.handle().label().to_string(),
                method: name,
                label: label.unwrap_or(name).to_string(),
                value,
            })),
            _ => Err(registry.unknown(MethodKind::Output, name)),
        }
    }
}

/// Object-safe view of a [`Host`], used by the model to drive hosts of
/// different types uniformly.
pub trait AnyHost {
    fn host_handle(&self) -> &HostHandle;

    fn host_type(&self) -> &'static str;

    /// Reads every registered constraint, creating or patching rows as needed.
    fn sync_constraints(&self) -> Result<()>;

    /// Sum of every registered cost.
    fn cost_total(&self) -> Result<LinearExpr>;

    /// Registered outputs plus shadow prices of priced constraints.
    fn collect_outputs(&self) -> Result<Vec<Output>>;
}

impl<H: Host> AnyHost for H {
    fn host_handle(&self) -> &HostHandle {
        self.handle()
    }

    fn host_type(&self) -> &'static str {
        H::registry().host_type()
    }

    fn sync_constraints(&self) -> Result<()> {
        for spec in H::registry().of_kind(MethodKind::Constraint) {
            self.constraint(spec.name)?;
        }
        Ok(())
    }

    fn cost_total(&self) -> Result<LinearExpr> {
        let costs = H::registry()
            .of_kind(MethodKind::Cost)
            .map(|spec| self.cost(spec.name))
            .collect::<Result<Vec<_>>>()?;
        Ok(super::cost::total(&costs))
    }

    fn collect_outputs(&self) -> Result<Vec<Output>> {
        let mut outputs = Vec::new();
        for spec in H::registry().methods() {
            match spec.kind() {
                MethodKind::Output => outputs.extend(self.output(spec.name)?),
                MethodKind::Constraint => {
                    if let Some(label) = spec.label {
                        outputs.extend(self.handle().shadow_price(spec.name, label));
                    }
                }
                MethodKind::Cost => {}
            }
        }
        Ok(outputs)
    }
}
