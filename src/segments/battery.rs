//! Battery storage segment
//!
//! Charge and discharge power per step plus the state of charge (in percent
//! of capacity) at every step boundary. The formulation is the continuous
//! relaxation the day-ahead scheduler uses; what is new is that every row is
//! produced by a cached constraint, so a changed parameter only patches the
//! rows that read it.

use once_cell::sync::Lazy;

use crate::config::{BatteryConfig, SiteConfig};
use crate::error::Result;
use crate::reactive::{Host, HostHandle, MethodRegistry, OutputValue, Tracked};
use crate::solver::{CostTerms, LinearExpr, RowExpr, RowSet, VariableId};

pub struct Battery {
    handle: HostHandle,
    pub charge: Vec<VariableId>,
    pub discharge: Vec<VariableId>,
    /// `horizon + 1` entries; `soc[0]` is the measured state
    pub soc: Vec<VariableId>,

    pub capacity_kwh: Tracked<f64>,
    pub initial_soc_percent: Tracked<f64>,
    pub max_charge_kw: Tracked<f64>,
    pub max_discharge_kw: Tracked<f64>,
    pub efficiency: Tracked<f64>,
    pub min_soc_percent: Tracked<f64>,
    pub max_soc_percent: Tracked<f64>,
    pub step_hours: Tracked<f64>,
    pub wear_cost_per_kwh: Tracked<Option<f64>>,
    /// `None` when the schedule has no end-of-horizon target
    pub target_final_soc_percent: Tracked<Option<f64>>,
}

static BATTERY_METHODS: Lazy<MethodRegistry<Battery>> = Lazy::new(|| {
    MethodRegistry::new("battery")
        .constraint("initial_soc", Battery::initial_soc)
        .priced_constraint("soc_balance", "energy_value", Battery::soc_balance)
        .constraint("soc_limits", Battery::soc_limits)
        .constraint("charge_limit", Battery::charge_limit)
        .constraint("discharge_limit", Battery::discharge_limit)
        .constraint("final_soc", Battery::final_soc)
        .cost("wear_cost", Battery::wear_cost)
        .output("soc_trajectory", "soc_percent", Battery::soc_trajectory)
        .output("power_schedule", "battery_power_kw", Battery::power_schedule)
});

impl Host for Battery {
    fn handle(&self) -> &HostHandle {
        &self.handle
    }

    fn registry() -> &'static MethodRegistry<Self> {
        &BATTERY_METHODS
    }
}

impl Battery {
    pub fn new(handle: HostHandle, config: &BatteryConfig, site: &SiteConfig) -> Self {
        let horizon = site.horizon_steps;
        let charge = (0..horizon)
            .map(|t| handle.add_variable(&format!("charge[{t}]"), 0.0, f64::INFINITY))
            .collect();
        let discharge = (0..horizon)
            .map(|t| handle.add_variable(&format!("discharge[{t}]"), 0.0, f64::INFINITY))
            .collect();
        let soc = (0..=horizon)
            .map(|t| handle.add_variable(&format!("soc[{t}]"), 0.0, 100.0))
            .collect();

        Self {
            charge,
            discharge,
            soc,
            capacity_kwh: Tracked::with_value(&handle, "capacity_kwh", config.capacity_kwh),
            initial_soc_percent: Tracked::with_value(
                &handle,
                "initial_soc_percent",
                config.initial_soc_percent,
            ),
            max_charge_kw: Tracked::with_value(&handle, "max_charge_kw", config.max_charge_kw),
            max_discharge_kw: Tracked::with_value(
                &handle,
                "max_discharge_kw",
                config.max_discharge_kw,
            ),
            efficiency: Tracked::with_value(&handle, "efficiency", config.efficiency),
            min_soc_percent: Tracked::with_value(
                &handle,
                "min_soc_percent",
                config.min_soc_percent,
            ),
            max_soc_percent: Tracked::with_value(
                &handle,
                "max_soc_percent",
                config.max_soc_percent,
            ),
            step_hours: Tracked::with_value(&handle, "step_hours", site.step_hours()),
            wear_cost_per_kwh: Tracked::with_value(
                &handle,
                "wear_cost_per_kwh",
                config.wear_cost_per_kwh,
            ),
            target_final_soc_percent: Tracked::with_value(
                &handle,
                "target_final_soc_percent",
                config.target_final_soc_percent,
            ),
            handle,
        }
    }

    pub fn horizon(&self) -> usize {
        self.charge.len()
    }

    /// SoC band the schedule may use, in percent.
    pub fn usable_window(&self) -> Result<(f64, f64)> {
        self.handle.cached("usable_window", || {
            let min = self.min_soc_percent.get()?;
            let max = self.max_soc_percent.get()?;
            Ok((min, max.max(min)))
        })
    }

    fn initial_soc(&self) -> Result<Option<RowSet>> {
        let soc = self.initial_soc_percent.get()?;
        Ok(Some(LinearExpr::from(self.soc[0]).equals(soc).into()))
    }

    /// `soc[t+1] = soc[t] + (eff * charge - discharge / eff) * dt / capacity`
    fn soc_balance(&self) -> Result<Option<RowSet>> {
        let capacity = self.capacity_kwh.get()?;
        let efficiency = self.efficiency.get()?;
        let dt = self.step_hours.get()?;
        let percent_per_kwh = 100.0 / capacity;

        let rows = (0..self.horizon())
            .map(|t| {
                let mut expr = LinearExpr::from(self.soc[t + 1]);
                expr.add_term(self.soc[t], -1.0);
                expr.add_term(self.charge[t], -efficiency * dt * percent_per_kwh);
                expr.add_term(self.discharge[t], dt * percent_per_kwh / efficiency);
                expr.equals(0.0)
            })
            .collect::<Vec<RowExpr>>();
        Ok(Some(rows.into()))
    }

    fn soc_limits(&self) -> Result<Option<RowSet>> {
        let (min, max) = self.usable_window()?;
        let rows = self.soc[1..]
            .iter()
            .map(|soc| LinearExpr::from(*soc).between(min, max))
            .collect::<Vec<_>>();
        Ok(Some(rows.into()))
    }

    fn charge_limit(&self) -> Result<Option<RowSet>> {
        let limit = self.max_charge_kw.get()?;
        Ok(Some(upper_limits(&self.charge, limit)))
    }

    fn discharge_limit(&self) -> Result<Option<RowSet>> {
        let limit = self.max_discharge_kw.get()?;
        Ok(Some(upper_limits(&self.discharge, limit)))
    }

    fn final_soc(&self) -> Result<Option<RowSet>> {
        let Some(target) = self.target_final_soc_percent.get()? else {
            return Ok(None);
        };
        let last = self.soc[self.horizon()];
        Ok(Some(LinearExpr::from(last).geq(target).into()))
    }

    /// Cycling both ways wears the cells
    fn wear_cost(&self) -> Result<Option<CostTerms>> {
        let Some(cost) = self.wear_cost_per_kwh.get()? else {
            return Ok(None);
        };
        let dt = self.step_hours.get()?;
        let terms = self
            .charge
            .iter()
            .zip(&self.discharge)
            .map(|(charge, discharge)| cost * dt * *charge + cost * dt * *discharge)
            .collect::<Vec<_>>();
        Ok(Some(terms.into()))
    }

    fn soc_trajectory(&self) -> Result<Option<OutputValue>> {
        Ok(values_of(&self.handle, &self.soc).map(OutputValue::Series))
    }

    /// Net battery power per step, positive while charging.
    fn power_schedule(&self) -> Result<Option<OutputValue>> {
        let charge = values_of(&self.handle, &self.charge);
        let discharge = values_of(&self.handle, &self.discharge);
        Ok(charge.zip(discharge).map(|(charge, discharge)| {
            OutputValue::Series(charge.iter().zip(&discharge).map(|(c, d)| c - d).collect())
        }))
    }
}

pub(crate) fn upper_limits(variables: &[VariableId], limit: f64) -> RowSet {
    variables
        .iter()
        .map(|variable| LinearExpr::from(*variable).leq(limit))
        .collect::<Vec<_>>()
        .into()
}

/// Solution values of `variables`, if the solver holds a solution.
pub(crate) fn values_of(handle: &HostHandle, variables: &[VariableId]) -> Option<Vec<f64>> {
    let solver = handle.graph().solver();
    variables
        .iter()
        .map(|variable| solver.variable_value(*variable))
        .collect()
}
