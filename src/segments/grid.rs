//! Grid connection segment
//!
//! Import and export power per step, priced from the day-ahead curve. An
//! optional demand charge bills the highest import above a threshold; its
//! price and threshold only make sense together.

use once_cell::sync::Lazy;

use super::battery::{upper_limits, values_of};
use crate::config::{GridConfig, SiteConfig};
use crate::error::{Error, Result};
use crate::reactive::{Host, HostHandle, MethodRegistry, OutputValue, Tracked};
use crate::solver::{CostTerms, LinearExpr, RowSet, VariableId};

pub struct Grid {
    handle: HostHandle,
    pub import: Vec<VariableId>,
    pub export: Vec<VariableId>,
    /// Highest import above the demand-charge threshold
    pub peak: VariableId,

    pub import_price: Tracked<Vec<f64>>,
    pub export_price_ratio: Tracked<f64>,
    pub max_import_kw: Tracked<f64>,
    pub max_export_kw: Tracked<f64>,
    pub peak_price_per_kw: Tracked<Option<f64>>,
    pub peak_threshold_kw: Tracked<Option<f64>>,
    pub step_hours: Tracked<f64>,
}

static GRID_METHODS: Lazy<MethodRegistry<Grid>> = Lazy::new(|| {
    MethodRegistry::new("grid")
        .constraint("import_limit", Grid::import_limit)
        .constraint("export_limit", Grid::export_limit)
        .constraint("peak_tracking", Grid::peak_tracking)
        .cost("energy_cost", Grid::energy_cost)
        .cost("peak_cost", Grid::peak_cost)
        .output("import_schedule", "grid_import_kw", Grid::import_schedule)
        .output("export_schedule", "grid_export_kw", Grid::export_schedule)
});

impl Host for Grid {
    fn handle(&self) -> &HostHandle {
        &self.handle
    }

    fn registry() -> &'static MethodRegistry<Self> {
        &GRID_METHODS
    }
}

impl Grid {
    /// Fails when a demand-charge price comes without its threshold.
    pub fn new(
        handle: HostHandle,
        config: &GridConfig,
        site: &SiteConfig,
        import_price: Vec<f64>,
    ) -> Result<Self> {
        let horizon = site.horizon_steps;
        check_horizon(&handle, "import_price", horizon, &import_price)?;
        check_peak_tariff(&handle, config.peak_price_per_kw, config.peak_threshold_kw)?;

        let import = (0..horizon)
            .map(|t| handle.add_variable(&format!("import[{t}]"), 0.0, f64::INFINITY))
            .collect();
        let export = (0..horizon)
            .map(|t| handle.add_variable(&format!("export[{t}]"), 0.0, f64::INFINITY))
            .collect();
        let peak = handle.add_variable("peak", 0.0, f64::INFINITY);

        Ok(Self {
            import,
            export,
            peak,
            import_price: Tracked::with_value(&handle, "import_price", import_price),
            export_price_ratio: Tracked::with_value(
                &handle,
                "export_price_ratio",
                config.export_price_ratio,
            ),
            max_import_kw: Tracked::with_value(&handle, "max_import_kw", config.max_import_kw),
            max_export_kw: Tracked::with_value(&handle, "max_export_kw", config.max_export_kw),
            peak_price_per_kw: Tracked::with_value(
                &handle,
                "peak_price_per_kw",
                config.peak_price_per_kw,
            ),
            peak_threshold_kw: Tracked::with_value(
                &handle,
                "peak_threshold_kw",
                config.peak_threshold_kw,
            ),
            step_hours: Tracked::with_value(&handle, "step_hours", site.step_hours()),
            handle,
        })
    }

    pub fn horizon(&self) -> usize {
        self.import.len()
    }

    /// Replaces the day-ahead curve; returns whether anything changed.
    pub fn set_import_price(&self, prices: Vec<f64>) -> Result<bool> {
        check_horizon(&self.handle, "import_price", self.horizon(), &prices)?;
        Ok(self.import_price.set(prices))
    }

    /// Sets or clears the demand charge. Price and threshold travel together.
    pub fn set_peak_tariff(
        &self,
        price_per_kw: Option<f64>,
        threshold_kw: Option<f64>,
    ) -> Result<()> {
        check_peak_tariff(&self.handle, price_per_kw, threshold_kw)?;
        self.peak_threshold_kw.set(threshold_kw);
        self.peak_price_per_kw.set(price_per_kw);
        Ok(())
    }

    fn import_limit(&self) -> Result<Option<RowSet>> {
        Ok(Some(upper_limits(&self.import, self.max_import_kw.get()?)))
    }

    fn export_limit(&self) -> Result<Option<RowSet>> {
        Ok(Some(upper_limits(&self.export, self.max_export_kw.get()?)))
    }

    /// `peak >= import[t] - threshold` for every step
    fn peak_tracking(&self) -> Result<Option<RowSet>> {
        let Some(threshold) = self.peak_threshold_kw.get()? else {
            return Ok(None);
        };
        let rows = self
            .import
            .iter()
            .map(|import| {
                let mut expr = LinearExpr::from(self.peak);
                expr.add_term(*import, -1.0);
                expr.geq(-threshold)
            })
            .collect::<Vec<_>>();
        Ok(Some(rows.into()))
    }

    fn energy_cost(&self) -> Result<Option<CostTerms>> {
        let prices = self.import_price.get()?;
        let ratio = self.export_price_ratio.get()?;
        let dt = self.step_hours.get()?;

        let terms = prices
            .iter()
            .zip(self.import.iter().zip(&self.export))
            .map(|(price, (import, export))| price * dt * *import - ratio * price * dt * *export)
            .collect::<Vec<_>>();
        Ok(Some(terms.into()))
    }

    fn peak_cost(&self) -> Result<Option<CostTerms>> {
        Ok(self
            .peak_price_per_kw
            .get()?
            .map(|price| CostTerms::from(price * self.peak)))
    }

    fn import_schedule(&self) -> Result<Option<OutputValue>> {
        Ok(values_of(&self.handle, &self.import).map(OutputValue::Series))
    }

    fn export_schedule(&self) -> Result<Option<OutputValue>> {
        Ok(values_of(&self.handle, &self.export).map(OutputValue::Series))
    }
}

fn check_horizon(handle: &HostHandle, name: &str, horizon: usize, values: &[f64]) -> Result<()> {
    if values.len() != horizon {
        return Err(Error::InvalidConfig(format!(
            "{}.{name} has {} entries, horizon is {horizon} steps",
            handle.label(),
            values.len()
        )));
    }
    Ok(())
}

fn check_peak_tariff(
    handle: &HostHandle,
    price: Option<f64>,
    threshold: Option<f64>,
) -> Result<()> {
    if price.is_some() && threshold.is_none() {
        return Err(Error::MissingCompanion {
            host: handle.label().to_string(),
            parameter: "peak_price_per_kw",
            companion: "peak_threshold_kw",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Graph, ShapeChangePolicy};
    use crate::solver::{LpModel, Shaped};
    use std::rc::Rc;

    fn site() -> SiteConfig {
        SiteConfig {
            horizon_steps: 3,
            ..SiteConfig::default()
        }
    }

    fn build(config: GridConfig) -> Result<(Rc<Graph>, Grid)> {
        let graph = Graph::new(Box::new(LpModel::new()), ShapeChangePolicy::Reject);
        let grid = Grid::new(graph.host("grid"), &config, &site(), vec![1.0, 2.0, 0.5])?;
        Ok((graph, grid))
    }

    #[test]
    fn test_peak_price_requires_threshold() {
        let err = build(GridConfig {
            peak_price_per_kw: Some(4.5),
            peak_threshold_kw: None,
            ..GridConfig::default()
        })
        .err()
        .unwrap();
        assert!(matches!(
            err,
            Error::MissingCompanion {
                parameter: "peak_price_per_kw",
                companion: "peak_threshold_kw",
                ..
            }
        ));
    }

    #[test]
    fn test_price_curve_must_cover_horizon() {
        let (_graph, grid) = build(GridConfig::default()).unwrap();
        assert!(matches!(grid.set_import_price(vec![1.0]), Err(Error::InvalidConfig(_))));
        assert!(!grid.set_import_price(vec![1.0, 2.0, 0.5]).unwrap());
    }

    #[test]
    fn test_energy_cost_follows_price_curve() {
        let (_graph, grid) = build(GridConfig::default()).unwrap();
        let terms = grid.cost("energy_cost").unwrap().unwrap();
        let total = terms.total();
        assert_eq!(total.coefficient(grid.import[1]), 2.0);
        assert!((total.coefficient(grid.export[1]) + 1.6).abs() < 1e-9);

        grid.set_import_price(vec![1.0, 3.0, 0.5]).unwrap();
        let total = grid.cost("energy_cost").unwrap().unwrap().total();
        assert_eq!(total.coefficient(grid.import[1]), 3.0);
        assert_eq!(grid.handle().recomputations("energy_cost"), 2);
    }

    #[test]
    fn test_peak_tariff_absent_by_default() {
        let (graph, grid) = build(GridConfig::default()).unwrap();
        assert_eq!(grid.constraint("peak_tracking").unwrap(), None);
        assert_eq!(grid.cost("peak_cost").unwrap(), None);
        assert_eq!(graph.solver().num_rows(), 0);
    }

    #[test]
    fn test_threshold_change_patches_bounds() {
        let (graph, grid) = build(GridConfig {
            peak_price_per_kw: Some(4.5),
            peak_threshold_kw: Some(7.0),
            ..GridConfig::default()
        })
        .unwrap();

        let Some(Shaped::List(rows)) = grid.constraint("peak_tracking").unwrap() else {
            panic!("expected one row per step");
        };
        assert_eq!(graph.solver().row_bounds(rows[0]).unwrap(), (-7.0, f64::INFINITY));

        grid.set_peak_tariff(Some(4.5), Some(6.0)).unwrap();
        grid.constraint("peak_tracking").unwrap();
        assert_eq!(graph.solver().row_bounds(rows[2]).unwrap(), (-6.0, f64::INFINITY));
        assert_eq!(graph.solver().num_rows(), 3);
        assert!(grid.set_peak_tariff(Some(4.5), None).is_err());
    }
}
