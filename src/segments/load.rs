use once_cell::sync::Lazy;

use crate::config::SiteConfig;
use crate::error::{Error, Result};
use crate::reactive::{Host, HostHandle, MethodRegistry, OutputValue, Tracked};

/// Household consumption forecast. Owns no variables; other segments read
/// its demand curve.
pub struct Load {
    handle: HostHandle,
    horizon: usize,
    pub demand_kw: Tracked<Vec<f64>>,
}

static LOAD_METHODS: Lazy<MethodRegistry<Load>> = Lazy::new(|| {
    MethodRegistry::new("load").output("demand", "demand_kw", |load| {
        Ok(load.demand_kw.peek().map(OutputValue::Series))
    })
});

impl Host for Load {
    fn handle(&self) -> &HostHandle {
        &self.handle
    }

    fn registry() -> &'static MethodRegistry<Self> {
        &LOAD_METHODS
    }
}

impl Load {
    /// Flat forecast at the site's base load.
    pub fn new(handle: HostHandle, site: &SiteConfig) -> Self {
        let demand = vec![site.base_load_kw; site.horizon_steps];
        Self {
            horizon: site.horizon_steps,
            demand_kw: Tracked::with_value(&handle, "demand_kw", demand),
            handle,
        }
    }

    pub fn set_forecast(&self, demand_kw: Vec<f64>) -> Result<bool> {
        if demand_kw.len() != self.horizon {
            return Err(Error::InvalidConfig(format!(
                "{}.demand_kw has {} entries, horizon is {} steps",
                self.handle.label(),
                demand_kw.len(),
                self.horizon
            )));
        }
        Ok(self.demand_kw.set(demand_kw))
    }

    /// Demand at one step, `0.0` past the horizon.
    pub fn demand_at(&self, step: usize) -> Result<f64> {
        let demand = self.handle.cached("demand_curve", || self.demand_kw.get())?;
        Ok(demand.get(step).copied().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Graph, ShapeChangePolicy};
    use crate::solver::LpModel;

    #[test]
    fn test_forecast_length_is_checked() {
        let graph = Graph::new(Box::new(LpModel::new()), ShapeChangePolicy::Reject);
        let site = SiteConfig {
            horizon_steps: 2,
            ..SiteConfig::default()
        };
        let load = Load::new(graph.host("load"), &site);

        assert!(load.set_forecast(vec![1.0]).is_err());
        assert!(!load.set_forecast(vec![1.5, 1.5]).unwrap());
        assert!(load.set_forecast(vec![1.5, 2.5]).unwrap());
        assert_eq!(load.demand_at(1).unwrap(), 2.5);
        assert_eq!(load.demand_at(5).unwrap(), 0.0);
    }
}
