use once_cell::sync::Lazy;
use std::rc::Rc;

use super::{Battery, Grid, Load};
use crate::error::Result;
use crate::reactive::{Host, HostHandle, MethodRegistry};
use crate::solver::{LinearExpr, RowSet, VariableId};

/// Site power balance:
/// `import[t] - export[t] - charge[t] + discharge[t] = demand[t]`.
///
/// Reads the demand curve from the [`Load`] host, so a new forecast only
/// patches the bounds of these rows. The row duals are the site's marginal
/// price of power per step.
pub struct SiteBalance {
    handle: HostHandle,
    load: Rc<Load>,
    /// Per step: (variable, sign) pairs entering the balance
    terms: Vec<Vec<(VariableId, f64)>>,
}

static BALANCE_METHODS: Lazy<MethodRegistry<SiteBalance>> = Lazy::new(|| {
    MethodRegistry::new("site_balance").priced_constraint(
        "power_balance",
        "marginal_price",
        SiteBalance::power_balance,
    )
});

impl Host for SiteBalance {
    fn handle(&self) -> &HostHandle {
        &self.handle
    }

    fn registry() -> &'static MethodRegistry<Self> {
        &BALANCE_METHODS
    }
}

impl SiteBalance {
    pub fn new(handle: HostHandle, load: Rc<Load>, battery: &Battery, grid: &Grid) -> Self {
        let terms = (0..grid.horizon().min(battery.horizon()))
            .map(|t| {
                vec![
                    (grid.import[t], 1.0),
                    (grid.export[t], -1.0),
                    (battery.charge[t], -1.0),
                    (battery.discharge[t], 1.0),
                ]
            })
            .collect();
        Self { handle, load, terms }
    }

    fn power_balance(&self) -> Result<Option<RowSet>> {
        let rows = self
            .terms
            .iter()
            .enumerate()
            .map(|(t, terms)| {
                let demand = self.load.demand_at(t)?;
                let mut expr = LinearExpr::zero();
                for (variable, sign) in terms {
                    expr.add_term(*variable, *sign);
                }
                Ok(expr.equals(demand))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(rows.into()))
    }
}
