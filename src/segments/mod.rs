//! Energy system segments built as reactive hosts

pub mod balance;
pub mod battery;
pub mod grid;
pub mod load;

pub use balance::SiteBalance;
pub use battery::Battery;
pub use grid::Grid;
pub use load::Load;

use std::rc::Rc;

use crate::config::Config;
use crate::error::Result;
use crate::reactive::OptimizationModel;

/// A battery behind a grid connection feeding a household load
pub struct Site {
    pub model: OptimizationModel,
    pub battery: Rc<Battery>,
    pub grid: Rc<Grid>,
    pub load: Rc<Load>,
    pub balance: Rc<SiteBalance>,
}

impl Site {
    pub fn build(config: &Config, import_price: Vec<f64>) -> Result<Self> {
        let mut model = OptimizationModel::with_lp(config.engine.shape_change_policy);

        let battery = Battery::new(model.host("battery"), &config.battery, &config.site);
        let battery = model.add(battery);
        let grid = Grid::new(model.host("grid"), &config.grid, &config.site, import_price)?;
        let grid = model.add(grid);
        let load = Load::new(model.host("load"), &config.site);
        let load = model.add(load);
        let balance = SiteBalance::new(model.host("site"), load.clone(), &battery, &grid);
        let balance = model.add(balance);

        Ok(Self {
            model,
            battery,
            grid,
            load,
            balance,
        })
    }
}
