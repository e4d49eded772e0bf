use anyhow::{bail, Context, Result};
use figment::{providers::{Env, Format, Serialized, Toml}, Figment};
use serde::{Deserialize, Serialize};

use crate::reactive::ShapeChangePolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub site: SiteConfig,
    pub battery: BatteryConfig,
    pub grid: GridConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub shape_change_policy: ShapeChangePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub horizon_steps: usize,
    pub step_minutes: u32,
    pub base_load_kw: f64,
    /// Re-optimization cycles run by the demo binary
    pub cycles: usize,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            horizon_steps: 24,
            step_minutes: 60,
            base_load_kw: 1.5,
            cycles: 3,
        }
    }
}

impl SiteConfig {
    pub fn step_hours(&self) -> f64 {
        f64::from(self.step_minutes) / 60.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub capacity_kwh: f64,
    pub initial_soc_percent: f64,
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    pub efficiency: f64,
    pub min_soc_percent: f64,
    pub max_soc_percent: f64,
    pub wear_cost_per_kwh: Option<f64>,
    pub target_final_soc_percent: Option<f64>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 10.0,
            initial_soc_percent: 50.0,
            max_charge_kw: 5.0,
            max_discharge_kw: 5.0,
            efficiency: 0.95,
            min_soc_percent: 20.0,
            max_soc_percent: 90.0,
            wear_cost_per_kwh: Some(0.02),
            target_final_soc_percent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub max_import_kw: f64,
    pub max_export_kw: f64,
    /// Export is paid at this fraction of the import price
    pub export_price_ratio: f64,
    pub peak_price_per_kw: Option<f64>,
    pub peak_threshold_kw: Option<f64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_import_kw: 11.0,
            max_export_kw: 11.0,
            export_price_ratio: 0.8,
            peak_price_per_kw: None,
            peak_threshold_kw: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("OEI__").split("__"));
        let config: Config = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let site = &self.site;
        if site.horizon_steps == 0 {
            bail!("site.horizon_steps must be at least 1");
        }
        if site.step_minutes == 0 {
            bail!("site.step_minutes must be at least 1");
        }
        non_negative("site.base_load_kw", site.base_load_kw)?;

        let battery = &self.battery;
        positive("battery.capacity_kwh", battery.capacity_kwh)?;
        non_negative("battery.max_charge_kw", battery.max_charge_kw)?;
        non_negative("battery.max_discharge_kw", battery.max_discharge_kw)?;
        if !(battery.efficiency > 0.0 && battery.efficiency <= 1.0) {
            bail!("battery.efficiency must be in (0, 1], got {}", battery.efficiency);
        }
        percent("battery.initial_soc_percent", battery.initial_soc_percent)?;
        percent("battery.min_soc_percent", battery.min_soc_percent)?;
        percent("battery.max_soc_percent", battery.max_soc_percent)?;
        if battery.min_soc_percent > battery.max_soc_percent {
            bail!(
                "battery.min_soc_percent ({}) exceeds battery.max_soc_percent ({})",
                battery.min_soc_percent,
                battery.max_soc_percent
            );
        }
        if let Some(cost) = battery.wear_cost_per_kwh {
            non_negative("battery.wear_cost_per_kwh", cost)?;
        }
        if let Some(target) = battery.target_final_soc_percent {
            percent("battery.target_final_soc_percent", target)?;
        }

        let grid = &self.grid;
        non_negative("grid.max_import_kw", grid.max_import_kw)?;
        non_negative("grid.max_export_kw", grid.max_export_kw)?;
        non_negative("grid.export_price_ratio", grid.export_price_ratio)?;
        if let Some(price) = grid.peak_price_per_kw {
            non_negative("grid.peak_price_per_kw", price)?;
        }
        if let Some(threshold) = grid.peak_threshold_kw {
            non_negative("grid.peak_threshold_kw", threshold)?;
        }
        Ok(())
    }
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        bail!("{field} must be a finite non-negative number, got {value}");
    }
    Ok(())
}

fn positive(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{field} must be a finite positive number, got {value}");
    }
    Ok(())
}

fn percent(field: &str, value: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&value) {
        bail!("{field} must be within 0..=100, got {value}");
    }
    Ok(())
}
