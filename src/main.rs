use anyhow::{Context, Result};
use open_energy_incremental::{config, segments::Site, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::info;

/// Synthetic day-ahead curve: cheap at night, expensive during the day.
fn day_ahead_prices(steps: usize, step_minutes: u32) -> Vec<f64> {
    (0..steps)
        .map(|t| {
            let hour = (t * step_minutes as usize / 60) % 24;
            if hour < 6 || hour > 22 {
                0.5
            } else if (8..=20).contains(&hour) {
                2.0
            } else {
                1.0
            }
        })
        .collect()
}

fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    let mut prices = day_ahead_prices(cfg.site.horizon_steps, cfg.site.step_minutes);
    let site = Site::build(&cfg, prices.clone()).context("failed to build site model")?;

    info!(
        horizon = cfg.site.horizon_steps,
        policy = ?cfg.engine.shape_change_policy,
        "starting re-optimization demo"
    );

    for cycle in 0..cfg.site.cycles.max(1) {
        if cycle > 0 {
            // A revised forecast for one step
            let step = (cycle * 7) % prices.len();
            prices[step] *= 1.25;
            site.grid.set_import_price(prices.clone())?;
        }

        let report = site
            .model
            .solve()
            .with_context(|| format!("optimization cycle {cycle} failed"))?;
        info!(
            cycle,
            objective = report.outcome.objective_value,
            recomputed = report.stats.recomputed,
            rows_created = report.stats.rows_created,
            cells_patched = report.stats.cells_patched,
            bounds_patched = report.stats.bounds_patched,
            "cycle finished"
        );
    }

    let outputs = site.model.collect_outputs()?;
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}
