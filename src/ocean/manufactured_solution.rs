//! Convergence of a manufactured sea-surface-height solution.
//!
//! Each variant runs the same doubly periodic problem at every resolution in
//! `[convergence] resolutions` and fits the rate at which the error shrinks.
use super::packaged_layer;
use super::steps::{
    add_rest_state, attr_f64, column_field, planar_mesh, Forward, Plot, Viz, PLANAR_MESH_OUTPUTS,
};
use crate::component::{Component, RunContext, Step, StepPlan, StepRunner, Task, TaskRecipe};
use crate::config::ConfigLayer;
use crate::dataset::Dataset;
use crate::error::{ConfigError, Error, Result, ValidationError};
use crate::resolution::resolution_to_subdir;
use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::fmt::Write as _;
use tracing::info;

/// (task name, horizontal mixing)
const VARIANTS: [(&str, &str); 3] = [("default", "none"), ("del2", "del2"), ("del4", "del4")];

pub(super) fn add_tasks(component: &mut Component) -> Result<()> {
    for (name, mixing) in VARIANTS {
        let subdir = format!("planar/manufactured_solution/{name}");
        let layer = packaged_layer(
            &format!("{subdir}/manufactured_solution.cfg"),
            &[
                ("ocean.convergence", "convergence.cfg"),
                ("ocean.tasks.manufactured_solution", "manufactured_solution.cfg"),
            ],
        )?;
        let config = component.add_config(layer);
        let recipe = ConvergenceRecipe {
            subdir: subdir.clone(),
            mixing,
        };
        let mut task = Task::new(name, subdir).with_recipe(recipe);
        task.set_shared_config(config, None);
        component.add_task(task)?;
    }
    Ok(())
}

fn resolutions(config: &ConfigLayer) -> Result<Vec<f64>> {
    let resolutions = config.getlist_float("convergence", "resolutions")?;
    let distinct: BTreeSet<String> =
        resolutions.iter().map(|r| resolution_to_subdir(*r)).collect();
    let valid = resolutions.len() >= 2
        && distinct.len() == resolutions.len()
        && resolutions.iter().all(|r| r.is_finite() && *r > 0.0);
    if !valid {
        return Err(ConfigError::InvalidValue {
            section: "convergence".to_string(),
            option: "resolutions".to_string(),
            value: config.get("convergence", "resolutions")?,
            expected: "list of at least two distinct positive resolutions",
        }
        .into());
    }
    Ok(resolutions)
}

struct ConvergenceRecipe {
    subdir: String,
    mixing: &'static str,
}

impl TaskRecipe for ConvergenceRecipe {
    fn plan(&self, config: &ConfigLayer) -> Result<Vec<StepPlan>> {
        let resolutions = resolutions(config)?;
        let mut plans = Vec::with_capacity(2 * resolutions.len() + 2);
        let mut forwards = Vec::with_capacity(resolutions.len());
        for &resolution in &resolutions {
            let resdir = resolution_to_subdir(resolution);
            let init_path = format!("{}/init/{resdir}", self.subdir);
            let forward_path = format!("{}/forward/{resdir}", self.subdir);

            let subdir = init_path.clone();
            plans.push(StepPlan::new(init_path.clone(), move |_| {
                let mut step = Step::at(subdir, Init { resolution });
                for output in PLANAR_MESH_OUTPUTS {
                    step.add_output_file(output, &[]);
                }
                step.add_output_file(
                    "initial_state.nc",
                    &["ssh", "layerThickness", "normalVelocity"],
                );
                Ok(step)
            }));

            let subdir = forward_path.clone();
            let mixing = self.mixing;
            plans.push(StepPlan::new(forward_path.clone(), move |ctx| {
                let init = ctx.step_id(&init_path)?;
                let runner = Forward::new().attr("horizontal_mixing", mixing);
                let mut step = Step::at(subdir, runner);
                step.add_input_from_step("init.nc", init, "initial_state.nc")
                    .add_output_file("output.nc", &["ssh"]);
                Ok(step)
            }));
            forwards.push((resdir, forward_path));
        }

        let analysis_path = format!("{}/analysis", self.subdir);
        let subdir = analysis_path.clone();
        let inputs = forwards.clone();
        plans.push(StepPlan::new(analysis_path, move |ctx| {
            let mut step = Step::at(subdir, Analysis { resolutions });
            for (resdir, forward) in &inputs {
                let forward = ctx.step_id(forward)?;
                step.add_input_from_step(&format!("output_{resdir}.nc"), forward, "output.nc");
            }
            step.add_output_file("convergence.txt", &[]);
            Ok(step)
        }));

        let viz_path = format!("{}/viz", self.subdir);
        let subdir = viz_path.clone();
        plans.push(
            StepPlan::new(viz_path, move |ctx| {
                let plots = forwards
                    .iter()
                    .map(|(resdir, _)| {
                        let input = format!("output_{resdir}.nc");
                        Plot::new(input, "ssh", format!("ssh at {resdir}"))
                    })
                    .collect();
                let mut step = Step::at(subdir, Viz { plots });
                for (resdir, forward) in &forwards {
                    let forward = ctx.step_id(forward)?;
                    step.add_input_from_step(&format!("output_{resdir}.nc"), forward, "output.nc")
                        .add_output_file(&format!("output_{resdir}_ssh.txt"), &[]);
                }
                Ok(step)
            })
            .optional(),
        );
        Ok(plans)
    }
}

/// Wavenumbers of the manufactured solution on a doubly periodic mesh.
fn wavenumbers(nx: f64, ny: f64, dc: f64) -> (f64, f64) {
    let kx = 2.0 * PI / (nx * dc);
    let ky = 2.0 * PI / (ny * dc * 3f64.sqrt() / 2.0);
    (kx, ky)
}

/// Doubly periodic mesh with the cell-averaged exact ssh.
struct Init {
    resolution: f64,
}

impl StepRunner for Init {
    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let section = ctx.config.section("manufactured_solution");
        let lx = section.getfloat("lx")?;
        let eta0 = section.getfloat("eta0")?;
        let temperature = section.getfloat("temperature")?;
        let salinity = section.getfloat("salinity")?;
        let coriolis = section.getfloat("coriolis_parameter")?;
        let bottom_depth = ctx.config.getfloat("vertical_grid", "bottom_depth")?;

        // square in cell counts so the domain is periodic in both directions
        let nx = 2 * (lx / (2.0 * self.resolution)).round() as usize;
        let dc = self.resolution * 1.0e3;
        let mut ds = planar_mesh(ctx, nx, nx, dc, false)?;
        let (kx, ky) = wavenumbers(nx as f64, nx as f64, dc);

        let radius = dc / 3f64.sqrt();
        let offsets: Vec<(f64, f64)> = (0..6)
            .map(|k| {
                let angle = PI / 6.0 + k as f64 * PI / 3.0;
                (radius * angle.cos(), radius * angle.sin())
            })
            .collect();
        let x_cell = ds.values("xCell")?;
        let y_cell = ds.values("yCell")?;
        let ssh: Vec<f64> = x_cell
            .iter()
            .zip(y_cell)
            .map(|(x, y)| {
                let sum: f64 = offsets
                    .iter()
                    .map(|(dx, dy)| (kx * (x + dx) + ky * (y + dy)).sin())
                    .sum();
                eta0 * sum / offsets.len() as f64
            })
            .collect();
        let cells = ssh.len();
        ds.insert("ssh", &["nCells"], ssh)?;
        ds.insert("bottomDepth", &["nCells"], vec![bottom_depth; cells])?;
        ctx.compute.init_vertical_coord(ctx.config, &mut ds)?;
        let temperature = column_field(&ds, |_| temperature)?;
        ds.insert("temperature", &["nCells", "nVertLevels"], temperature)?;
        let salinity = column_field(&ds, |_| salinity)?;
        ds.insert("salinity", &["nCells", "nVertLevels"], salinity)?;
        add_rest_state(&mut ds, coriolis)?;
        ctx.write(&ds, "initial_state.nc")
    }
}

/// Least-squares slope of `log(error)` against `log(resolution)`.
pub fn convergence_rate(resolutions: &[f64], errors: &[f64]) -> Result<f64> {
    if resolutions.len() != errors.len() || resolutions.len() < 2 {
        return Err(Error::compute(format!(
            "need matching resolutions and errors for at least two runs, got {} and {}",
            resolutions.len(),
            errors.len()
        )));
    }
    if resolutions.iter().chain(errors).any(|value| *value <= 0.0) {
        return Err(Error::compute("resolutions and errors must be positive"));
    }
    let xs: Vec<f64> = resolutions.iter().map(|r| r.ln()).collect();
    let ys: Vec<f64> = errors.iter().map(|e| e.ln()).collect();
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        covariance += (x - mean_x) * (y - mean_y);
        variance += (x - mean_x) * (x - mean_x);
    }
    if variance == 0.0 {
        return Err(Error::compute("resolutions must not all be equal"));
    }
    Ok(covariance / variance)
}

/// RMS error of each run against the exact solution and the fitted rate.
struct Analysis {
    resolutions: Vec<f64>,
}

impl Analysis {
    fn rms_error(&self, ctx: &RunContext<'_>, filename: &str, eta0: f64) -> Result<f64> {
        let path = ctx.path(filename);
        let ds = ctx.load(filename)?;
        let (kx, ky) = wavenumbers(
            attr_f64(&ds, &path, "nx")?,
            attr_f64(&ds, &path, "ny")?,
            attr_f64(&ds, &path, "dc")?,
        );
        let decay = (-attr_f64(&ds, &path, "simulated_seconds")? / 86_400.0).exp();
        let ssh = ds.values("ssh")?;
        let x_cell = ds.values("xCell")?;
        let y_cell = ds.values("yCell")?;
        let mut sum = 0.0;
        for ((value, x), y) in ssh.iter().zip(x_cell).zip(y_cell) {
            let exact = eta0 * (kx * x + ky * y).sin() * decay;
            sum += (value - exact).powi(2);
        }
        Ok((sum / ssh.len().max(1) as f64).sqrt())
    }
}

impl StepRunner for Analysis {
    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let section = ctx.config.section("manufactured_solution");
        let eta0 = section.getfloat("eta0")?;
        let conv_thresh = section.getfloat("conv_thresh")?;
        let conv_max = section.getfloat("conv_max")?;

        let mut errors = Vec::with_capacity(self.resolutions.len());
        let mut table = String::from("resolution_km rms_error\n");
        for resolution in &self.resolutions {
            let filename = format!("output_{}.nc", resolution_to_subdir(*resolution));
            let error = self.rms_error(ctx, &filename, eta0)?;
            let _ = writeln!(table, "{resolution} {error:e}");
            errors.push(error);
        }
        let rate = convergence_rate(&self.resolutions, &errors)?;
        let _ = writeln!(table, "rate {rate:.4}");
        ctx.write_text("convergence.txt", &table)?;
        info!(rate, conv_thresh, conv_max, "convergence rate");

        if rate < conv_thresh || rate > conv_max {
            return Err(ValidationError::Check {
                artifact: ctx.path("convergence.txt"),
                message: format!(
                    "convergence rate {rate:.3} is outside [{conv_thresh}, {conv_max}]"
                ),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_order_errors_give_rate_two() {
        let resolutions = [200.0, 100.0, 50.0, 25.0];
        let errors: Vec<f64> = resolutions.iter().map(|r| 3.0e-6 * r * r).collect();
        let rate = convergence_rate(&resolutions, &errors).unwrap();
        assert!((rate - 2.0).abs() < 1e-12);
    }

    #[test]
    fn rate_needs_two_positive_runs() {
        assert!(convergence_rate(&[100.0], &[1.0]).is_err());
        assert!(convergence_rate(&[100.0, 50.0], &[1.0, 0.0]).is_err());
        assert!(convergence_rate(&[100.0, 100.0], &[1.0, 0.5]).is_err());
    }

    #[test]
    fn plan_follows_the_resolution_list() {
        let mut config = packaged_layer(
            "x.cfg",
            &[
                ("ocean.convergence", "convergence.cfg"),
                ("ocean.tasks.manufactured_solution", "manufactured_solution.cfg"),
            ],
        )
        .unwrap();
        config.set("convergence", "resolutions", "100, 50");
        let recipe = ConvergenceRecipe {
            subdir: "planar/manufactured_solution/default".to_string(),
            mixing: "none",
        };
        let plans = recipe.plan(&config).unwrap();
        let subdirs: Vec<&str> = plans.iter().map(|plan| plan.subdir.as_str()).collect();
        assert_eq!(
            subdirs,
            [
                "planar/manufactured_solution/default/init/100km",
                "planar/manufactured_solution/default/forward/100km",
                "planar/manufactured_solution/default/init/50km",
                "planar/manufactured_solution/default/forward/50km",
                "planar/manufactured_solution/default/analysis",
                "planar/manufactured_solution/default/viz",
            ]
        );
        assert!(!plans[5].run_by_default);

        config.set("convergence", "resolutions", "100");
        assert_eq!(recipe.plan(&config).unwrap_err().kind(), "config");
    }
}
