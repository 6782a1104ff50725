//! A two-dimensional ice-shelf cavity.
//!
//! The four `default*` tasks at one resolution share the init step and the
//! whole ssh adjustment chain; only the final forward run and its plots
//! differ between them.
use super::chain::{ssh_adjustment_chain, StageKind};
use super::steps::{
    add_rest_state, column_field, planar_mesh, Forward, Plot, Viz, PLANAR_MESH_OUTPUTS,
};
use super::{packaged_layer, GRAVITY, RHO_SW};
use crate::component::{Component, RunContext, Step, StepPlan, StepRunner, Task, TaskRecipe};
use crate::compute::planar_hex_nx_ny;
use crate::config::ConfigLayer;
use crate::dataset::Dataset;
use crate::error::{ConfigError, Error, Result};
use crate::resolution::resolution_to_subdir;
use tracing::debug;

const CONFIG_LINK: &str = "ice_shelf_2d.cfg";
const STATE_FIELDS: [&str; 3] = ["temperature", "salinity", "layerThickness"];

pub(super) fn add_tasks(component: &mut Component) -> Result<()> {
    for resolution in [5.0, 2.0] {
        for thin_film in [false, true] {
            let mut resdir = format!("planar/ice_shelf_2d/{}", resolution_to_subdir(resolution));
            if thin_film {
                resdir.push_str("_thinfilm");
            }
            let layer = packaged_layer(
                &format!("{resdir}/{CONFIG_LINK}"),
                &[("ocean.tasks.ice_shelf_2d", "ice_shelf_2d.cfg")],
            )?;
            let config = component.add_config(layer);
            for tidal_forcing in [false, true] {
                for time_varying_forcing in [false, true] {
                    let mut name = "default".to_string();
                    if tidal_forcing {
                        name.push_str("_tidal_forcing");
                    }
                    if time_varying_forcing {
                        name.push_str("_time_varying_forcing");
                    }
                    let recipe = DefaultRecipe {
                        resdir: resdir.clone(),
                        subdir: format!("{resdir}/{name}"),
                        resolution,
                        thin_film,
                        tidal_forcing,
                        time_varying_forcing,
                    };
                    let mut task = Task::new(name, recipe.subdir.clone()).with_recipe(recipe);
                    task.set_shared_config(config, Some(CONFIG_LINK));
                    component.add_task(task)?;
                }
            }
        }
    }
    Ok(())
}

fn ssh_iterations(config: &ConfigLayer) -> Result<usize> {
    let iterations = config.getint("ssh_adjustment", "iterations")?;
    usize::try_from(iterations).map_err(|_| {
        ConfigError::InvalidValue {
            section: "ssh_adjustment".to_string(),
            option: "iterations".to_string(),
            value: iterations.to_string(),
            expected: "non-negative integer",
        }
        .into()
    })
}

struct DefaultRecipe {
    resdir: String,
    subdir: String,
    resolution: f64,
    thin_film: bool,
    tidal_forcing: bool,
    time_varying_forcing: bool,
}

impl TaskRecipe for DefaultRecipe {
    fn plan(&self, config: &ConfigLayer) -> Result<Vec<StepPlan>> {
        let iterations = ssh_iterations(config)?;
        let init_path = format!("{}/init", self.resdir);
        let mut plans = Vec::with_capacity(2 * iterations + 3);

        let (resolution, thin_film) = (self.resolution, self.thin_film);
        let path = init_path.clone();
        plans.push(
            StepPlan::new(init_path.clone(), move |ctx| {
                let mut step = Step::at(path, Init { resolution, thin_film });
                for output in PLANAR_MESH_OUTPUTS {
                    step.add_output_file(output, &[]);
                }
                step.add_output_file("output.nc", &STATE_FIELDS)
                    .add_output_file("init_mode_forcing_data.nc", &["tidalInputMask"])
                    .set_shared_config(ctx.task_config(), Some(CONFIG_LINK));
                Ok(step)
            })
            .symlink("init"),
        );

        // (producer path, file) of the current initial state
        let mut state = (init_path.clone(), "output.nc".to_string());
        let mut forward_path = String::new();
        for stage in ssh_adjustment_chain(iterations) {
            let path = format!("{}/ssh_adjustment/{}", self.resdir, stage.name);
            let alias = format!("ssh_adjustment/{}", stage.name);
            let (source, source_file) = state.clone();
            let plan = match stage.kind {
                StageKind::Forward => {
                    forward_path = path.clone();
                    let subdir = path.clone();
                    StepPlan::new(path, move |ctx| {
                        let producer = ctx.step_id(&source)?;
                        let runner = Forward::new().attr("stage", "ssh_forward");
                        let mut step = Step::at(subdir, runner);
                        step.add_input_from_step("init.nc", producer, &source_file)
                            .add_output_file("output.nc", &["ssh"]);
                        Ok(step)
                    })
                }
                StageKind::Adjust => {
                    state = (path.clone(), "adjusted_init.nc".to_string());
                    let subdir = path.clone();
                    let forward = forward_path.clone();
                    let iteration = stage.iteration;
                    StepPlan::new(path, move |ctx| {
                        let init = ctx.step_id(&source)?;
                        let forward = ctx.step_id(&forward)?;
                        let mut step = Step::at(subdir, SshAdjust { iteration });
                        step.add_input_from_step("init.nc", init, &source_file)
                            .add_input_from_step("output.nc", forward, "output.nc")
                            .add_output_file(
                                "adjusted_init.nc",
                                &["ssh", "landIcePressure", "layerThickness"],
                            );
                        Ok(step)
                    })
                }
            };
            plans.push(plan.symlink(alias));
        }

        let forward_path = format!("{}/forward", self.subdir);
        let subdir = forward_path.clone();
        let (source, source_file) = state;
        let forcing_from = self.time_varying_forcing.then(|| init_path.clone());
        let runner = Forward::new()
            .attr("tidal_forcing", self.tidal_forcing)
            .attr("time_varying_forcing", self.time_varying_forcing);
        plans.push(StepPlan::new(forward_path.clone(), move |ctx| {
            let producer = ctx.step_id(&source)?;
            let mut step = Step::at(subdir, runner);
            step.add_input_from_step("init.nc", producer, &source_file)
                .add_output_file("output.nc", &["ssh", "layerThickness"]);
            if let Some(init) = forcing_from {
                let init = ctx.step_id(&init)?;
                step.add_input_from_step("forcing.nc", init, "init_mode_forcing_data.nc");
            }
            Ok(step)
        }));

        let viz_path = format!("{}/viz", self.subdir);
        let subdir = viz_path.clone();
        plans.push(StepPlan::new(viz_path, move |ctx| {
            let init = ctx.step_id(&init_path)?;
            let forward = ctx.step_id(&forward_path)?;
            let runner = Viz {
                plots: vec![
                    Plot::new("init.nc", "landIcePressure", "land ice pressure"),
                    Plot::new("output.nc", "ssh", "sea surface height"),
                ],
            };
            let mut step = Step::at(subdir, runner);
            step.add_input_from_step("init.nc", init, "output.nc")
                .add_input_from_step("output.nc", forward, "output.nc")
                .add_output_file("output_ssh.txt", &[]);
            Ok(step)
        }));
        Ok(plans)
    }
}

struct Geometry {
    lx: f64,
    ly: f64,
    y1: f64,
    y2: f64,
    ice_draft_y1: f64,
    ice_draft_y2: f64,
    bottom_depth: f64,
}

impl Geometry {
    fn read(config: &ConfigLayer) -> Result<Self> {
        let section = config.section("ice_shelf_2d");
        Ok(Self {
            lx: section.getfloat("lx")?,
            ly: section.getfloat("ly")?,
            y1: section.getfloat("y1")?,
            y2: section.getfloat("y2")?,
            ice_draft_y1: section.getfloat("ice_draft_y1")?,
            ice_draft_y2: section.getfloat("ice_draft_y2")?,
            bottom_depth: config.getfloat("vertical_grid", "bottom_depth")?,
        })
    }

    fn check(&self) -> Result<()> {
        if !(self.y1 < self.y2 && self.y2 <= self.ly) {
            return Err(Error::precondition(format!(
                "ice shelf edges must satisfy y1 < y2 <= ly, got y1 = {}, y2 = {}, ly = {}",
                self.y1, self.y2, self.ly
            )));
        }
        if -self.ice_draft_y1 >= self.bottom_depth {
            return Err(Error::precondition(format!(
                "ice draft {} m grounds on the bottom at {} m",
                self.ice_draft_y1, self.bottom_depth
            )));
        }
        Ok(())
    }

    /// Ice draft (m, negative below sea level) at `y` km from the wall.
    fn draft(&self, y: f64) -> f64 {
        if y < self.y1 {
            self.ice_draft_y1
        } else if y < self.y2 {
            let frac = (y - self.y1) / (self.y2 - self.y1);
            self.ice_draft_y1 + (self.ice_draft_y2 - self.ice_draft_y1) * frac
        } else {
            0.0
        }
    }
}

/// Mesh plus the initial state under the ice shelf.
struct Init {
    resolution: f64,
    thin_film: bool,
}

impl StepRunner for Init {
    fn check_preconditions(&self, config: &ConfigLayer) -> Result<()> {
        Geometry::read(config)?.check()
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let geometry = Geometry::read(ctx.config)?;
        geometry.check()?;
        let section = ctx.config.section("ice_shelf_2d");
        let temperature = section.getfloat("temperature")?;
        let salinity = section.getfloat("salinity")?;
        let thin_film_thickness = section.getfloat("thin_film_thickness")?;

        let (nx, ny) = planar_hex_nx_ny(geometry.lx, geometry.ly, self.resolution);
        let mut ds = planar_mesh(ctx, nx, ny, self.resolution * 1.0e3, true)?;
        let y_cell = ds.values("yCell")?.to_vec();
        let y_min = y_cell.iter().copied().fold(f64::INFINITY, f64::min);
        let y_km: Vec<f64> = y_cell.iter().map(|y| (y - y_min) / 1.0e3).collect();
        let cells = y_km.len();

        let draft: Vec<f64> = y_km.iter().map(|y| geometry.draft(*y)).collect();
        let ssh: Vec<f64> = draft
            .iter()
            .map(|d| {
                if self.thin_film {
                    d.max(thin_film_thickness - geometry.bottom_depth)
                } else {
                    *d
                }
            })
            .collect();
        let mask: Vec<f64> = draft.iter().map(|d| if *d < 0.0 { 1.0 } else { 0.0 }).collect();
        let pressure: Vec<f64> = ssh.iter().map(|s| (-s).max(0.0) * RHO_SW * GRAVITY).collect();

        ds.insert("bottomDepth", &["nCells"], vec![geometry.bottom_depth; cells])?;
        ds.insert("ssh", &["nCells"], ssh)?;
        ds.insert("landIceDraft", &["nCells"], draft)?;
        ds.insert("landIceMask", &["nCells"], mask)?;
        ds.insert("landIcePressure", &["nCells"], pressure)?;
        ctx.compute.init_vertical_coord(ctx.config, &mut ds)?;
        let temperature = column_field(&ds, |_| temperature)?;
        ds.insert("temperature", &["nCells", "nVertLevels"], temperature)?;
        let salinity = column_field(&ds, |_| salinity)?;
        ds.insert("salinity", &["nCells", "nVertLevels"], salinity)?;
        add_rest_state(&mut ds, 0.0)?;
        ds.set_attr("thin_film", self.thin_film);
        ctx.write(&ds, "output.nc")?;

        // tides enter through the open boundary row
        let y_max = y_km.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let open_row = y_max - 0.5 * self.resolution;
        let mut forcing = Dataset::new();
        forcing.set_dim("nCells", cells);
        forcing.insert(
            "tidalInputMask",
            &["nCells"],
            y_km.iter().map(|y| if *y >= open_row { 1.0 } else { 0.0 }).collect(),
        )?;
        forcing.insert("landIceFreshwaterFlux", &["nCells"], vec![0.0; cells])?;
        ctx.write(&forcing, "init_mode_forcing_data.nc")
    }
}

fn relaxation(config: &ConfigLayer) -> Result<f64> {
    let relaxation = config.getfloat("ssh_adjustment", "relaxation")?;
    if relaxation.is_nan() || relaxation <= 0.0 || relaxation > 1.0 {
        return Err(Error::precondition(format!(
            "[ssh_adjustment] relaxation must be in (0, 1], got {relaxation}"
        )));
    }
    Ok(relaxation)
}

/// Moves ssh under the ice shelf toward the value the model drifted to and
/// rebalances land-ice pressure and layer thickness to match.
struct SshAdjust {
    iteration: usize,
}

impl StepRunner for SshAdjust {
    fn check_preconditions(&self, config: &ConfigLayer) -> Result<()> {
        relaxation(config).map(|_| ())
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let relaxation = relaxation(ctx.config)?;
        let init = ctx.load("init.nc")?;
        let output = ctx.load("output.nc")?;
        let mask = init.values("landIceMask")?;
        let before = init.values("ssh")?;
        let after = output.values("ssh")?;
        if before.len() != after.len() {
            return Err(Error::compute(format!(
                "forward output has {} cells but the initial state has {}",
                after.len(),
                before.len()
            )));
        }

        let mut max_change = 0.0f64;
        let mut ssh = Vec::with_capacity(before.len());
        for ((start, end), masked) in before.iter().zip(after).zip(mask) {
            let value = if *masked > 0.0 {
                start + relaxation * (end - start)
            } else {
                *start
            };
            max_change = max_change.max((value - start).abs());
            ssh.push(value);
        }
        let pressure: Vec<f64> = ssh
            .iter()
            .zip(mask)
            .map(|(s, masked)| {
                if *masked > 0.0 {
                    (-s).max(0.0) * RHO_SW * GRAVITY
                } else {
                    0.0
                }
            })
            .collect();

        let mut adjusted = init.clone();
        adjusted.insert("ssh", &["nCells"], ssh)?;
        adjusted.insert("landIcePressure", &["nCells"], pressure)?;
        ctx.compute.init_vertical_coord(ctx.config, &mut adjusted)?;
        adjusted.set_attr("ssh_adjust_iteration", self.iteration);
        debug!(iteration = self.iteration, max_change, "adjusted ssh");
        ctx.write(&adjusted, "adjusted_init.nc")
    }
}
