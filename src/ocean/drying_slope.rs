//! Wetting and drying on a sloping beach.
//!
//! Every (coordinate, resolution) pair shares one `init` step between its
//! barotropic tasks; the baroclinic tasks get their own.
use super::packaged_layer;
use super::steps::{
    add_rest_state, column_field, planar_mesh, Forward, Plot, Viz, PLANAR_MESH_OUTPUTS,
};
use crate::component::{Component, ConfigId, RunContext, Step, StepId, StepRunner, Task};
use crate::config::ConfigLayer;
use crate::dataset::Dataset;
use crate::error::{Error, Result, ValidationError};
use crate::resolution::resolution_to_subdir;
use tracing::debug;

const CONFIG_LINK: &str = "drying_slope.cfg";
const STATE_FIELDS: [&str; 3] = ["temperature", "salinity", "layerThickness"];

/// (task name, wetting-drying method, bottom drag)
const BAROTROPIC_VARIANTS: [(&str, &str, &str); 3] = [
    ("standard", "standard", "constant"),
    ("ramp", "ramp", "constant"),
    ("ramp_loglaw", "ramp", "loglaw"),
];

pub(super) fn add_tasks(component: &mut Component) -> Result<()> {
    for coord_type in ["sigma", "single_layer"] {
        for resolution in [0.25, 1.0] {
            let indir = format!(
                "planar/drying_slope/{coord_type}/{}/barotropic",
                resolution_to_subdir(resolution)
            );
            let config = add_config(component, &indir, coord_type)?;
            let init = add_init(component, &indir, config, resolution, false)?;
            for (name, method, drag) in BAROTROPIC_VARIANTS {
                add_forward_task(component, &indir, name, config, init, method, drag)?;
            }
            if coord_type == "sigma" && resolution == 1.0 {
                add_decomp_task(component, &indir, config, init)?;
            }
        }
    }
    for coord_type in ["sigma", "z-star"] {
        let indir = format!("planar/drying_slope/{coord_type}/1km/baroclinic");
        let config = add_config(component, &indir, coord_type)?;
        let init = add_init(component, &indir, config, 1.0, true)?;
        add_forward_task(component, &indir, "ramp", config, init, "ramp", "manning")?;
    }
    Ok(())
}

fn add_config(component: &mut Component, indir: &str, coord_type: &str) -> Result<ConfigId> {
    let mut layer = packaged_layer(
        &format!("{indir}/{CONFIG_LINK}"),
        &[("ocean.tasks.drying_slope", "drying_slope.cfg")],
    )?;
    layer.set("vertical_grid", "coord_type", coord_type);
    Ok(component.add_config(layer))
}

fn add_init(
    component: &mut Component,
    indir: &str,
    config: ConfigId,
    resolution: f64,
    baroclinic: bool,
) -> Result<StepId> {
    let path = format!("{indir}/init");
    component.step_or_insert_with(&path, || {
        let mut step = Step::at(path.as_str(), Init { resolution, baroclinic });
        for output in PLANAR_MESH_OUTPUTS {
            step.add_output_file(output, &[]);
        }
        step.add_output_file("forcing.nc", &["tidalInputMask"])
            .add_output_file("initial_state.nc", &STATE_FIELDS)
            .set_shared_config(config, Some(CONFIG_LINK));
        Ok(step)
    })
}

fn forward_step(subdir: String, init: StepId, runner: Forward) -> Step {
    let mut step = Step::at(subdir, runner);
    step.add_input_from_step("init.nc", init, "initial_state.nc")
        .add_input_from_step("forcing.nc", init, "forcing.nc")
        .add_output_file("output.nc", &["layerThickness", "normalVelocity"]);
    step
}

fn new_task(indir: &str, name: &str, config: ConfigId, init: StepId) -> Task {
    let mut task = Task::new(name, format!("{indir}/{name}"));
    task.set_shared_config(config, Some(CONFIG_LINK))
        .add_step(init, Some("init"));
    task
}

fn add_forward_task(
    component: &mut Component,
    indir: &str,
    name: &str,
    config: ConfigId,
    init: StepId,
    method: &str,
    drag: &str,
) -> Result<()> {
    let mut task = new_task(indir, name, config, init);
    let subdir = task.subdir().to_string();
    let runner = Forward::new().attr("method", method).attr("drag", drag);
    let forward = component.add_step(forward_step(format!("{subdir}/forward"), init, runner))?;

    let mut viz = Step::at(
        format!("{subdir}/viz"),
        Viz {
            plots: vec![
                Plot::new("output.nc", "ssh", "sea surface height"),
                Plot::new("output.nc", "layerThickness", "layer thickness"),
            ],
        },
    );
    viz.add_input_from_step("output.nc", forward, "output.nc")
        .add_output_file("output_ssh.txt", &[]);
    let viz = component.add_step(viz)?;

    task.add_step(forward, None).add_step(viz, None);
    component.add_task(task)?;
    Ok(())
}

fn add_decomp_task(
    component: &mut Component,
    indir: &str,
    config: ConfigId,
    init: StepId,
) -> Result<()> {
    let mut task = new_task(indir, "decomp", config, init);
    let subdir = task.subdir().to_string();
    let mut compare = Step::at(
        format!("{subdir}/validate"),
        Compare {
            files: vec!["output_1proc.nc".to_string(), "output_2proc.nc".to_string()],
            fields: vec!["layerThickness", "normalVelocity", "ssh"],
        },
    );
    for procs in [1, 2] {
        let runner = Forward::new()
            .attr("method", "ramp")
            .attr("partitions", procs);
        let step = forward_step(format!("{subdir}/forward_{procs}proc"), init, runner);
        let forward = component.add_step(step)?;
        compare.add_input_from_step(&format!("output_{procs}proc.nc"), forward, "output.nc");
        task.add_step(forward, None);
    }
    let compare = component.add_step(compare)?;
    task.add_step(compare, None);
    component.add_task(task)?;
    Ok(())
}

struct Options {
    nx: usize,
    ly: f64,
    ly_analysis: f64,
    right_bottom_depth: f64,
    left_bottom_depth: f64,
    thin_film_thickness: f64,
    plug_width_frac: f64,
    plug_temperature: f64,
    background_temperature: f64,
    background_salinity: f64,
    coriolis_parameter: f64,
    right_tidal_height: f64,
}

impl Options {
    fn read(config: &ConfigLayer) -> Result<Self> {
        let section = config.section("drying_slope");
        let nx = section.getint("nx")?;
        if nx < 2 {
            return Err(Error::precondition(format!(
                "[drying_slope] nx must be at least 2, got {nx}"
            )));
        }
        Ok(Self {
            nx: nx as usize,
            ly: section.getfloat("ly")?,
            ly_analysis: section.getfloat("ly_analysis")?,
            right_bottom_depth: section.getfloat("right_bottom_depth")?,
            left_bottom_depth: section.getfloat("left_bottom_depth")?,
            thin_film_thickness: section.getfloat("thin_film_thickness")?,
            plug_width_frac: section.getfloat("plug_width_frac")?,
            plug_temperature: section.getfloat("plug_temperature")?,
            background_temperature: section.getfloat("background_temperature")?,
            background_salinity: section.getfloat("background_salinity")?,
            coriolis_parameter: section.getfloat("coriolis_parameter")?,
            right_tidal_height: section.getfloat("right_tidal_height")?,
        })
    }

    fn check(&self) -> Result<()> {
        if self.ly < self.ly_analysis {
            return Err(Error::precondition(format!(
                "domain length ly = {} km is shorter than the analysis length ly_analysis = {} km",
                self.ly, self.ly_analysis
            )));
        }
        if self.right_bottom_depth < self.left_bottom_depth {
            return Err(Error::precondition(format!(
                "right_bottom_depth = {} m must be at least left_bottom_depth = {} m",
                self.right_bottom_depth, self.left_bottom_depth
            )));
        }
        Ok(())
    }
}

/// Rows across the slope at `resolution` km, always even.
fn row_count(ly: f64, resolution: f64) -> usize {
    let mut ny = (ly / resolution).round() as usize;
    if resolution < 1.0 {
        ny += 2;
    }
    2 * (ny as f64 / 2.0).round() as usize
}

/// Mesh, tidal forcing mask and initial state for one resolution.
struct Init {
    resolution: f64,
    baroclinic: bool,
}

impl StepRunner for Init {
    fn check_preconditions(&self, config: &ConfigLayer) -> Result<()> {
        Options::read(config)?.check()
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let opts = Options::read(ctx.config)?;
        opts.check()?;
        let dc = self.resolution * 1.0e3;
        let ny = row_count(opts.ly, self.resolution);
        let mut ds = planar_mesh(ctx, opts.nx, ny, dc, true)?;

        let y_cell = ds.values("yCell")?.to_vec();
        let y_min = y_cell.iter().copied().fold(f64::INFINITY, f64::min);
        let y_max = y_cell.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = (y_max - y_min).max(dc);
        let frac: Vec<f64> = y_cell.iter().map(|y| (y - y_min) / span).collect();

        let bottom_depth: Vec<f64> = frac
            .iter()
            .map(|f| {
                opts.right_bottom_depth + (opts.left_bottom_depth - opts.right_bottom_depth) * f
            })
            .collect();
        let ssh: Vec<f64> = bottom_depth
            .iter()
            .map(|depth| opts.right_tidal_height.max(opts.thin_film_thickness - depth))
            .collect();
        let cells = y_cell.len();
        ds.insert("bottomDepth", &["nCells"], bottom_depth)?;
        ds.insert("ssh", &["nCells"], ssh)?;
        ctx.compute.init_vertical_coord(ctx.config, &mut ds)?;

        let temperature = column_field(&ds, |cell| {
            if frac[cell] < opts.plug_width_frac {
                opts.plug_temperature
            } else {
                opts.background_temperature
            }
        })?;
        ds.insert("temperature", &["nCells", "nVertLevels"], temperature)?;
        let salinity = if self.baroclinic {
            let section = ctx.config.section("drying_slope_baroclinic");
            let right = section.getfloat("right_salinity")?;
            let left = section.getfloat("left_salinity")?;
            column_field(&ds, |cell| right + (left - right) * frac[cell])?
        } else {
            column_field(&ds, |_| opts.background_salinity)?
        };
        ds.insert("salinity", &["nCells", "nVertLevels"], salinity)?;
        add_rest_state(&mut ds, opts.coriolis_parameter)?;
        if self.baroclinic {
            let manning = ctx
                .config
                .getfloat("drying_slope_baroclinic", "manning_coefficient")?;
            ds.insert("manningCoefficient", &["nCells"], vec![manning; cells])?;
        }
        ds.set_attr("baroclinic", self.baroclinic);
        ctx.write(&ds, "initial_state.nc")?;

        let mask: Vec<f64> = frac
            .iter()
            .map(|f| if *f * span < 0.5 * dc { 1.0 } else { 0.0 })
            .collect();
        let masked = mask.iter().filter(|value| **value > 0.0).count();
        if masked == 0 {
            return Err(Error::precondition("tidal forcing mask selects no cells"));
        }
        debug!(cells, masked, "tidal forcing mask");
        let mut forcing = Dataset::new();
        forcing.set_dim("nCells", cells);
        forcing.set_attr("tidal_height", opts.right_tidal_height);
        forcing.insert("tidalInputMask", &["nCells"], mask)?;
        ctx.write(&forcing, "forcing.nc")
    }
}

/// Checks that runs on different partition counts agree exactly.
struct Compare {
    files: Vec<String>,
    fields: Vec<&'static str>,
}

impl StepRunner for Compare {
    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let Some((first, rest)) = self.files.split_first() else {
            return Ok(());
        };
        let reference = ctx.load(first)?;
        for other in rest {
            let ds = ctx.load(other)?;
            for field in &self.fields {
                if reference.values(field)? != ds.values(field)? {
                    return Err(ValidationError::Check {
                        artifact: ctx.path(other),
                        message: format!("{field} differs from {first}"),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}
