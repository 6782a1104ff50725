//! Global ocean on a quasi-uniform icosahedral mesh.
use super::packaged_layer;
use super::steps::{icos_base_mesh, icos_base_mesh_path, Plot, Viz};
use crate::component::{Component, RunContext, Step, StepPlan, StepRunner, Task, TaskRecipe};
use crate::compute::RemapMethod;
use crate::config::ConfigLayer;
use crate::error::{ConfigError, Error, Result};
use crate::resolution::resolution_to_subdir;

const TASK_DIR: &str = "spherical/icos/global_ocean";
const CONFIG_LINK: &str = "global_ocean.cfg";
const TOPO_CONFIG_LINK: &str = "global_ocean_topo.cfg";
/// Earth's rotation rate (s^-1).
const OMEGA: f64 = 7.292_123_517e-5;

pub(super) fn add_tasks(component: &mut Component) -> Result<()> {
    let layer = packaged_layer(
        &format!("{TASK_DIR}/{CONFIG_LINK}"),
        &[("ocean.tasks.global_ocean", "global_ocean.cfg")],
    )?;
    let config = component.add_config(layer);

    let mut task = Task::new("icos_global_ocean", TASK_DIR)
        .with_recipe(GlobalOceanRecipe { with_viz: false });
    task.set_shared_config(config, None);
    component.add_task(task)?;

    let mut task = Task::new("icos_global_ocean_with_viz", format!("{TASK_DIR}/with_viz"))
        .with_recipe(GlobalOceanRecipe { with_viz: true });
    task.set_shared_config(config, Some(CONFIG_LINK));
    component.add_task(task)?;
    Ok(())
}

fn resolution(config: &ConfigLayer) -> Result<f64> {
    let resolution = config.getfloat("global_ocean", "resolution")?;
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(ConfigError::InvalidValue {
            section: "global_ocean".to_string(),
            option: "resolution".to_string(),
            value: resolution.to_string(),
            expected: "positive resolution in km",
        }
        .into());
    }
    Ok(resolution)
}

struct GlobalOceanRecipe {
    with_viz: bool,
}

impl TaskRecipe for GlobalOceanRecipe {
    fn plan(&self, config: &ConfigLayer) -> Result<Vec<StepPlan>> {
        let resolution = resolution(config)?;
        let resdir = resolution_to_subdir(resolution);
        let topo_filename = config.get("global_ocean_topography", "topo_filename")?;
        let elevation_var = config.get("global_ocean_topography", "elevation_var")?;

        let mesh_path = icos_base_mesh_path(&resdir);
        let topo_path = format!("{TASK_DIR}/{resdir}/topo_remap");
        let init_path = format!("{TASK_DIR}/{resdir}/init");
        let mut plans = Vec::with_capacity(4);

        plans.push(icos_base_mesh(resolution));

        let subdir = topo_path.clone();
        let mesh = mesh_path.clone();
        let topo = StepPlan::new(topo_path.clone(), move |ctx| {
            let mesh = ctx.step_id(&mesh)?;
            let mut step = Step::at(subdir, TopoRemap);
            step.add_input_from_database("topography.nc", "bathymetry_database", &topo_filename)
                .add_input_from_step("base_mesh.nc", mesh, "base_mesh.nc")
                .add_output_file("topography_remapped.nc", &[elevation_var.as_str()])
                .set_shared_config(ctx.task_config(), Some(TOPO_CONFIG_LINK));
            Ok(step)
        });

        let subdir = init_path.clone();
        let topo_source = topo_path.clone();
        let init = StepPlan::new(init_path.clone(), move |ctx| {
            let mesh = ctx.step_id(&mesh_path)?;
            let topo = ctx.step_id(&topo_source)?;
            let mut step = Step::at(subdir, Init);
            step.add_input_from_step("mesh.nc", mesh, "base_mesh.nc")
                .add_input_from_step("topography.nc", topo, "topography_remapped.nc")
                .add_output_file(
                    "initial_state.nc",
                    &["temperature", "salinity", "layerThickness", "bottomDepth"],
                );
            Ok(step)
        });

        if !self.with_viz {
            plans.push(topo);
            plans.push(init);
            return Ok(plans);
        }
        plans.push(topo.symlink("topo_remap"));
        plans.push(init.symlink("init"));
        let viz_path = format!("{TASK_DIR}/with_viz/viz");
        let subdir = viz_path.clone();
        plans.push(StepPlan::new(viz_path, move |ctx| {
            let init = ctx.step_id(&init_path)?;
            let runner = Viz {
                plots: vec![
                    Plot::new("initial_state.nc", "bottomDepth", "bottom depth"),
                    Plot::new("initial_state.nc", "temperature", "initial temperature"),
                ],
            };
            let mut step = Step::at(subdir, runner);
            step.add_input_from_step("initial_state.nc", init, "initial_state.nc")
                .add_output_file("initial_state_bottomDepth.txt", &[]);
            Ok(step)
        }));
        Ok(plans)
    }
}

struct TopoOptions {
    lon_var: String,
    lat_var: String,
    elevation_var: String,
    method: RemapMethod,
    smooth: bool,
}

impl TopoOptions {
    fn read(config: &ConfigLayer) -> Result<Self> {
        let section = config.section("global_ocean_topography");
        let method = RemapMethod::parse(
            "global_ocean_topography",
            "method",
            &section.get("method")?,
        )?;
        let smooth = section.getbool("smooth")?;
        if smooth && method != RemapMethod::Conserve {
            return Err(Error::precondition(format!(
                "smoothing topography requires the conserve remap method, not {}",
                method.as_str()
            )));
        }
        Ok(Self {
            lon_var: section.get("lon_var")?,
            lat_var: section.get("lat_var")?,
            elevation_var: section.get("elevation_var")?,
            method,
            smooth,
        })
    }
}

/// Remaps the bathymetry dataset onto the base mesh.
struct TopoRemap;

impl StepRunner for TopoRemap {
    fn check_preconditions(&self, config: &ConfigLayer) -> Result<()> {
        TopoOptions::read(config).map(|_| ())
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let opts = TopoOptions::read(ctx.config)?;
        let source = ctx.load("topography.nc")?;
        let mesh = ctx.load("base_mesh.nc")?;
        let mut remapped =
            ctx.compute
                .remap(&source, &opts.lon_var, &opts.lat_var, &mesh, opts.method)?;
        if !remapped.has(&opts.elevation_var) {
            return Err(Error::dataset(
                ctx.path("topography.nc"),
                format!("no {} field to remap", opts.elevation_var),
            ));
        }
        if opts.smooth {
            let smoothed = smooth(remapped.values(&opts.elevation_var)?);
            remapped.insert(&opts.elevation_var, &["nCells"], smoothed)?;
        }
        remapped.set_attr("smoothed", opts.smooth);
        ctx.write(&remapped, "topography_remapped.nc")
    }
}

/// Three-point running mean along the cell ordering.
fn smooth(values: &[f64]) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(values.len() - 1);
            values[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64
        })
        .collect()
}

/// Resting initial state over the remapped bathymetry.
struct Init;

impl StepRunner for Init {
    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let opts = TopoOptions::read(ctx.config)?;
        let section = ctx.config.section("global_ocean");
        let min_depth = section.getfloat("min_depth")?;
        let surface_temperature = section.getfloat("surface_temperature")?;
        let salinity = section.getfloat("salinity")?;

        let mut ds = ctx.load("mesh.nc")?;
        let topography = ctx.load("topography.nc")?;
        let elevation = topography.values(&opts.elevation_var)?;
        let cells = ds.dim("nCells")?;
        if elevation.len() != cells {
            return Err(Error::dataset(
                ctx.path("topography.nc"),
                format!("{} cells of topography for a {cells}-cell mesh", elevation.len()),
            ));
        }
        let bottom_depth: Vec<f64> = elevation.iter().map(|z| (-z).max(min_depth)).collect();
        ds.insert("bottomDepth", &["nCells"], bottom_depth)?;
        ds.insert("ssh", &["nCells"], vec![0.0; cells])?;
        ctx.compute.init_vertical_coord(ctx.config, &mut ds)?;

        let lat = ds.values("latCell")?.to_vec();
        let levels = ds.dim("nVertLevels")?;
        let mut temperature = Vec::with_capacity(cells * levels);
        for phi in &lat {
            temperature.resize(temperature.len() + levels, surface_temperature * phi.cos());
        }
        ds.insert("temperature", &["nCells", "nVertLevels"], temperature)?;
        ds.insert("salinity", &["nCells", "nVertLevels"], vec![salinity; cells * levels])?;
        let coriolis: Vec<f64> = lat.iter().map(|phi| 2.0 * OMEGA * phi.sin()).collect();
        ds.insert("fCell", &["nCells"], coriolis)?;
        ctx.write(&ds, "initial_state.nc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> ConfigLayer {
        packaged_layer("x.cfg", &[("ocean.tasks.global_ocean", "global_ocean.cfg")]).unwrap()
    }

    #[test]
    fn smoothing_needs_conservative_remap() {
        let mut config = layer();
        config.set("global_ocean_topography", "smooth", true);
        TopoRemap.check_preconditions(&config).unwrap();
        config.set("global_ocean_topography", "method", "bilinear");
        let err = TopoRemap.check_preconditions(&config).unwrap_err();
        assert_eq!(err.kind(), "precondition");
    }

    #[test]
    fn viz_variant_aliases_shared_steps() {
        let mut config = layer();
        config.set("global_ocean", "resolution", 480);
        let plans = GlobalOceanRecipe { with_viz: true }.plan(&config).unwrap();
        let entries: Vec<(&str, Option<&str>)> = plans
            .iter()
            .map(|plan| (plan.subdir.as_str(), plan.symlink.as_deref()))
            .collect();
        assert_eq!(
            entries,
            [
                ("spherical/icos/base_mesh/480km", Some("base_mesh/icos_480km")),
                ("spherical/icos/global_ocean/480km/topo_remap", Some("topo_remap")),
                ("spherical/icos/global_ocean/480km/init", Some("init")),
                ("spherical/icos/global_ocean/with_viz/viz", None),
            ]
        );
        let plain = GlobalOceanRecipe { with_viz: false }.plan(&config).unwrap();
        assert_eq!(plain.len(), 3);
    }

    #[test]
    fn running_mean_keeps_endpoints_in_range() {
        assert_eq!(smooth(&[0.0, 3.0, 6.0]), vec![1.5, 3.0, 4.5]);
        assert_eq!(smooth(&[2.0]), vec![2.0]);
    }
}
