//! Passive tracer transport on the sphere.
//!
//! Every flow runs the same initial condition at each resolution in
//! `[sphere_transport] resolutions`. The base mesh is the one every spherical
//! task shares; steps reach it and each other through relative paths.
use super::packaged_layer;
use super::steps::{
    attr_f64, column_field, icos_base_mesh, icos_base_mesh_path, Forward, Plot, Viz,
};
use crate::component::{Component, RunContext, Step, StepPlan, StepRunner, Task, TaskRecipe};
use crate::config::ConfigLayer;
use crate::error::{ConfigError, Error, Result};
use crate::resolution::resolution_to_subdir;
use std::collections::BTreeSet;
use std::f64::consts::PI;
use tracing::debug;

const FLOWS: [Flow; 4] = [
    Flow::Rotation,
    Flow::Divergent,
    Flow::Nondivergent,
    Flow::CorrelatedTracers,
];

/// Nondimensional period the deformational flows are defined over.
const UNIT_PERIOD: f64 = 5.0;
/// Radius of the bells and cylinders on the unit sphere.
const HILL_RADIUS: f64 = 0.5;
const HILL_CENTERS: [(f64, f64); 2] = [(5.0 * PI / 6.0, 0.0), (7.0 * PI / 6.0, 0.0)];
const BACKGROUND: f64 = 0.1;

pub(super) fn add_tasks(component: &mut Component) -> Result<()> {
    for flow in FLOWS {
        let subdir = format!("spherical/icos/{}", flow.name());
        let layer = packaged_layer(
            &format!("{subdir}/sphere_transport.cfg"),
            &[("ocean.tasks.sphere_transport", "sphere_transport.cfg")],
        )?;
        let config = component.add_config(layer);
        let recipe = SphereTransportRecipe {
            subdir: subdir.clone(),
            flow,
        };
        let mut task = Task::new(flow.name(), subdir).with_recipe(recipe);
        task.set_shared_config(config, None);
        component.add_task(task)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Rotation,
    Divergent,
    Nondivergent,
    CorrelatedTracers,
}

impl Flow {
    fn name(self) -> &'static str {
        match self {
            Flow::Rotation => "rotation_2d",
            Flow::Divergent => "divergent_2d",
            Flow::Nondivergent => "nondivergent_2d",
            Flow::CorrelatedTracers => "correlated_tracers_2d",
        }
    }

    /// Zonal and meridional velocity (m s^-1) at the start of the run on a
    /// sphere of `radius` m whose flow repeats every `period` s.
    fn velocity(self, lon: f64, lat: f64, period: f64, radius: f64) -> (f64, f64) {
        let solid_body = 2.0 * PI * lat.cos() / period;
        let scale = UNIT_PERIOD / period;
        let (u, v) = match self {
            Flow::Rotation => (solid_body, 0.0),
            Flow::Divergent => (
                solid_body - scale * (lon / 2.0).sin().powi(2) * (2.0 * lat).sin() * lat.cos().powi(2),
                0.5 * scale * lon.sin() * lat.cos().powi(3),
            ),
            Flow::Nondivergent | Flow::CorrelatedTracers => (
                solid_body + 2.4 * scale * lon.sin().powi(2) * (2.0 * lat).sin(),
                2.4 * scale * (2.0 * lon).sin() * lat.cos(),
            ),
        };
        (radius * u, radius * v)
    }
}

fn resolutions(config: &ConfigLayer) -> Result<Vec<f64>> {
    let resolutions = config.getlist_float("sphere_transport", "resolutions")?;
    let distinct: BTreeSet<String> =
        resolutions.iter().map(|r| resolution_to_subdir(*r)).collect();
    let valid = !resolutions.is_empty()
        && distinct.len() == resolutions.len()
        && resolutions.iter().all(|r| r.is_finite() && *r > 0.0);
    if !valid {
        return Err(ConfigError::InvalidValue {
            section: "sphere_transport".to_string(),
            option: "resolutions".to_string(),
            value: config.get("sphere_transport", "resolutions")?,
            expected: "list of distinct positive resolutions",
        }
        .into());
    }
    Ok(resolutions)
}

struct SphereTransportRecipe {
    subdir: String,
    flow: Flow,
}

impl TaskRecipe for SphereTransportRecipe {
    fn plan(&self, config: &ConfigLayer) -> Result<Vec<StepPlan>> {
        let resolutions = resolutions(config)?;
        let tracers = config.getlist_str("sphere_transport", "viz_tracers")?;
        let mut plans = Vec::with_capacity(3 * resolutions.len() + 1);
        let mut resdirs = Vec::with_capacity(resolutions.len());
        for &resolution in &resolutions {
            let resdir = resolution_to_subdir(resolution);
            let indir = format!("{}/{resdir}", self.subdir);
            plans.push(icos_base_mesh(resolution));

            let flow = self.flow;
            let mesh_path = icos_base_mesh_path(&resdir);
            let mesh_target = format!("../../../base_mesh/{resdir}/base_mesh.nc");
            let init_dir = indir.clone();
            plans.push(StepPlan::new(format!("{indir}/init"), move |ctx| {
                let mesh = ctx.step(&mesh_path)?;
                if !mesh.has_output("base_mesh.nc") {
                    return Err(Error::UndeclaredOutput {
                        consumer: format!("{init_dir}/init"),
                        producer: mesh_path,
                        filename: "base_mesh.nc".to_string(),
                    });
                }
                let mut step = Step::new(&init_dir, "init", Init { flow });
                step.add_input_from_path("mesh.nc", &mesh_target).add_output_file(
                    "initial_state.nc",
                    &["temperature", "salinity", "layerThickness", "tracer1", "tracer2", "tracer3"],
                );
                Ok(step)
            }));

            let forward_dir = indir.clone();
            plans.push(StepPlan::new(format!("{indir}/forward"), move |_| {
                let runner = Forward::new().attr("flow", flow.name());
                let mut step = Step::new(&forward_dir, "forward", runner);
                step.add_input_from_path("init.nc", "../init/initial_state.nc")
                    .add_output_file("output.nc", &["tracer1"]);
                Ok(step)
            }));
            resdirs.push(resdir);
        }

        if tracers.is_empty() {
            return Ok(plans);
        }
        let indir = self.subdir.clone();
        plans.push(
            StepPlan::new(format!("{indir}/viz"), move |_| {
                let mut plots = Vec::with_capacity(resdirs.len() * tracers.len());
                for resdir in &resdirs {
                    for tracer in &tracers {
                        let input = format!("output_{resdir}.nc");
                        plots.push(Plot::new(input, tracer.as_str(), format!("{tracer} at {resdir}")));
                    }
                }
                let outputs: Vec<String> = plots.iter().map(|plot| plot.out.clone()).collect();
                let mut step = Step::new(&indir, "viz", Viz { plots });
                for resdir in &resdirs {
                    step.add_input_from_path(
                        &format!("output_{resdir}.nc"),
                        &format!("../{resdir}/forward/output.nc"),
                    );
                }
                for output in &outputs {
                    step.add_output_file(output, &[]);
                }
                Ok(step)
            })
            .optional(),
        );
        Ok(plans)
    }
}

struct InitOptions {
    temperature: f64,
    salinity: f64,
    period: f64,
    bottom_depth: f64,
}

impl InitOptions {
    fn read(config: &ConfigLayer) -> Result<Self> {
        let section = config.section("sphere_transport");
        let vel_pd = section.getfloat("vel_pd")?;
        if !(vel_pd.is_finite() && vel_pd > 0.0) {
            return Err(Error::precondition(format!(
                "[sphere_transport] vel_pd must be a positive number of days, got {vel_pd}"
            )));
        }
        Ok(Self {
            temperature: section.getfloat("temperature")?,
            salinity: section.getfloat("salinity")?,
            period: vel_pd * 86_400.0,
            bottom_depth: config.getfloat("vertical_grid", "bottom_depth")?,
        })
    }
}

/// Tracers and flow on a flat-bottomed, resting icosahedral mesh.
struct Init {
    flow: Flow,
}

impl StepRunner for Init {
    fn check_preconditions(&self, config: &ConfigLayer) -> Result<()> {
        InitOptions::read(config).map(|_| ())
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let opts = InitOptions::read(ctx.config)?;
        let mut ds = ctx.load("mesh.nc")?;
        let radius = attr_f64(&ds, &ctx.path("mesh.nc"), "sphere_radius")?;
        let cells = ds.dim("nCells")?;
        ds.insert("bottomDepth", &["nCells"], vec![opts.bottom_depth; cells])?;
        ds.insert("ssh", &["nCells"], vec![0.0; cells])?;
        ctx.compute.init_vertical_coord(ctx.config, &mut ds)?;

        let coords: Vec<(f64, f64)> = ds
            .values("lonCell")?
            .iter()
            .copied()
            .zip(ds.values("latCell")?.iter().copied())
            .collect();
        if coords.len() != cells {
            return Err(Error::dataset(
                ctx.path("mesh.nc"),
                format!("{} cell coordinates for {cells} cells", coords.len()),
            ));
        }
        let smooth: Vec<f64> = coords.iter().map(|&(lon, lat)| xyztrig(lon, lat)).collect();
        let bells: Vec<f64> = coords.iter().map(|&(lon, lat)| cosine_bells(lon, lat)).collect();
        let third: Vec<f64> = match self.flow {
            Flow::CorrelatedTracers => bells.iter().map(|&chi| correlated(chi)).collect(),
            _ => coords
                .iter()
                .map(|&(lon, lat)| slotted_cylinders(lon, lat))
                .collect(),
        };
        let (zonal, meridional): (Vec<f64>, Vec<f64>) = coords
            .iter()
            .map(|&(lon, lat)| self.flow.velocity(lon, lat, opts.period, radius))
            .unzip();
        debug!(flow = self.flow.name(), cells, "sphere transport initial state");

        let columns = ["nCells", "nVertLevels"];
        let temperature = column_field(&ds, |_| opts.temperature)?;
        let salinity = column_field(&ds, |_| opts.salinity)?;
        let tracer1 = column_field(&ds, |cell| smooth[cell])?;
        let tracer2 = column_field(&ds, |cell| bells[cell])?;
        let tracer3 = column_field(&ds, |cell| third[cell])?;
        let velocity_zonal = column_field(&ds, |cell| zonal[cell])?;
        let velocity_meridional = column_field(&ds, |cell| meridional[cell])?;
        ds.insert("temperature", &columns, temperature)?;
        ds.insert("salinity", &columns, salinity)?;
        ds.insert("tracer1", &columns, tracer1)?;
        ds.insert("tracer2", &columns, tracer2)?;
        ds.insert("tracer3", &columns, tracer3)?;
        ds.insert("velocityZonal", &columns, velocity_zonal)?;
        ds.insert("velocityMeridional", &columns, velocity_meridional)?;
        ds.insert("fCell", &["nCells"], vec![0.0; cells])?;
        ds.set_attr("flow", self.flow.name());
        ctx.write(&ds, "initial_state.nc")
    }
}

/// Smooth field built from the Cartesian coordinates of the unit sphere.
fn xyztrig(lon: f64, lat: f64) -> f64 {
    let x = lat.cos() * lon.cos();
    let y = lat.cos() * lon.sin();
    let z = lat.sin();
    0.5 * (1.0 + (PI * x).sin() * (PI * y).sin() * (PI * z).sin())
}

/// Distance between two points on the unit sphere.
fn great_circle(lon: f64, lat: f64, center: (f64, f64)) -> f64 {
    let (lon_c, lat_c) = center;
    let half_dlat = 0.5 * (lat - lat_c);
    let half_dlon = 0.5 * (lon - lon_c);
    let h = half_dlat.sin().powi(2) + lat.cos() * lat_c.cos() * half_dlon.sin().powi(2);
    2.0 * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Absolute longitude difference folded into [0, pi].
fn lon_distance(lon: f64, center: f64) -> f64 {
    let delta = (lon - center).rem_euclid(2.0 * PI);
    delta.min(2.0 * PI - delta)
}

fn cosine_bells(lon: f64, lat: f64) -> f64 {
    let bumps: f64 = HILL_CENTERS
        .iter()
        .map(|&center| {
            let r = great_circle(lon, lat, center);
            if r < HILL_RADIUS {
                0.5 * (1.0 + (PI * r / HILL_RADIUS).cos())
            } else {
                0.0
            }
        })
        .sum();
    BACKGROUND + 0.9 * bumps
}

/// Two cylinders with a meridional slot; the first opens to the north, the
/// second to the south.
fn slotted_cylinders(lon: f64, lat: f64) -> f64 {
    let half_slot = HILL_RADIUS / 6.0;
    let slot_end = 5.0 * HILL_RADIUS / 12.0;
    for (index, &(lon_c, lat_c)) in HILL_CENTERS.iter().enumerate() {
        if great_circle(lon, lat, (lon_c, lat_c)) > HILL_RADIUS {
            continue;
        }
        let solid = lon_distance(lon, lon_c) >= half_slot
            || if index == 0 {
                lat - lat_c < -slot_end
            } else {
                lat - lat_c > slot_end
            };
        if solid {
            return 1.0;
        }
    }
    BACKGROUND
}

/// Nonlinear partner of the cosine bells for mixing diagnostics.
fn correlated(chi: f64) -> f64 {
    -0.8 * chi * chi + 0.9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> ConfigLayer {
        packaged_layer(
            "x.cfg",
            &[("ocean.tasks.sphere_transport", "sphere_transport.cfg")],
        )
        .unwrap()
    }

    #[test]
    fn plan_reads_shared_mesh_by_relative_path() {
        let recipe = SphereTransportRecipe {
            subdir: "spherical/icos/rotation_2d".to_string(),
            flow: Flow::Rotation,
        };
        let plans = recipe.plan(&layer()).unwrap();
        let entries: Vec<(&str, Option<&str>, bool)> = plans
            .iter()
            .map(|plan| (plan.subdir.as_str(), plan.symlink.as_deref(), plan.run_by_default))
            .collect();
        assert_eq!(
            entries,
            [
                ("spherical/icos/base_mesh/480km", Some("base_mesh/icos_480km"), true),
                ("spherical/icos/rotation_2d/480km/init", None, true),
                ("spherical/icos/rotation_2d/480km/forward", None, true),
                ("spherical/icos/base_mesh/240km", Some("base_mesh/icos_240km"), true),
                ("spherical/icos/rotation_2d/240km/init", None, true),
                ("spherical/icos/rotation_2d/240km/forward", None, true),
                ("spherical/icos/rotation_2d/viz", None, false),
            ]
        );
    }

    #[test]
    fn empty_tracer_list_drops_the_viz_step() {
        let mut config = layer();
        config.set("sphere_transport", "viz_tracers", "");
        let recipe = SphereTransportRecipe {
            subdir: "spherical/icos/divergent_2d".to_string(),
            flow: Flow::Divergent,
        };
        let plans = recipe.plan(&config).unwrap();
        assert!(plans.iter().all(|plan| !plan.subdir.ends_with("/viz")));
    }

    #[test]
    fn repeated_resolutions_are_rejected() {
        let mut config = layer();
        config.set("sphere_transport", "resolutions", "480, 480.0");
        let err = resolutions(&config).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn period_must_be_positive() {
        let mut config = layer();
        Init { flow: Flow::Rotation }.check_preconditions(&config).unwrap();
        config.set("sphere_transport", "vel_pd", 0.0);
        let err = Init { flow: Flow::Rotation }
            .check_preconditions(&config)
            .unwrap_err();
        assert_eq!(err.kind(), "precondition");
    }

    #[test]
    fn solid_body_rotation_is_zonal() {
        let period = 12.0 * 86_400.0;
        let radius = 6.371e6;
        let (u, v) = Flow::Rotation.velocity(1.0, 0.0, period, radius);
        assert!((u - 2.0 * PI * radius / period).abs() < 1e-9);
        assert_eq!(v, 0.0);
        let (_, v) = Flow::Nondivergent.velocity(PI / 4.0, 0.0, period, radius);
        assert!(v > 0.0);
    }

    #[test]
    fn hills_peak_at_their_centers() {
        let (lon, lat) = HILL_CENTERS[0];
        assert!((cosine_bells(lon, lat) - 1.0).abs() < 1e-12);
        assert!((cosine_bells(0.0, 0.0) - BACKGROUND).abs() < 1e-12);
        assert!((correlated(cosine_bells(lon, lat)) - 0.1).abs() < 1e-12);

        // inside the slot of the first cylinder, then on its solid rim
        assert_eq!(slotted_cylinders(lon, lat), BACKGROUND);
        assert_eq!(slotted_cylinders(lon + 0.2, lat), 1.0);
        // the slot is open to the north only for the first cylinder
        assert_eq!(slotted_cylinders(lon, lat - 0.45), 1.0);
        assert_eq!(slotted_cylinders(lon, lat + 0.45), BACKGROUND);
    }

    #[test]
    fn smooth_tracer_stays_in_unit_range() {
        for lon in [0.0, 0.7, 2.1, 4.0, 5.9] {
            for lat in [-1.4, -0.3, 0.0, 0.8, 1.5] {
                let value = xyztrig(lon, lat);
                assert!((0.0..=1.0).contains(&value), "{value}");
            }
        }
    }
}
