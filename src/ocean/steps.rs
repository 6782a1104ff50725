//! Runners shared by several task families.
use crate::component::{RunContext, Step, StepPlan, StepRunner};
use crate::compute::{icosahedral_subdivisions, EARTH_RADIUS_KM};
use crate::config::ConfigLayer;
use crate::dataset::Dataset;
use crate::error::{ConfigError, Error, Result};
use crate::resolution::resolution_to_subdir;
use std::path::Path;
use tracing::debug;

/// Canonical directory of the icosahedral base mesh at `resdir`.
pub(super) fn icos_base_mesh_path(resdir: &str) -> String {
    format!("spherical/icos/base_mesh/{resdir}")
}

/// The icosahedral base mesh at `resolution` km, outside any task tree so
/// every spherical task at that resolution shares it. Tasks see it through
/// `base_mesh/icos_<res>`.
pub(super) fn icos_base_mesh(resolution: f64) -> StepPlan {
    let resdir = resolution_to_subdir(resolution);
    let subdir = icos_base_mesh_path(&resdir);
    StepPlan::new(subdir.clone(), move |_| {
        let mut step = Step::at(subdir, IcosBaseMesh { resolution });
        step.add_output_file("base_mesh.nc", &["lonCell", "latCell", "areaCell"]);
        Ok(step)
    })
    .symlink(format!("base_mesh/icos_{resdir}"))
}

/// Icosahedral mesh at the finest subdivision meeting the resolution.
struct IcosBaseMesh {
    resolution: f64,
}

impl StepRunner for IcosBaseMesh {
    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let subdivisions = icosahedral_subdivisions(self.resolution);
        debug!(subdivisions, "icosahedral base mesh");
        let mesh = ctx.compute.spherical_mesh(subdivisions, EARTH_RADIUS_KM)?;
        ctx.write(&mesh, "base_mesh.nc")
    }
}

pub(super) fn attr_f64(ds: &Dataset, path: &Path, name: &str) -> Result<f64> {
    ds.attrs
        .get(name)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| Error::dataset(path, format!("missing numeric attribute {name}")))
}

/// Build a planar hex mesh, cull its non-periodic boundary and write
/// `base_mesh.nc`, `culled_mesh.nc` and `culled_graph.info`.
pub(super) fn planar_mesh(
    ctx: &RunContext<'_>,
    nx: usize,
    ny: usize,
    dc: f64,
    nonperiodic_y: bool,
) -> Result<Dataset> {
    let base = ctx.compute.planar_hex_mesh(nx, ny, dc, false, nonperiodic_y)?;
    ctx.write(&base, "base_mesh.nc")?;
    let culled = ctx.compute.cull(&base)?;
    let (mesh, graph) = ctx.compute.convert(&culled)?;
    ctx.write(&mesh, "culled_mesh.nc")?;
    ctx.write_text("culled_graph.info", &graph)?;
    Ok(mesh)
}

/// Files written by `planar_mesh`.
pub(super) const PLANAR_MESH_OUTPUTS: [&str; 3] =
    ["base_mesh.nc", "culled_mesh.nc", "culled_graph.info"];

/// A `(nCells, nVertLevels)` field constant within each column.
pub(super) fn column_field(ds: &Dataset, value: impl Fn(usize) -> f64) -> Result<Vec<f64>> {
    let cells = ds.dim("nCells")?;
    let levels = ds.dim("nVertLevels")?;
    let mut values = Vec::with_capacity(cells * levels);
    for cell in 0..cells {
        values.resize(values.len() + levels, value(cell));
    }
    Ok(values)
}

/// Zero velocity plus uniform Coriolis fields.
pub(super) fn add_rest_state(ds: &mut Dataset, coriolis: f64) -> Result<()> {
    let edges = ds.dim("nEdges")?;
    let levels = ds.dim("nVertLevels")?;
    ds.insert("normalVelocity", &["nEdges", "nVertLevels"], vec![0.0; edges * levels])?;
    let cells = ds.dim("nCells")?;
    let vertices = ds.dim("nVertices")?;
    ds.insert("fCell", &["nCells"], vec![coriolis; cells])?;
    ds.insert("fEdge", &["nEdges"], vec![coriolis; edges])?;
    ds.insert("fVertex", &["nVertices"], vec![coriolis; vertices])?;
    Ok(())
}

fn forward_options(config: &ConfigLayer) -> Result<(usize, f64)> {
    let section = config.section("forward");
    let steps = section.getint("steps")?;
    let dt = section.getfloat("dt")?;
    if steps < 1 {
        return Err(ConfigError::InvalidValue {
            section: "forward".to_string(),
            option: "steps".to_string(),
            value: steps.to_string(),
            expected: "positive integer",
        }
        .into());
    }
    if dt.is_nan() || dt <= 0.0 {
        return Err(Error::precondition(format!("[forward] dt must be positive, got {dt}")));
    }
    Ok((steps as usize, dt))
}

/// Runs the model from `init.nc` and writes `output.nc`.
#[derive(Debug, Clone, Default)]
pub(super) struct Forward {
    attrs: Vec<(&'static str, String)>,
}

impl Forward {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Record a run option on the output, e.g. the wetting-drying method.
    pub(super) fn attr(mut self, name: &'static str, value: impl ToString) -> Self {
        self.attrs.push((name, value.to_string()));
        self
    }
}

impl StepRunner for Forward {
    fn check_preconditions(&self, config: &ConfigLayer) -> Result<()> {
        forward_options(config).map(|_| ())
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        let (steps, dt) = forward_options(ctx.config)?;
        let state = ctx.load("init.nc")?;
        let mut output = ctx.compute.forward(&state, steps, dt)?;
        for (name, value) in &self.attrs {
            output.set_attr(name, value.clone());
        }
        ctx.write(&output, "output.nc")
    }
}

/// One field to render from one input file.
#[derive(Debug, Clone)]
pub(super) struct Plot {
    pub input: String,
    pub field: String,
    pub title: String,
    pub out: String,
}

impl Plot {
    pub(super) fn new(
        input: impl Into<String>,
        field: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let input = input.into();
        let field = field.into();
        let stem = input.trim_end_matches(".nc").to_string();
        Self {
            out: format!("{stem}_{field}.txt"),
            input,
            field,
            title: title.into(),
        }
    }
}

/// Renders each plot; nothing it writes is read by another step.
#[derive(Debug, Clone)]
pub(super) struct Viz {
    pub plots: Vec<Plot>,
}

impl StepRunner for Viz {
    fn run(&self, ctx: &RunContext<'_>) -> Result<()> {
        for plot in &self.plots {
            let ds = ctx.load(&plot.input)?;
            ctx.plot(&ds, &plot.field, &plot.title, &plot.out)?;
        }
        Ok(())
    }
}
