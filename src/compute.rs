//! Numerical collaborators invoked from step runners.
//!
//! Steps only see the `ComputeBackend` trait: consume a mesh or dataset,
//! return a new one, or fail on malformed geometry. `BuiltinCompute` is a
//! small deterministic implementation good enough to exercise the graph.
use crate::config::ConfigLayer;
use crate::dataset::Dataset;
use crate::error::{ConfigError, Error, Result};
use std::collections::HashMap;
use std::f64::consts::PI;

const SQRT3_OVER_2: f64 = 0.866_025_403_784_438_6;

/// Mean earth radius in km.
pub const EARTH_RADIUS_KM: f64 = 6371.22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapMethod {
    Conserve,
    Bilinear,
}

impl RemapMethod {
    pub fn parse(section: &str, option: &str, value: &str) -> Result<Self> {
        match value {
            "conserve" => Ok(RemapMethod::Conserve),
            "bilinear" => Ok(RemapMethod::Bilinear),
            other => Err(ConfigError::InvalidValue {
                section: section.to_string(),
                option: option.to_string(),
                value: other.to_string(),
                expected: "remap method (conserve or bilinear)",
            }
            .into()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemapMethod::Conserve => "conserve",
            RemapMethod::Bilinear => "bilinear",
        }
    }
}

/// Mesh and dataset operations steps delegate to.
pub trait ComputeBackend: Send + Sync {
    /// Regular hexagonal mesh of `nx` by `ny` cells with spacing `dc` (m).
    /// Non-periodic directions get their boundary cells flagged for culling.
    fn planar_hex_mesh(
        &self,
        nx: usize,
        ny: usize,
        dc: f64,
        nonperiodic_x: bool,
        nonperiodic_y: bool,
    ) -> Result<Dataset>;

    /// Remove cells flagged in `cullCell`.
    fn cull(&self, mesh: &Dataset) -> Result<Dataset>;

    /// Finalize mesh connectivity and return the mesh with its graph
    /// partition file contents.
    fn convert(&self, mesh: &Dataset) -> Result<(Dataset, String)>;

    /// Quasi-uniform spherical mesh with `10 * 4^subdivisions + 2` cells.
    fn spherical_mesh(&self, subdivisions: u32, radius_km: f64) -> Result<Dataset>;

    /// Build the vertical coordinate from `[vertical_grid]` plus the `ssh`
    /// and `bottomDepth` fields already in `ds`.
    fn init_vertical_coord(&self, config: &ConfigLayer, ds: &mut Dataset) -> Result<()>;

    /// Integrate the state forward `steps` time steps of `dt` seconds.
    fn forward(&self, state: &Dataset, steps: usize, dt: f64) -> Result<Dataset>;

    /// Sample every `(lat, lon)` field of a regular lon/lat `source` onto
    /// the cells of a spherical `mesh`.
    fn remap(
        &self,
        source: &Dataset,
        lon_var: &str,
        lat_var: &str,
        mesh: &Dataset,
        method: RemapMethod,
    ) -> Result<Dataset>;
}

/// Cell counts for a planar hex domain of `lx` by `ly` km at `resolution` km.
pub fn planar_hex_nx_ny(lx: f64, ly: f64, resolution: f64) -> (usize, usize) {
    let nx = 2 * (lx / (2.0 * resolution)).round() as usize;
    let ny = 2 * (ly / (2.0 * resolution * SQRT3_OVER_2)).round() as usize;
    (nx.max(4), ny.max(4))
}

/// Smallest icosahedral subdivision whose mean cell spacing is at most
/// `resolution_km`.
pub fn icosahedral_subdivisions(resolution_km: f64) -> u32 {
    let area = 4.0 * PI * EARTH_RADIUS_KM * EARTH_RADIUS_KM;
    let mut subdivisions = 0;
    while subdivisions < 12 {
        let cells = icosahedral_cells(subdivisions) as f64;
        if (area / cells).sqrt() <= resolution_km {
            break;
        }
        subdivisions += 1;
    }
    subdivisions
}

pub fn icosahedral_cells(subdivisions: u32) -> usize {
    10 * 4usize.pow(subdivisions) + 2
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCompute;

impl ComputeBackend for BuiltinCompute {
    fn planar_hex_mesh(
        &self,
        nx: usize,
        ny: usize,
        dc: f64,
        nonperiodic_x: bool,
        nonperiodic_y: bool,
    ) -> Result<Dataset> {
        if nx < 2 || ny < 2 || dc.is_nan() || dc <= 0.0 {
            return Err(Error::compute(format!(
                "invalid planar hex mesh request nx={nx} ny={ny} dc={dc}"
            )));
        }
        let n_cells = nx * ny;
        let mut x_cell = Vec::with_capacity(n_cells);
        let mut y_cell = Vec::with_capacity(n_cells);
        let mut cull = Vec::with_capacity(n_cells);
        for j in 0..ny {
            for i in 0..nx {
                let shift = if j % 2 == 1 { 0.5 } else { 0.0 };
                x_cell.push(dc * (i as f64 + shift));
                y_cell.push(dc * SQRT3_OVER_2 * j as f64);
                let boundary_x = nonperiodic_x && (i == 0 || i == nx - 1);
                let boundary_y = nonperiodic_y && (j == 0 || j == ny - 1);
                cull.push(if boundary_x || boundary_y { 1.0 } else { 0.0 });
            }
        }
        let mut ds = Dataset::new();
        ds.set_attr("nx", nx);
        ds.set_attr("ny", ny);
        ds.set_attr("dc", dc);
        ds.set_attr("is_periodic_x", !nonperiodic_x);
        ds.set_attr("is_periodic_y", !nonperiodic_y);
        ds.set_dim("nCells", n_cells);
        ds.insert("xCell", &["nCells"], x_cell)?;
        ds.insert("yCell", &["nCells"], y_cell)?;
        ds.insert("cullCell", &["nCells"], cull)?;
        ds.insert("areaCell", &["nCells"], vec![dc * dc * SQRT3_OVER_2; n_cells])?;
        add_edges_and_vertices(&mut ds, dc)?;
        Ok(ds)
    }

    fn cull(&self, mesh: &Dataset) -> Result<Dataset> {
        let flags = mesh.values("cullCell")?;
        let keep: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag < 0.5)
            .map(|(index, _)| index)
            .collect();
        if keep.is_empty() {
            return Err(Error::compute("culling removed every cell"));
        }
        let mut ds = Dataset::new();
        ds.attrs = mesh.attrs.clone();
        ds.set_dim("nCells", keep.len());
        for name in ["xCell", "yCell", "areaCell"] {
            let values = mesh.values(name)?;
            let kept = keep
                .iter()
                .map(|&i| values.get(i).copied())
                .collect::<Option<Vec<f64>>>()
                .ok_or_else(|| Error::compute(format!("{name} is shorter than cullCell")))?;
            ds.insert(name, &["nCells"], kept)?;
        }
        ds.insert("cullCell", &["nCells"], vec![0.0; keep.len()])?;
        let dc = attr_f64(mesh, "dc")?;
        add_edges_and_vertices(&mut ds, dc)?;
        Ok(ds)
    }

    fn convert(&self, mesh: &Dataset) -> Result<(Dataset, String)> {
        let dc = attr_f64(mesh, "dc")?;
        let x_cell = mesh.values("xCell")?;
        let y_cell = mesh.values("yCell")?;
        let row_height = dc * SQRT3_OVER_2;
        let mut index_of: HashMap<(i64, i64), usize> = HashMap::new();
        let mut grid = Vec::with_capacity(x_cell.len());
        for (cell, (x, y)) in x_cell.iter().zip(y_cell).enumerate() {
            let j = (y / row_height).round() as i64;
            let shift = if j.rem_euclid(2) == 1 { 0.5 } else { 0.0 };
            let i = (x / dc - shift).round() as i64;
            index_of.insert((i, j), cell);
            grid.push((i, j));
        }

        let mut adjacency: Vec<Vec<usize>> = Vec::with_capacity(grid.len());
        let mut edge_count = 0usize;
        for &(i, j) in &grid {
            let offsets: [(i64, i64); 6] = if j.rem_euclid(2) == 1 {
                [(-1, 0), (1, 0), (0, -1), (1, -1), (0, 1), (1, 1)]
            } else {
                [(-1, 0), (1, 0), (-1, -1), (0, -1), (-1, 1), (0, 1)]
            };
            let neighbors: Vec<usize> = offsets
                .iter()
                .filter_map(|(di, dj)| index_of.get(&(i + di, j + dj)).copied())
                .collect();
            edge_count += neighbors.len();
            adjacency.push(neighbors);
        }

        let mut graph = format!("{} {}\n", grid.len(), edge_count / 2);
        for neighbors in &adjacency {
            let line: Vec<String> = neighbors.iter().map(|n| (n + 1).to_string()).collect();
            graph.push_str(&line.join(" "));
            graph.push('\n');
        }

        let mut ds = mesh.clone();
        ds.remove("cullCell");
        ds.insert(
            "nEdgesOnCell",
            &["nCells"],
            adjacency.iter().map(|n| n.len() as f64).collect(),
        )?;
        Ok((ds, graph))
    }

    fn spherical_mesh(&self, subdivisions: u32, radius_km: f64) -> Result<Dataset> {
        let n_cells = icosahedral_cells(subdivisions);
        let golden_angle = PI * (3.0 - 5f64.sqrt());
        let mut lon = Vec::with_capacity(n_cells);
        let mut lat = Vec::with_capacity(n_cells);
        for k in 0..n_cells {
            let z = 1.0 - 2.0 * (k as f64 + 0.5) / n_cells as f64;
            lat.push(z.asin());
            lon.push((k as f64 * golden_angle).rem_euclid(2.0 * PI));
        }
        let area = 4.0 * PI * radius_km * radius_km * 1.0e6 / n_cells as f64;
        let mut ds = Dataset::new();
        ds.set_attr("subdivisions", subdivisions);
        ds.set_attr("sphere_radius", radius_km * 1.0e3);
        ds.set_dim("nCells", n_cells);
        ds.insert("lonCell", &["nCells"], lon)?;
        ds.insert("latCell", &["nCells"], lat)?;
        ds.insert("areaCell", &["nCells"], vec![area; n_cells])?;
        Ok(ds)
    }

    fn init_vertical_coord(&self, config: &ConfigLayer, ds: &mut Dataset) -> Result<()> {
        let section = config.section("vertical_grid");
        let coord_type = section.get("coord_type")?;
        let ref_depth = section.getfloat("bottom_depth")?;
        let vert_levels = match coord_type.as_str() {
            "single_layer" => 1,
            "sigma" | "z-star" | "z-level" => {
                let levels = section.getint("vert_levels")?;
                if levels < 1 {
                    return Err(ConfigError::InvalidValue {
                        section: "vertical_grid".to_string(),
                        option: "vert_levels".to_string(),
                        value: levels.to_string(),
                        expected: "positive integer",
                    }
                    .into());
                }
                levels as usize
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    section: "vertical_grid".to_string(),
                    option: "coord_type".to_string(),
                    value: other.to_string(),
                    expected: "vertical coordinate (sigma, single_layer, z-level, z-star)",
                }
                .into())
            }
        };
        let ssh = ds.values("ssh")?.to_vec();
        let bottom_depth = ds.values("bottomDepth")?.to_vec();
        let n_cells = ssh.len();
        if bottom_depth.len() != n_cells {
            return Err(Error::compute(format!(
                "ssh has {n_cells} cells but bottomDepth has {}",
                bottom_depth.len()
            )));
        }
        let interval = ref_depth / vert_levels as f64;
        let ref_bottom: Vec<f64> = (1..=vert_levels).map(|k| interval * k as f64).collect();

        let mut thickness = Vec::with_capacity(n_cells * vert_levels);
        let mut z_mid = Vec::with_capacity(n_cells * vert_levels);
        let mut max_level = Vec::with_capacity(n_cells);
        for (cell, (&surface, &depth)) in ssh.iter().zip(&bottom_depth).enumerate() {
            let column = surface + depth;
            if column < 0.0 {
                return Err(Error::compute(format!(
                    "negative water column thickness {column} in cell {cell}"
                )));
            }
            let active = match coord_type.as_str() {
                "sigma" | "single_layer" => vert_levels,
                _ => ref_bottom
                    .iter()
                    .filter(|bottom| **bottom - interval < depth)
                    .count()
                    .max(1),
            };
            let layer = column / active as f64;
            let mut z_top = surface;
            for k in 0..vert_levels {
                let h = if k < active { layer } else { 0.0 };
                thickness.push(h);
                z_mid.push(z_top - 0.5 * h);
                z_top -= h;
            }
            max_level.push(active as f64);
        }

        ds.set_dim("nVertLevels", vert_levels);
        ds.insert("refBottomDepth", &["nVertLevels"], ref_bottom)?;
        ds.insert("layerThickness", &["nCells", "nVertLevels"], thickness)?;
        ds.insert("zMid", &["nCells", "nVertLevels"], z_mid)?;
        ds.insert("minLevelCell", &["nCells"], vec![1.0; n_cells])?;
        ds.insert("maxLevelCell", &["nCells"], max_level)?;
        Ok(())
    }

    fn forward(&self, state: &Dataset, steps: usize, dt: f64) -> Result<Dataset> {
        if !state.has("layerThickness") {
            return Err(Error::compute("initial state has no layerThickness"));
        }
        if dt.is_nan() || dt <= 0.0 {
            return Err(Error::compute(format!("time step must be positive, got {dt}")));
        }
        let mut out = state.clone();
        let elapsed = steps as f64 * dt;
        if state.has("ssh") {
            let decay = (-elapsed / 86_400.0).exp();
            let ssh: Vec<f64> = state.values("ssh")?.iter().map(|v| v * decay).collect();
            out.insert("ssh", &["nCells"], ssh)?;
        }
        out.set_attr("steps", steps);
        out.set_attr("simulated_seconds", elapsed);
        Ok(out)
    }

    fn remap(
        &self,
        source: &Dataset,
        lon_var: &str,
        lat_var: &str,
        mesh: &Dataset,
        method: RemapMethod,
    ) -> Result<Dataset> {
        let src_lon = source.values(lon_var)?;
        let src_lat = source.values(lat_var)?;
        if src_lon.len() < 2 || src_lat.len() < 2 {
            return Err(Error::compute("source grid needs at least two points per axis"));
        }
        let lon_dim = source.var(lon_var)?.dims.first().cloned().unwrap_or_default();
        let lat_dim = source.var(lat_var)?.dims.first().cloned().unwrap_or_default();
        let fields: Vec<(&String, &[f64])> = source
            .variables
            .iter()
            .filter(|(_, var)| var.dims == [lat_dim.clone(), lon_dim.clone()])
            .map(|(name, var)| (name, var.values.as_slice()))
            .collect();
        if fields.is_empty() {
            return Err(Error::compute("source has no (lat, lon) fields to remap"));
        }

        let lon_cell = mesh.values("lonCell")?;
        let lat_cell = mesh.values("latCell")?;
        let n_lon = src_lon.len();
        let mut out = Dataset::new();
        out.set_attr("remap_method", method.as_str());
        out.set_dim("nCells", lon_cell.len());
        out.insert("lonCell", &["nCells"], lon_cell.to_vec())?;
        out.insert("latCell", &["nCells"], lat_cell.to_vec())?;
        for (name, values) in fields {
            let at = |i: usize, j: usize| {
                values.get(j * n_lon + i).copied().ok_or_else(|| {
                    Error::compute(format!("{name} does not cover the source grid"))
                })
            };
            let mut sampled = Vec::with_capacity(lon_cell.len());
            for (lon, lat) in lon_cell.iter().zip(lat_cell) {
                let lon_deg = lon.to_degrees();
                let lon_deg = if lon_deg > 180.0 { lon_deg - 360.0 } else { lon_deg };
                let lat_deg = lat.to_degrees();
                let (i0, i1, wx) = bracket(src_lon, lon_deg);
                let (j0, j1, wy) = bracket(src_lat, lat_deg);
                let value = match method {
                    RemapMethod::Conserve => {
                        let i = if wx < 0.5 { i0 } else { i1 };
                        let j = if wy < 0.5 { j0 } else { j1 };
                        at(i, j)?
                    }
                    RemapMethod::Bilinear => {
                        let v00 = at(i0, j0)?;
                        let v01 = at(i1, j0)?;
                        let v10 = at(i0, j1)?;
                        let v11 = at(i1, j1)?;
                        (1.0 - wy) * ((1.0 - wx) * v00 + wx * v01)
                            + wy * ((1.0 - wx) * v10 + wx * v11)
                    }
                };
                sampled.push(value);
            }
            out.insert(name, &["nCells"], sampled)?;
        }
        Ok(out)
    }
}

/// Rebuild edge and vertex fields from cell centers.
fn add_edges_and_vertices(ds: &mut Dataset, dc: f64) -> Result<()> {
    let x_cell = ds.values("xCell")?.to_vec();
    let y_cell = ds.values("yCell")?.to_vec();
    let n_cells = x_cell.len();
    let mut x_edge = Vec::with_capacity(3 * n_cells);
    let mut y_edge = Vec::with_capacity(3 * n_cells);
    for (x, y) in x_cell.iter().zip(&y_cell) {
        for angle in [0.0, PI / 3.0, 2.0 * PI / 3.0] {
            x_edge.push(x + 0.5 * dc * f64::cos(angle));
            y_edge.push(y + 0.5 * dc * f64::sin(angle));
        }
    }
    let mut x_vertex = Vec::with_capacity(2 * n_cells);
    let mut y_vertex = Vec::with_capacity(2 * n_cells);
    let radius = dc / 3f64.sqrt();
    for (x, y) in x_cell.iter().zip(&y_cell) {
        for angle in [PI / 6.0, PI / 2.0] {
            x_vertex.push(x + radius * f64::cos(angle));
            y_vertex.push(y + radius * f64::sin(angle));
        }
    }
    ds.set_dim("nEdges", 3 * n_cells);
    ds.set_dim("nVertices", 2 * n_cells);
    ds.insert("xEdge", &["nEdges"], x_edge)?;
    ds.insert("yEdge", &["nEdges"], y_edge)?;
    ds.insert("dcEdge", &["nEdges"], vec![dc; 3 * n_cells])?;
    ds.insert("xVertex", &["nVertices"], x_vertex)?;
    ds.insert("yVertex", &["nVertices"], y_vertex)?;
    Ok(())
}

fn attr_f64(ds: &Dataset, name: &str) -> Result<f64> {
    ds.attrs
        .get(name)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| Error::compute(format!("mesh is missing the {name} attribute")))
}

/// Indices bracketing `value` on an ascending axis plus the weight of the
/// upper index, clamped to the axis ends.
fn bracket(axis: &[f64], value: f64) -> (usize, usize, f64) {
    let last = axis.len() - 1;
    if value <= axis[0] {
        return (0, 0, 0.0);
    }
    if value >= axis[last] {
        return (last, last, 0.0);
    }
    let upper = axis.partition_point(|point| *point < value);
    let lower = upper - 1;
    let span = axis[upper] - axis[lower];
    let weight = if span > 0.0 {
        (value - axis[lower]) / span
    } else {
        0.0
    };
    (lower, upper, weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cull_removes_nonperiodic_boundary_rows() {
        let compute = BuiltinCompute;
        let mesh = compute.planar_hex_mesh(4, 6, 1000.0, false, true).unwrap();
        assert_eq!(mesh.dim("nCells").unwrap(), 24);
        let culled = compute.cull(&mesh).unwrap();
        assert_eq!(culled.dim("nCells").unwrap(), 16);
        assert_eq!(culled.dim("nEdges").unwrap(), 48);
    }

    #[test]
    fn convert_writes_a_symmetric_graph() {
        let compute = BuiltinCompute;
        let mesh = compute.planar_hex_mesh(4, 4, 1000.0, false, false).unwrap();
        let (converted, graph) = compute.convert(&mesh).unwrap();
        let mut lines = graph.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("16 "));
        assert_eq!(lines.count(), 16);
        assert!(!converted.has("cullCell"));
        assert!(converted.has("nEdgesOnCell"));
    }

    #[test]
    fn spherical_mesh_matches_icosahedral_counts() {
        let compute = BuiltinCompute;
        let mesh = compute.spherical_mesh(2, EARTH_RADIUS_KM).unwrap();
        assert_eq!(mesh.dim("nCells").unwrap(), 162);
        assert_eq!(icosahedral_subdivisions(480.0), 4);
        assert_eq!(icosahedral_cells(4), 2562);
    }

    #[test]
    fn vertical_coord_rejects_unknown_coordinate() {
        let compute = BuiltinCompute;
        let mut config = ConfigLayer::new("x.cfg");
        config.set("vertical_grid", "coord_type", "hybrid");
        config.set("vertical_grid", "bottom_depth", 10.0);
        config.set("vertical_grid", "vert_levels", 3);
        let mut ds = Dataset::new();
        ds.set_dim("nCells", 1);
        ds.insert("ssh", &["nCells"], vec![0.0]).unwrap();
        ds.insert("bottomDepth", &["nCells"], vec![10.0]).unwrap();
        let err = compute.init_vertical_coord(&config, &mut ds).unwrap_err();
        assert_eq!(err.kind(), "config");

        config.set("vertical_grid", "coord_type", "sigma");
        compute.init_vertical_coord(&config, &mut ds).unwrap();
        let thickness = ds.values("layerThickness").unwrap();
        assert_eq!(thickness.len(), 3);
        assert!((thickness.iter().sum::<f64>() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn vertical_coord_rejects_mismatched_columns() {
        let compute = BuiltinCompute;
        let mut config = ConfigLayer::new("x.cfg");
        config.set("vertical_grid", "coord_type", "z-star");
        config.set("vertical_grid", "bottom_depth", 10.0);
        config.set("vertical_grid", "vert_levels", 2);
        let mut ds = Dataset::new();
        ds.set_dim("nCells", 3);
        ds.insert("ssh", &["nCells"], vec![0.0; 3]).unwrap();
        ds.set_dim("nCells", 1);
        ds.insert("bottomDepth", &["nCells"], vec![10.0]).unwrap();
        let err = compute.init_vertical_coord(&config, &mut ds).unwrap_err();
        assert_eq!(err.kind(), "compute");
        assert!(err.to_string().contains("bottomDepth"), "{err}");
    }

    #[test]
    fn bilinear_remap_interpolates_between_points() {
        let compute = BuiltinCompute;
        let mut source = Dataset::new();
        source.set_dim("lon", 2);
        source.set_dim("lat", 2);
        source.insert("lon", &["lon"], vec![-10.0, 10.0]).unwrap();
        source.insert("lat", &["lat"], vec![-10.0, 10.0]).unwrap();
        source
            .insert("bathymetry", &["lat", "lon"], vec![0.0, 2.0, 0.0, 2.0])
            .unwrap();
        let mut mesh = Dataset::new();
        mesh.set_dim("nCells", 1);
        mesh.insert("lonCell", &["nCells"], vec![0.0]).unwrap();
        mesh.insert("latCell", &["nCells"], vec![0.0]).unwrap();
        let out = compute
            .remap(&source, "lon", "lat", &mesh, RemapMethod::Bilinear)
            .unwrap();
        assert!((out.values("bathymetry").unwrap()[0] - 1.0).abs() < 1e-9);
    }
}
