//! The ocean task catalogue.
//!
//! `build_component` registers every task family in a fixed order, so a
//! rebuild from the same packaged defaults always yields the same paths.
mod chain;
mod drying_slope;
mod global_ocean;
mod ice_shelf_2d;
mod manufactured_solution;
mod sphere_transport;
mod steps;

use crate::component::Component;
use crate::config::ConfigLayer;
use crate::error::Result;

/// Density of seawater (kg m^-3).
const RHO_SW: f64 = 1026.0;
/// Gravitational acceleration (m s^-2).
const GRAVITY: f64 = 9.80616;

/// Register every ocean task.
pub fn build_component() -> Result<Component> {
    let mut component = Component::new("ocean");
    drying_slope::add_tasks(&mut component)?;
    ice_shelf_2d::add_tasks(&mut component)?;
    manufactured_solution::add_tasks(&mut component)?;
    global_ocean::add_tasks(&mut component)?;
    sphere_transport::add_tasks(&mut component)?;
    Ok(component)
}

/// A layer at `filepath` holding the shared ocean defaults followed by each
/// of `packages` (package, resource) in order.
fn packaged_layer(filepath: &str, packages: &[(&str, &str)]) -> Result<ConfigLayer> {
    let mut layer = ConfigLayer::new(filepath);
    layer.add_from_package("ocean", "default.cfg")?;
    for (package, resource) in packages {
        layer.add_from_package(package, resource)?;
    }
    Ok(layer)
}

#[cfg(test)]
#[path = "ocean_tests.rs"]
mod tests;
