//! Diagnostic plots. Nothing produced here flows back into the graph.
use crate::dataset::Dataset;
use crate::error::Result;
use crate::util::write_atomic;
use std::path::Path;

pub trait Plotter: Send + Sync {
    /// Render `field` of `ds` to `out`.
    fn plot_field(&self, ds: &Dataset, field: &str, title: &str, out: &Path) -> Result<()>;
}

/// Writes a plain-text summary (extent, range, mean) in place of an image.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryPlotter;

impl Plotter for SummaryPlotter {
    fn plot_field(&self, ds: &Dataset, field: &str, title: &str, out: &Path) -> Result<()> {
        let variable = ds.var(field)?;
        let values = &variable.values;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        let text = format!(
            "title: {title}\nfield: {field}\ndims: {}\ncount: {}\nmin: {min}\nmax: {max}\nmean: {mean}\n",
            variable.dims.join(", "),
            values.len(),
        );
        write_atomic(out, text.as_bytes())
    }
}
