//! The atomic unit of work: a directory, declared inputs and outputs, a
//! config attachment, and a runner.
use crate::compute::ComputeBackend;
use crate::config::ConfigLayer;
use crate::dataset::Dataset;
use crate::error::{ConfigError, Result};
use crate::util::write_atomic;
use crate::viz::Plotter;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Handle to a step in the component arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StepId(pub(crate) usize);

/// Handle to a shared config layer in the component arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ConfigId(pub(crate) usize);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a declared input comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// A declared output of another step; always a dependency edge.
    StepOutput { step: StepId, filename: String },
    /// Relative to the step directory, or absolute. Becomes an edge when it
    /// lands on a registered step's declared output.
    Path(String),
    /// Resolved against the external resource store at run time.
    Database { database: String, target: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputFile {
    pub filename: String,
    pub source: InputSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub filename: String,
    pub validate_vars: Vec<String>,
}

/// Config attachment. Shared layers live in the component arena and are only
/// writable through `Component::config_mut`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    Owned(ConfigLayer),
    Shared {
        config: ConfigId,
        link: Option<String>,
    },
}

/// Everything a runner may touch while executing.
pub struct RunContext<'a> {
    pub step_path: &'a str,
    pub step_dir: PathBuf,
    pub config: &'a ConfigLayer,
    pub compute: &'a dyn ComputeBackend,
    pub plotter: &'a dyn Plotter,
}

impl RunContext<'_> {
    /// Path of `filename` inside the step directory.
    pub fn path(&self, filename: &str) -> PathBuf {
        self.step_dir.join(filename)
    }

    pub fn load(&self, filename: &str) -> Result<Dataset> {
        Dataset::load(&self.path(filename))
    }

    pub fn write(&self, ds: &Dataset, filename: &str) -> Result<()> {
        ds.write(&self.path(filename))
    }

    pub fn write_text(&self, filename: &str, text: &str) -> Result<()> {
        write_atomic(&self.path(filename), text.as_bytes())
    }

    pub fn plot(&self, ds: &Dataset, field: &str, title: &str, filename: &str) -> Result<()> {
        self.plotter.plot_field(ds, field, title, &self.path(filename))
    }
}

/// The work contract of a step.
pub trait StepRunner: Send + Sync {
    /// Domain sanity checks that need only the config. Evaluated at setup
    /// and again right before `run`.
    fn check_preconditions(&self, config: &ConfigLayer) -> Result<()> {
        let _ = config;
        Ok(())
    }

    /// Read materialized inputs, compute, write declared outputs.
    fn run(&self, ctx: &RunContext<'_>) -> Result<()>;
}

pub struct Step {
    name: String,
    subdir: String,
    inputs: Vec<InputFile>,
    outputs: Vec<OutputFile>,
    config: StepConfig,
    runner: Box<dyn StepRunner>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("subdir", &self.subdir)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Step {
    /// A step named `name` living at `<indir>/<name>`.
    pub fn new(indir: &str, name: &str, runner: impl StepRunner + 'static) -> Self {
        let subdir = if indir.is_empty() {
            name.to_string()
        } else {
            format!("{indir}/{name}")
        };
        Self::at(subdir, runner)
    }

    /// A step at an explicit directory; its name is the last path segment.
    pub fn at(subdir: impl Into<String>, runner: impl StepRunner + 'static) -> Self {
        let subdir = subdir.into().trim_matches('/').to_string();
        let name = subdir.rsplit('/').next().unwrap_or_default().to_string();
        let config = StepConfig::Owned(ConfigLayer::new(format!("{subdir}/{name}.cfg")));
        Self {
            name,
            subdir,
            inputs: Vec::new(),
            outputs: Vec::new(),
            config,
            runner: Box::new(runner),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical directory relative to the work root; the step's identity.
    pub fn subdir(&self) -> &str {
        &self.subdir
    }

    pub fn dir(&self, work_root: &Path) -> PathBuf {
        work_root.join(&self.subdir)
    }

    pub fn inputs(&self) -> &[InputFile] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputFile] {
        &self.outputs
    }

    pub fn has_output(&self, filename: &str) -> bool {
        self.outputs.iter().any(|output| output.filename == filename)
    }

    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    pub fn runner(&self) -> &dyn StepRunner {
        self.runner.as_ref()
    }

    pub fn add_input_file(&mut self, filename: &str, source: InputSource) -> &mut Self {
        self.inputs.retain(|input| input.filename != filename);
        self.inputs.push(InputFile {
            filename: filename.to_string(),
            source,
        });
        self
    }

    pub fn add_input_from_step(&mut self, filename: &str, step: StepId, output: &str) -> &mut Self {
        self.add_input_file(
            filename,
            InputSource::StepOutput {
                step,
                filename: output.to_string(),
            },
        )
    }

    pub fn add_input_from_path(&mut self, filename: &str, target: &str) -> &mut Self {
        self.add_input_file(filename, InputSource::Path(target.to_string()))
    }

    pub fn add_input_from_database(
        &mut self,
        filename: &str,
        database: &str,
        target: &str,
    ) -> &mut Self {
        self.add_input_file(
            filename,
            InputSource::Database {
                database: database.to_string(),
                target: target.to_string(),
            },
        )
    }

    /// Declare a produced artifact; `validate_vars` are checked after `run`.
    pub fn add_output_file(&mut self, filename: &str, validate_vars: &[&str]) -> &mut Self {
        self.outputs.retain(|output| output.filename != filename);
        self.outputs.push(OutputFile {
            filename: filename.to_string(),
            validate_vars: validate_vars.iter().map(|var| var.to_string()).collect(),
        });
        self
    }

    /// Attach a shared layer. A non-empty `link` asks setup for a symlink of
    /// that name in the step dir pointing at the canonical file.
    pub fn set_shared_config(&mut self, config: ConfigId, link: Option<&str>) -> &mut Self {
        self.config = StepConfig::Shared {
            config,
            link: link.filter(|name| !name.is_empty()).map(str::to_string),
        };
        self
    }

    pub fn shared_config(&self) -> Option<ConfigId> {
        match &self.config {
            StepConfig::Shared { config, .. } => Some(*config),
            StepConfig::Owned(_) => None,
        }
    }

    /// The owned layer, for setup-time edits.
    pub fn config_mut(&mut self) -> Result<&mut ConfigLayer> {
        match &mut self.config {
            StepConfig::Owned(layer) => Ok(layer),
            StepConfig::Shared { .. } => {
                Err(ConfigError::SharedReadOnly(self.subdir.clone()).into())
            }
        }
    }

    /// True while the owned layer has never been written to.
    pub(crate) fn has_blank_config(&self) -> bool {
        match &self.config {
            StepConfig::Owned(layer) => {
                layer.sources().is_empty() && layer.section_names().next().is_none()
            }
            StepConfig::Shared { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct Noop;

    impl StepRunner for Noop {
        fn run(&self, _ctx: &RunContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn step_paths_and_default_config_file() {
        let step = Step::new("planar/drying_slope/1km", "init", Noop);
        assert_eq!(step.subdir(), "planar/drying_slope/1km/init");
        assert_eq!(step.name(), "init");
        match step.config() {
            StepConfig::Owned(layer) => {
                assert_eq!(layer.filepath(), "planar/drying_slope/1km/init/init.cfg")
            }
            other => panic!("unexpected config {other:?}"),
        }
        assert!(step.has_blank_config());
    }

    #[test]
    fn redeclaring_an_input_or_output_replaces_it() {
        let mut step = Step::at("a/forward", Noop);
        step.add_input_from_path("init.nc", "../init/initial_state.nc")
            .add_input_from_path("init.nc", "../other/initial_state.nc")
            .add_output_file("output.nc", &[])
            .add_output_file("output.nc", &["temperature"]);
        assert_eq!(step.inputs().len(), 1);
        assert_eq!(
            step.inputs()[0].source,
            InputSource::Path("../other/initial_state.nc".to_string())
        );
        assert_eq!(step.outputs()[0].validate_vars, ["temperature"]);
    }

    #[test]
    fn shared_config_is_read_only_through_the_step() {
        let mut step = Step::at("a/init", Noop);
        step.config_mut().unwrap().set("x", "y", 1);
        step.set_shared_config(ConfigId(0), Some("a.cfg"));
        let err = step.config_mut().unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::SharedReadOnly(_))));

        step.set_shared_config(ConfigId(0), Some(""));
        assert_eq!(
            step.config(),
            &StepConfig::Shared {
                config: ConfigId(0),
                link: None
            }
        );
    }
}
