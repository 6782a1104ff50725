//! Error taxonomy for setup and execution.
//!
//! Setup-phase variants abort before any step runs. Execution-phase variants
//! are attributed to a single step and recorded in the run report.
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by the component, config, and execution modules.
pub type Result<T> = std::result::Result<T, Error>;

/// Missing or malformed configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing config option [{section}] {option}")]
    MissingOption { section: String, option: String },

    #[error("invalid value for [{section}] {option}: {value:?} is not a valid {expected}")]
    InvalidValue {
        section: String,
        option: String,
        value: String,
        expected: &'static str,
    },

    #[error("parse error in {source_name} line {line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("unknown packaged config {package}/{resource}")]
    UnknownResource { package: String, resource: String },

    #[error("config for step {0} is shared; edit it through the owning component")]
    SharedReadOnly(String),
}

/// Post-condition failures on declared outputs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("declared output {artifact} was not produced")]
    MissingOutput { artifact: PathBuf },

    #[error("field {field:?} missing from {artifact}")]
    MissingField { artifact: PathBuf, field: String },

    #[error("field {field:?} in {artifact} is malformed: {reason}")]
    MalformedField {
        artifact: PathBuf,
        field: String,
        reason: String,
    },

    #[error("check failed for {artifact}: {message}")]
    Check { artifact: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("resource {target:?} not found in database {database:?}")]
    ResourceNotFound { database: String, target: String },

    #[error("a different step is already registered at {0}")]
    DuplicateStep(String),

    #[error("a different task is already registered at {0}")]
    DuplicateTask(String),

    #[error("no step registered at {0}")]
    StepNotFound(String),

    #[error("step factory for {expected} built a step at {actual}")]
    StepPathMismatch { expected: String, actual: String },

    #[error("step {consumer} reads {filename} from {producer}, which does not declare it")]
    UndeclaredOutput {
        consumer: String,
        producer: String,
        filename: String,
    },

    #[error("no task registered at {0}")]
    TaskNotFound(String),

    #[error("dependency cycle among steps: {}", .steps.join(", "))]
    DependencyCycle { steps: Vec<String> },

    #[error("input {filename} for step {step} is missing ({path})")]
    MissingInput {
        step: String,
        filename: String,
        path: PathBuf,
    },

    #[error("step {path} failed: {source}")]
    StepExecution {
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("compute error: {0}")]
    Compute(String),

    #[error("dataset error in {path}: {message}")]
    Dataset { path: PathBuf, message: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn compute(message: impl Into<String>) -> Self {
        Self::Compute(message.into())
    }

    pub fn dataset(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Dataset {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap a failure with the canonical path of the step that raised it.
    pub fn in_step(self, path: &str) -> Self {
        match self {
            Error::StepExecution { .. } => self,
            other => Error::StepExecution {
                path: path.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Stable label used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Validation(_) => "validation",
            Error::Precondition(_) => "precondition",
            Error::ResourceNotFound { .. } => "resource_not_found",
            Error::DuplicateStep(_) | Error::DuplicateTask(_) => "duplicate_registration",
            Error::StepNotFound(_) | Error::TaskNotFound(_) => "not_found",
            Error::StepPathMismatch { .. } => "path_mismatch",
            Error::UndeclaredOutput { .. } => "undeclared_output",
            Error::DependencyCycle { .. } => "dependency_cycle",
            Error::MissingInput { .. } => "missing_input",
            Error::StepExecution { source, .. } => source.kind(),
            Error::Compute(_) => "compute",
            Error::Dataset { .. } => "dataset",
            Error::Io { .. } => "io",
            Error::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_execution_reports_underlying_kind() {
        let err = Error::precondition("domain too short").in_step("planar/a/init");
        assert_eq!(err.kind(), "precondition");
        assert!(err.to_string().contains("planar/a/init"));
        let rewrapped = err.in_step("other");
        assert!(rewrapped.to_string().contains("planar/a/init"));
    }

    #[test]
    fn missing_field_names_field_and_artifact() {
        let err: Error = ValidationError::MissingField {
            artifact: PathBuf::from("work/init/initial_state.nc"),
            field: "temperature".to_string(),
        }
        .into();
        let message = err.to_string();
        assert!(message.contains("temperature"));
        assert!(message.contains("work/init/initial_state.nc"));
        assert_eq!(err.kind(), "validation");
    }
}
