//! Named multi-dimensional fields persisted per artifact file.
//!
//! Steps only rely on "write persists every variable" and "load returns an
//! object whose variables are readable by name". The builtin encoding is
//! JSON; filenames keep their scientific names (`initial_state.nc`, ...).
use crate::error::{Error, Result, ValidationError};
use crate::util::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const IN_MEMORY: &str = "<in-memory>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub dims: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub attrs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub dims: BTreeMap<String, usize>,
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dim(&mut self, name: &str, len: usize) {
        self.dims.insert(name.to_string(), len);
    }

    pub fn dim(&self, name: &str) -> Result<usize> {
        self.dims
            .get(name)
            .copied()
            .ok_or_else(|| Error::dataset(IN_MEMORY, format!("missing dimension {name}")))
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.attrs.insert(name.to_string(), value.into());
    }

    /// Insert or replace a variable; its length must match its dimensions.
    pub fn insert(&mut self, name: &str, dims: &[&str], values: Vec<f64>) -> Result<()> {
        let mut expected = 1usize;
        for dim in dims {
            expected *= self.dim(dim)?;
        }
        if expected != values.len() {
            return Err(Error::dataset(
                IN_MEMORY,
                format!(
                    "variable {name} has {} values but dimensions {dims:?} need {expected}",
                    values.len()
                ),
            ));
        }
        self.variables.insert(
            name.to_string(),
            Variable {
                dims: dims.iter().map(|dim| dim.to_string()).collect(),
                values,
            },
        );
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.variables.remove(name)
    }

    pub fn var(&self, name: &str) -> Result<&Variable> {
        self.variables
            .get(name)
            .ok_or_else(|| Error::dataset(IN_MEMORY, format!("missing variable {name}")))
    }

    pub fn values(&self, name: &str) -> Result<&[f64]> {
        Ok(&self.var(name)?.values)
    }

    /// Read a dataset back; every variable must fit its declared dimensions.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|err| Error::io(path, err))?;
        let ds: Dataset = serde_json::from_slice(&bytes)
            .map_err(|err| Error::dataset(path, format!("parse dataset: {err}")))?;
        for (name, variable) in &ds.variables {
            let expected = ds
                .expected_len(variable)
                .map_err(|message| Error::dataset(path, format!("variable {name}: {message}")))?;
            if expected != variable.values.len() {
                return Err(Error::dataset(
                    path,
                    format!(
                        "variable {name} has {} values but dimensions {:?} need {expected}",
                        variable.values.len(),
                        variable.dims
                    ),
                ));
            }
        }
        Ok(ds)
    }

    /// Number of values `variable` must hold given the declared dimensions.
    fn expected_len(&self, variable: &Variable) -> std::result::Result<usize, String> {
        let mut expected = 1usize;
        for dim in &variable.dims {
            let Some(len) = self.dims.get(dim) else {
                return Err(format!("undeclared dimension {dim}"));
            };
            expected *= len;
        }
        Ok(expected)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        for (name, variable) in &self.variables {
            if variable.values.iter().any(|value| !value.is_finite()) {
                return Err(Error::dataset(
                    path,
                    format!("variable {name} contains non-finite values"),
                ));
            }
        }
        let bytes = serde_json::to_vec(self)?;
        write_atomic(path, &bytes)
    }

    /// Check that `field` is present and consistent with its dimensions.
    pub fn check_field(
        &self,
        artifact: &Path,
        field: &str,
    ) -> std::result::Result<(), ValidationError> {
        let Some(variable) = self.variables.get(field) else {
            return Err(ValidationError::MissingField {
                artifact: artifact.to_path_buf(),
                field: field.to_string(),
            });
        };
        let malformed = |reason: String| ValidationError::MalformedField {
            artifact: artifact.to_path_buf(),
            field: field.to_string(),
            reason,
        };
        if variable.values.is_empty() {
            return Err(malformed("no values".to_string()));
        }
        let expected = self.expected_len(variable).map_err(malformed)?;
        if expected != variable.values.len() {
            return Err(malformed(format!(
                "{} values for dimensions of size {expected}",
                variable.values.len()
            )));
        }
        Ok(())
    }
}

/// Load `artifact` and check every name in `fields`.
pub fn validate_artifact(artifact: &Path, fields: &[String]) -> Result<()> {
    if !artifact.is_file() {
        return Err(ValidationError::MissingOutput {
            artifact: artifact.to_path_buf(),
        }
        .into());
    }
    if fields.is_empty() {
        return Ok(());
    }
    let dataset = Dataset::load(artifact).map_err(|err| ValidationError::Check {
        artifact: artifact.to_path_buf(),
        message: err.to_string(),
    })?;
    for field in fields {
        dataset.check_field(artifact, field)?;
    }
    Ok(())
}
