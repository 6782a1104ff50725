//! Layered INI-style configuration.
//!
//! A `ConfigLayer` is built by merging packaged defaults, direct overrides,
//! and user files in call order. Later merges win for matching
//! (section, option) pairs; everything else is additive. Rendering is
//! deterministic so the same merge sequence always yields the same bytes.
mod package;
mod parse;

use package::lookup_packaged;

use crate::error::{ConfigError, Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;

type Sections = IndexMap<String, IndexMap<String, ConfigValue>>;

/// A typed scalar option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(true) => f.write_str("True"),
            ConfigValue::Bool(false) => f.write_str("False"),
            ConfigValue::Int(value) => write!(f, "{value}"),
            ConfigValue::Float(value) => write!(f, "{value:?}"),
            ConfigValue::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Int(i64::from(value))
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

/// Ordered, mergeable configuration store with named sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    filepath: String,
    sections: Sections,
    sources: Vec<String>,
}

impl ConfigLayer {
    /// Create an empty layer whose canonical file lives at `filepath`
    /// (relative to the work root).
    pub fn new(filepath: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            sections: IndexMap::new(),
            sources: Vec::new(),
        }
    }

    pub fn filepath(&self) -> &str {
        &self.filepath
    }

    /// Sources merged into this layer, in merge order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Merge a packaged default file embedded in the binary.
    pub fn add_from_package(&mut self, package: &str, resource: &str) -> Result<()> {
        let text = lookup_packaged(package, resource).ok_or_else(|| {
            ConfigError::UnknownResource {
                package: package.to_string(),
                resource: resource.to_string(),
            }
        })?;
        self.add_from_str(&format!("{package}/{resource}"), text)
    }

    /// Merge a config file from disk.
    pub fn add_from_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        self.add_from_str(&path.display().to_string(), &text)
    }

    /// Parse `text` and merge it on top of the current contents.
    pub fn add_from_str(&mut self, source_name: &str, text: &str) -> Result<()> {
        let parsed = parse::parse_cfg(source_name, text)?;
        self.merge_sections(parsed);
        self.sources.push(source_name.to_string());
        Ok(())
    }

    /// Merge another layer on top of this one.
    pub fn merge(&mut self, other: &ConfigLayer) {
        self.merge_sections(other.sections.clone());
        self.sources.extend(other.sources.iter().cloned());
    }

    /// Replace all options with the contents of `text`, keeping the filepath.
    ///
    /// Used when a canonical config file edited after setup is read back.
    pub fn reload_from_str(&mut self, source_name: &str, text: &str) -> Result<()> {
        let parsed = parse::parse_cfg(source_name, text)?;
        self.sections = parsed;
        self.sources = vec![source_name.to_string()];
        Ok(())
    }

    /// Direct override of a single option.
    pub fn set(&mut self, section: &str, option: &str, value: impl Into<ConfigValue>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(option.to_string(), value.into());
    }

    pub fn has_option(&self, section: &str, option: &str) -> bool {
        self.sections
            .get(section)
            .is_some_and(|options| options.contains_key(option))
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Borrow a section for repeated typed reads.
    pub fn section<'a>(&'a self, name: &'a str) -> Section<'a> {
        Section { layer: self, name }
    }

    pub fn value(&self, section: &str, option: &str) -> Result<&ConfigValue> {
        self.sections
            .get(section)
            .and_then(|options| options.get(option))
            .ok_or_else(|| {
                ConfigError::MissingOption {
                    section: section.to_string(),
                    option: option.to_string(),
                }
                .into()
            })
    }

    pub fn get(&self, section: &str, option: &str) -> Result<String> {
        Ok(self.value(section, option)?.to_string())
    }

    pub fn getint(&self, section: &str, option: &str) -> Result<i64> {
        let value = self.value(section, option)?;
        let parsed = match value {
            ConfigValue::Int(value) => Some(*value),
            ConfigValue::Float(value) if value.fract() == 0.0 && in_i64_range(*value) => {
                Some(*value as i64)
            }
            ConfigValue::Str(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| invalid(section, option, value, "integer"))
    }

    pub fn getfloat(&self, section: &str, option: &str) -> Result<f64> {
        let value = self.value(section, option)?;
        let parsed = match value {
            ConfigValue::Float(value) => Some(*value),
            ConfigValue::Int(value) => Some(*value as f64),
            ConfigValue::Str(text) => text.trim().parse::<f64>().ok(),
            ConfigValue::Bool(_) => None,
        };
        parsed.ok_or_else(|| invalid(section, option, value, "float"))
    }

    pub fn getbool(&self, section: &str, option: &str) -> Result<bool> {
        let value = self.value(section, option)?;
        let parsed = match value {
            ConfigValue::Bool(value) => Some(*value),
            ConfigValue::Int(0) => Some(false),
            ConfigValue::Int(1) => Some(true),
            ConfigValue::Str(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed.ok_or_else(|| invalid(section, option, value, "boolean"))
    }

    /// Read a comma- or whitespace-separated list of words, optionally in
    /// brackets.
    pub fn getlist_str(&self, section: &str, option: &str) -> Result<Vec<String>> {
        Ok(split_list(&self.value(section, option)?.to_string()))
    }

    pub fn getlist_float(&self, section: &str, option: &str) -> Result<Vec<f64>> {
        let value = self.value(section, option)?;
        split_list(&value.to_string())
            .iter()
            .map(|item| {
                item.parse::<f64>()
                    .map_err(|_| invalid(section, option, value, "list of floats"))
            })
            .collect()
    }

    /// Render the resolved options as INI text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, (section, options)) in self.sections.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            out.push_str(&format!("[{section}]\n"));
            for (option, value) in options {
                let text = value.to_string();
                if text.is_empty() {
                    out.push_str(&format!("{option} =\n"));
                } else {
                    out.push_str(&format!("{option} = {text}\n"));
                }
            }
        }
        out
    }

    /// sha256 of the rendered config.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.render().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn merge_sections(&mut self, sections: Sections) {
        for (section, options) in sections {
            let target = self.sections.entry(section).or_default();
            for (option, value) in options {
                target.insert(option, value);
            }
        }
    }
}

/// A borrowed view of one section, mirroring `config['section'].getfloat(..)`.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    layer: &'a ConfigLayer,
    name: &'a str,
}

impl Section<'_> {
    pub fn get(&self, option: &str) -> Result<String> {
        self.layer.get(self.name, option)
    }

    pub fn getint(&self, option: &str) -> Result<i64> {
        self.layer.getint(self.name, option)
    }

    pub fn getfloat(&self, option: &str) -> Result<f64> {
        self.layer.getfloat(self.name, option)
    }

    pub fn getbool(&self, option: &str) -> Result<bool> {
        self.layer.getbool(self.name, option)
    }
}

fn invalid(section: &str, option: &str, value: &ConfigValue, expected: &'static str) -> Error {
    ConfigError::InvalidValue {
        section: section.to_string(),
        option: option.to_string(),
        value: value.to_string(),
        expected,
    }
    .into()
}

/// Whole floats in `[-2^63, 2^63)` convert to `i64` without saturating.
fn in_i64_range(value: f64) -> bool {
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    (-BOUND..BOUND).contains(&value)
}

fn split_list(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
