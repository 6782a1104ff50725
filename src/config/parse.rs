use super::{ConfigValue, Sections};
use crate::error::{ConfigError, Result};
use indexmap::IndexMap;

/// Parse INI text into ordered sections.
///
/// Values stay as strings; typed getters coerce on read. Indented lines
/// continue the previous option's value.
pub(super) fn parse_cfg(source_name: &str, text: &str) -> Result<Sections> {
    let mut sections: Sections = IndexMap::new();
    let mut current_section: Option<String> = None;
    let mut current_option: Option<String> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let indented = raw_line.starts_with(' ') || raw_line.starts_with('\t');
        if indented {
            if let (Some(section), Some(option)) = (&current_section, &current_option) {
                if let Some(ConfigValue::Str(value)) = sections
                    .get_mut(section)
                    .and_then(|options| options.get_mut(option))
                {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(trimmed);
                    continue;
                }
            }
        }

        if let Some(rest) = trimmed.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| parse_error(source_name, line_no, "malformed section header"))?;
            sections.entry(name.to_string()).or_default();
            current_section = Some(name.to_string());
            current_option = None;
            continue;
        }

        let Some(section) = current_section.as_ref() else {
            return Err(parse_error(source_name, line_no, "option outside of a section"));
        };
        let split_at = trimmed
            .find(['=', ':'])
            .ok_or_else(|| parse_error(source_name, line_no, "expected `option = value`"))?;
        let option = trimmed[..split_at].trim();
        if option.is_empty() {
            return Err(parse_error(source_name, line_no, "empty option name"));
        }
        let value = trimmed[split_at + 1..].trim();
        sections
            .entry(section.clone())
            .or_default()
            .insert(option.to_string(), ConfigValue::Str(value.to_string()));
        current_option = Some(option.to_string());
    }

    Ok(sections)
}

fn parse_error(source_name: &str, line: usize, message: &str) -> crate::error::Error {
    ConfigError::Parse {
        source_name: source_name.to_string(),
        line,
        message: message.to_string(),
    }
    .into()
}
