//! YAML configuration loader with environment variable support
//!
//! Strings of the form `${ENV_VAR}` or `${ENV_VAR:default}` are expanded
//! from the process environment before deserialization.

use std::env;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_yaml::Value as YamlValue;

use crate::{Result, RuntimeError};

/// Load and parse a YAML file with variables expanded.
pub fn load_yaml_file<P: AsRef<Path>>(path: P) -> Result<YamlValue> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        RuntimeError::Config(format!("failed to read YAML file {path:?}: {e}"))
    })?;

    let mut value: YamlValue = serde_yaml::from_str(&content).map_err(|e| {
        RuntimeError::Config(format!("failed to parse YAML file {path:?}: {e}"))
    })?;

    expand_variables(&mut value);
    Ok(value)
}

/// Load and deserialize a YAML file into a configuration type.
pub fn load_yaml_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let yaml = load_yaml_file(path)?;
    serde_yaml::from_value(yaml)
        .map_err(|e| RuntimeError::Config(format!("failed to deserialize configuration: {e}")))
}

/// Expand `${ENV_VAR:default}` in every string value.
fn expand_variables(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

/// Expand environment references in one string; returns None when nothing
/// changed.
fn expand_env_in_string(input: &str) -> Option<String> {
    if !input.contains("${") {
        return None;
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    let mut changed = false;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated reference; keep it verbatim.
            result.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let spec = &after[..end];
        let (name, default) = match spec.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (spec, None),
        };
        match env::var(name) {
            Ok(val) => result.push_str(&val),
            Err(_) => result.push_str(default.unwrap_or("")),
        }
        changed = true;
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    changed.then_some(result)
}
