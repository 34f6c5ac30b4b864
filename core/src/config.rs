// -----------------------------------------------------------------------------
// Rust SECoP playground
//
// This program is free software; you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation; either version 2 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program; if not, write to the Free Software Foundation, Inc.,
// 59 Temple Place, Suite 330, Boston, MA  02111-1307  USA
//
// Module authors:
//   Georg Brandl <g.brandl@fz-juelich.de>
//
// -----------------------------------------------------------------------------
//
//! Server configuration, loaded from TOML.

use std::collections::HashMap;
use std::path::Path;

use serde_derive::Deserialize;

use crate::accessible::Visibility;
use crate::errors::{Error, Result};

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub description: String,
    #[serde(skip)]
    pub equipment_id: String,
    pub modules: Vec<ModuleConfig>,
}

/// Configuration for a single module instance.
///
/// Besides the fixed fields every module has (`name`, `class`,
/// `description`, `group`, `visibility`), a module config carries an
/// open-ended property table covering both:
///
/// - module-level bare properties (e.g. `pollinterval = 1.0`), and
/// - per-parameter properties in `paramname.propname` form (e.g.
///   `target.unit = "K"`, `target.datatype = "..."` to override the
///   datatype descriptor wholesale).
///
/// A bare, dot-prefixed key (`.propname`) is the legacy shorthand for
/// `value.propname`, kept for config files written against modules whose
/// only settable parameter used to be implicit.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_visibility_str")]
    pub visibility: String,
    #[serde(flatten)]
    pub properties: HashMap<String, toml::Value>,
}

fn default_visibility_str() -> String { "user".into() }

/// A single parameter's config, split out from `ModuleConfig::properties`
/// by `Instance::new` while ingesting config (see module.rs).
#[derive(Debug, Clone, Default)]
pub struct ParamConfig {
    pub properties: HashMap<String, toml::Value>,
}

impl ModuleConfig {
    pub fn visibility(&self) -> Result<Visibility> {
        Visibility::parse(&self.visibility)
    }

    /// Split `properties` into module-level bare keys and per-parameter
    /// `paramname.propname` keys (legacy `.propname` maps to `value`).
    pub fn split_properties(&self) -> (HashMap<String, toml::Value>, HashMap<String, ParamConfig>) {
        let mut module_props = HashMap::new();
        let mut param_props: HashMap<String, ParamConfig> = HashMap::new();
        for (key, value) in &self.properties {
            if let Some(rest) = key.strip_prefix('.') {
                param_props.entry("value".to_string()).or_default()
                    .properties.insert(rest.to_string(), value.clone());
            } else if let Some((param, prop)) = key.split_once('.') {
                param_props.entry(param.to_string()).or_default()
                    .properties.insert(prop.to_string(), value.clone());
            } else {
                module_props.insert(key.clone(), value.clone());
            }
        }
        (module_props, param_props)
    }
}

/// Load a server configuration from a TOML file. The equipment id is
/// derived from the file's stem, matching the teacher's convention.
pub fn load_config(filename: impl AsRef<Path>) -> Result<ServerConfig> {
    let filename = filename.as_ref();
    let data = std::fs::read(filename)?;
    let mut cfg: ServerConfig = toml::from_slice(&data)
        .map_err(|e| Error::config(format!("could not parse config: {}", e)))?;
    cfg.equipment_id = filename.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".into());

    let mut seen = std::collections::HashSet::new();
    for module in &cfg.modules {
        let lower = module.name.to_lowercase();
        if !seen.insert(lower) {
            return Err(Error::config(format!("duplicate module name: {}", module.name)));
        }
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_dot_property_maps_to_value_param() {
        let mut props = HashMap::new();
        props.insert(".unit".to_string(), toml::Value::String("K".into()));
        props.insert("target.default".to_string(), toml::Value::Float(300.0));
        props.insert("pollinterval".to_string(), toml::Value::Float(1.0));
        let cfg = ModuleConfig {
            name: "cryo".into(), class: "SimCryo".into(), description: String::new(),
            group: None, visibility: "user".into(), properties: props,
        };
        let (module_props, param_props) = cfg.split_properties();
        assert!(module_props.contains_key("pollinterval"));
        assert!(param_props.get("value").unwrap().properties.contains_key("unit"));
        assert!(param_props.get("target").unwrap().properties.contains_key("default"));
    }
}
