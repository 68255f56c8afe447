//! Assembly configuration schema and structural validation
//!
//! A config maps zone names (directories under the sandbox root) to ordered
//! lists of assembly rules. Validation here is purely structural; path safety
//! is the staging engine's job and happens before any filesystem mutation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Reserved top-level key carrying the document-wide default assembly flag.
pub const DEFAULT_MODE_KEY: &str = "defaultAssembly";

/// Rule fields accepted by the validator. Anything else is config drift.
const ALLOWED_FIELDS: &[&str] = &["output", "outputPath", "components", "componentPath", "assembly"];

/// Structural validation failure. Fail-fast: the first offending zone or
/// field is reported, not an accumulated list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config must be a JSON object")]
    NotAnObject,

    #[error("'defaultAssembly' must be a boolean")]
    BadDefaultMode,

    #[error("zone '{zone}' must be an array of rules")]
    ZoneNotArray { zone: String },

    #[error("zone '{zone}': rule {index} must be an object")]
    RuleNotObject { zone: String, index: usize },

    #[error("zone '{zone}': missing or invalid 'output' in rule {index}")]
    BadOutput { zone: String, index: usize },

    #[error("zone '{zone}': 'components' must be an array of strings for '{output}'")]
    BadComponents { zone: String, output: String },

    #[error("zone '{zone}': '{field}' must be a {expected} for '{output}'")]
    BadField {
        zone: String,
        output: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("zone '{zone}': unknown fields in '{output}': {fields}")]
    UnknownFields {
        zone: String,
        output: String,
        fields: String,
    },
}

/// How a rule's output file is produced from its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyMode {
    /// Copy a single component's bytes verbatim.
    Copy,
    /// Join all components with single newlines, in listed order.
    Concatenate,
}

/// One output file within a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyRule {
    /// Relative file path within the zone (may contain subdirectories).
    pub output: String,
    /// Optional subdirectory of the zone the output lands in
    /// (JSON field `outputPath`).
    pub output_dir: Option<String>,
    /// Ordered component file names. Empty means "create an empty file".
    pub components: Vec<String>,
    /// Optional subdirectory under the components root
    /// (JSON field `componentPath`).
    pub component_dir: Option<String>,
    /// Per-rule assembly flag (JSON field `assembly`); overrides the
    /// document default.
    pub assemble: Option<bool>,
}

impl AssemblyRule {
    /// Resolve the effective mode: rule flag, else document default, else
    /// inferred from component count (one component copies, more
    /// concatenate).
    pub fn mode(&self, doc_default: Option<bool>) -> AssemblyMode {
        match self.assemble.or(doc_default) {
            Some(true) => AssemblyMode::Concatenate,
            Some(false) => AssemblyMode::Copy,
            None if self.components.len() > 1 => AssemblyMode::Concatenate,
            None => AssemblyMode::Copy,
        }
    }
}

/// A validated assembly configuration. Immutable once loaded; staging only
/// interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Document-level default for rules that omit their own flag.
    pub default_assemble: Option<bool>,
    /// Zone name to ordered rules, in stable order.
    pub zones: BTreeMap<String, Vec<AssemblyRule>>,
}

impl AssemblyConfig {
    /// Validate a parsed JSON document and convert it into typed form.
    pub fn from_value(doc: &Value) -> Result<Self, ConfigError> {
        let root = doc.as_object().ok_or(ConfigError::NotAnObject)?;

        let default_assemble = match root.get(DEFAULT_MODE_KEY) {
            None => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => return Err(ConfigError::BadDefaultMode),
        };

        let mut zones = BTreeMap::new();
        for (zone, value) in root {
            if zone == DEFAULT_MODE_KEY {
                continue;
            }

            let items = value.as_array().ok_or_else(|| ConfigError::ZoneNotArray {
                zone: zone.clone(),
            })?;

            let mut rules = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                rules.push(Self::validate_rule(zone, index, item)?);
            }
            zones.insert(zone.clone(), rules);
        }

        Ok(Self {
            default_assemble,
            zones,
        })
    }

    fn validate_rule(zone: &str, index: usize, item: &Value) -> Result<AssemblyRule, ConfigError> {
        let obj = item.as_object().ok_or_else(|| ConfigError::RuleNotObject {
            zone: zone.to_string(),
            index,
        })?;

        let output = match obj.get("output").and_then(Value::as_str) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                return Err(ConfigError::BadOutput {
                    zone: zone.to_string(),
                    index,
                })
            }
        };

        let components = obj
            .get("components")
            .and_then(Value::as_array)
            .ok_or_else(|| ConfigError::BadComponents {
                zone: zone.to_string(),
                output: output.clone(),
            })?
            .iter()
            .map(|c| {
                c.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ConfigError::BadComponents {
                        zone: zone.to_string(),
                        output: output.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output_dir = Self::optional_string(zone, &output, obj, "outputPath")?;
        let component_dir = Self::optional_string(zone, &output, obj, "componentPath")?;

        let assemble = match obj.get("assembly") {
            None => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => {
                return Err(ConfigError::BadField {
                    zone: zone.to_string(),
                    output,
                    field: "assembly",
                    expected: "boolean",
                })
            }
        };

        let unknown: Vec<&str> = obj
            .keys()
            .map(String::as_str)
            .filter(|k| !ALLOWED_FIELDS.contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::UnknownFields {
                zone: zone.to_string(),
                output,
                fields: unknown.join(", "),
            });
        }

        Ok(AssemblyRule {
            output,
            output_dir,
            components,
            component_dir,
            assemble,
        })
    }

    fn optional_string(
        zone: &str,
        output: &str,
        obj: &serde_json::Map<String, Value>,
        field: &'static str,
    ) -> Result<Option<String>, ConfigError> {
        match obj.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ConfigError::BadField {
                zone: zone.to_string(),
                output: output.to_string(),
                field,
                expected: "string",
            }),
        }
    }

    /// Zone names in stable order.
    pub fn zone_names(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_config() {
        let doc = json!({
            "defaultAssembly": true,
            "levels": [
                { "output": "world.js", "components": ["base.js", "extra.js"] },
                { "output": "empty.txt", "components": [] }
            ],
            "scripts": [
                {
                    "output": "run.js",
                    "outputPath": "bin",
                    "components": ["run.js"],
                    "componentPath": "runners",
                    "assembly": false
                }
            ]
        });

        let config = AssemblyConfig::from_value(&doc).unwrap();
        assert_eq!(config.default_assemble, Some(true));
        assert_eq!(config.zones.len(), 2);
        assert_eq!(config.zones["levels"].len(), 2);

        let rule = &config.zones["scripts"][0];
        assert_eq!(rule.output_dir.as_deref(), Some("bin"));
        assert_eq!(rule.component_dir.as_deref(), Some("runners"));
        assert_eq!(rule.assemble, Some(false));
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(
            AssemblyConfig::from_value(&json!([1, 2])),
            Err(ConfigError::NotAnObject)
        );
        assert_eq!(
            AssemblyConfig::from_value(&Value::Null),
            Err(ConfigError::NotAnObject)
        );
    }

    #[test]
    fn test_zone_must_be_array() {
        let err = AssemblyConfig::from_value(&json!({ "zone": {} })).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZoneNotArray {
                zone: "zone".to_string()
            }
        );
        assert!(err.to_string().contains("zone"));
    }

    #[test]
    fn test_missing_output_rejected() {
        let doc = json!({ "zone": [ { "components": [] } ] });
        assert_eq!(
            AssemblyConfig::from_value(&doc),
            Err(ConfigError::BadOutput {
                zone: "zone".to_string(),
                index: 0
            })
        );
    }

    #[test]
    fn test_empty_output_rejected() {
        let doc = json!({ "zone": [ { "output": "", "components": [] } ] });
        assert!(AssemblyConfig::from_value(&doc).is_err());
    }

    #[test]
    fn test_missing_components_rejected() {
        let doc = json!({ "zone": [ { "output": "f.js" } ] });
        assert_eq!(
            AssemblyConfig::from_value(&doc),
            Err(ConfigError::BadComponents {
                zone: "zone".to_string(),
                output: "f.js".to_string()
            })
        );
    }

    #[test]
    fn test_non_string_component_rejected() {
        let doc = json!({ "zone": [ { "output": "f.js", "components": ["a.js", 3] } ] });
        assert!(AssemblyConfig::from_value(&doc).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let doc = json!({
            "zone": [ { "output": "f.js", "components": [], "mode": "fast" } ]
        });
        let err = AssemblyConfig::from_value(&doc).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownFields {
                zone: "zone".to_string(),
                output: "f.js".to_string(),
                fields: "mode".to_string()
            }
        );
    }

    #[test]
    fn test_bad_default_mode_rejected() {
        let doc = json!({ "defaultAssembly": "yes", "zone": [] });
        assert_eq!(
            AssemblyConfig::from_value(&doc),
            Err(ConfigError::BadDefaultMode)
        );
    }

    #[test]
    fn test_bad_optional_field_types() {
        let doc = json!({ "zone": [ { "output": "f.js", "components": [], "componentPath": 1 } ] });
        assert!(AssemblyConfig::from_value(&doc).is_err());

        let doc = json!({ "zone": [ { "output": "f.js", "components": [], "assembly": "true" } ] });
        assert!(AssemblyConfig::from_value(&doc).is_err());
    }

    #[test]
    fn test_mode_resolution_precedence() {
        let rule = AssemblyRule {
            output: "f.js".to_string(),
            output_dir: None,
            components: vec!["a".to_string()],
            component_dir: None,
            assemble: Some(true),
        };
        // Rule flag beats document default.
        assert_eq!(rule.mode(Some(false)), AssemblyMode::Concatenate);

        let rule = AssemblyRule {
            assemble: None,
            ..rule
        };
        assert_eq!(rule.mode(Some(true)), AssemblyMode::Concatenate);
        assert_eq!(rule.mode(Some(false)), AssemblyMode::Copy);

        // No flags anywhere: inferred from component count.
        assert_eq!(rule.mode(None), AssemblyMode::Copy);
        let many = AssemblyRule {
            components: vec!["a".to_string(), "b".to_string()],
            ..rule
        };
        assert_eq!(many.mode(None), AssemblyMode::Concatenate);
    }

    #[test]
    fn test_reserved_key_is_not_a_zone() {
        let doc = json!({ "defaultAssembly": false, "zone": [] });
        let config = AssemblyConfig::from_value(&doc).unwrap();
        assert_eq!(config.zone_names().collect::<Vec<_>>(), vec!["zone"]);
    }
}
