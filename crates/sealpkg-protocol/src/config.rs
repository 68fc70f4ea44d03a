//! Package configuration: typed values, declared schemas, and validation errors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config key to value, ordered so that validation visits keys deterministically.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// A configuration value.
///
/// Decoding is untagged: `3` becomes `Integer`, `3.5` and `3.0` become
/// `Number`. Variant order matters for that inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Array(Vec<ConfigValue>),
    Object(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Boolean(_) => "boolean",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Number(_) => "number",
            ConfigValue::String(_) => "string",
            ConfigValue::Array(_) => "array",
            ConfigValue::Object(_) => "object",
        }
    }

    /// Numeric view of integer and number values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(value) => Some(*value as f64),
            ConfigValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Boolean(value) => write!(f, "{value}"),
            ConfigValue::Integer(value) => write!(f, "{value}"),
            ConfigValue::Number(value) => write!(f, "{value}"),
            ConfigValue::String(value) => write!(f, "{value:?}"),
            other => match serde_json::to_string(other) {
                Ok(rendered) => f.write_str(&rendered),
                Err(_) => f.write_str(other.type_name()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ConfigType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "string" => Some(ConfigType::String),
            "integer" => Some(ConfigType::Integer),
            "number" => Some(ConfigType::Number),
            "boolean" => Some(ConfigType::Boolean),
            "array" => Some(ConfigType::Array),
            "object" => Some(ConfigType::Object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::String => "string",
            ConfigType::Integer => "integer",
            ConfigType::Number => "number",
            ConfigType::Boolean => "boolean",
            ConfigType::Array => "array",
            ConfigType::Object => "object",
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of one config field as declared under `[config.<key>]`.
///
/// `type` is kept as the raw declared string so that a manifest with an
/// unknown type still decodes and can be reported by validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFieldSchema {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ConfigValue>,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ConfigFieldSchema>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ConfigFieldSchema>,
}

impl ConfigFieldSchema {
    pub fn of_type(kind: ConfigType) -> Self {
        Self {
            kind: kind.as_str().to_owned(),
            ..Self::default()
        }
    }

    /// The declared type, if it is one of the supported kinds.
    pub fn config_type(&self) -> Option<ConfigType> {
        ConfigType::parse(&self.kind)
    }
}

/// Why a config value was rejected. `key` is qualified (`list[2]`, `obj.field`).
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("config `{key}`: expected {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: ConfigType,
        actual: String,
    },
    #[error("config `{key}`: {value} is below the minimum {min}")]
    BelowMinimum { key: String, value: f64, min: f64 },
    #[error("config `{key}`: {value} is above the maximum {max}")]
    AboveMaximum { key: String, value: f64, max: f64 },
    #[error("config `{key}`: {value} is not one of the allowed values")]
    NotInEnum { key: String, value: String },
    #[error("config `{key}`: unsupported schema type `{declared}`")]
    UnsupportedType { key: String, declared: String },
}

impl ConfigError {
    pub fn key(&self) -> &str {
        match self {
            ConfigError::TypeMismatch { key, .. }
            | ConfigError::BelowMinimum { key, .. }
            | ConfigError::AboveMaximum { key, .. }
            | ConfigError::NotInEnum { key, .. }
            | ConfigError::UnsupportedType { key, .. } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_values_infer_integer_before_number() {
        let parsed: ConfigMap =
            serde_json::from_str(r#"{"a": 3, "b": 3.5, "c": 3.0, "d": true, "e": "x"}"#).unwrap();
        assert_eq!(parsed["a"], ConfigValue::Integer(3));
        assert_eq!(parsed["b"], ConfigValue::Number(3.5));
        assert_eq!(parsed["c"], ConfigValue::Number(3.0));
        assert_eq!(parsed["d"], ConfigValue::Boolean(true));
        assert_eq!(parsed["e"], ConfigValue::String("x".into()));
    }

    #[test]
    fn schema_keeps_unknown_type_string() {
        let schema: ConfigFieldSchema =
            serde_json::from_str(r#"{"type": "color", "default": "red"}"#).unwrap();
        assert_eq!(schema.kind, "color");
        assert_eq!(schema.config_type(), None);
    }

    #[test]
    fn config_error_exposes_qualified_key() {
        let error = ConfigError::BelowMinimum {
            key: "limits.level".into(),
            value: 0.0,
            min: 1.0,
        };
        assert_eq!(error.key(), "limits.level");
        assert!(error.to_string().contains("below the minimum"));
    }
}
