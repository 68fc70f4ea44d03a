//! Package configuration against its declared schema.
//!
//! Values are checked type first, then range, then enumeration. Integer
//! range limits apply the same way to native integers and to fractional-free
//! numbers. Nested arrays and objects are checked recursively with qualified
//! keys (`list[1]`, `limits.daily`).

use std::collections::BTreeMap;

use sealpkg_protocol::{ConfigError, ConfigFieldSchema, ConfigMap, ConfigType, ConfigValue};
use tracing::debug;

pub type SchemaMap = BTreeMap<String, ConfigFieldSchema>;

pub fn validate_value(
    key: &str,
    value: &ConfigValue,
    schema: &ConfigFieldSchema,
) -> Result<(), ConfigError> {
    let Some(expected) = schema.config_type() else {
        return Err(ConfigError::UnsupportedType {
            key: key.to_owned(),
            declared: schema.kind.clone(),
        });
    };
    let mismatch = || ConfigError::TypeMismatch {
        key: key.to_owned(),
        expected,
        actual: value.type_name().to_owned(),
    };

    match (expected, value) {
        (ConfigType::String, ConfigValue::String(_))
        | (ConfigType::Boolean, ConfigValue::Boolean(_)) => {}
        (ConfigType::Integer, ConfigValue::Integer(number)) => {
            check_range(key, *number as f64, schema)?;
        }
        (ConfigType::Integer, ConfigValue::Number(number)) => {
            if !number.is_finite() || number.fract() != 0.0 {
                return Err(mismatch());
            }
            check_range(key, *number, schema)?;
        }
        (ConfigType::Number, ConfigValue::Integer(_) | ConfigValue::Number(_)) => {
            if let Some(number) = value.as_f64() {
                check_range(key, number, schema)?;
            }
        }
        (ConfigType::Array, ConfigValue::Array(elements)) => {
            if let Some(items) = &schema.items {
                for (index, element) in elements.iter().enumerate() {
                    validate_value(&format!("{key}[{index}]"), element, items)?;
                }
            }
        }
        (ConfigType::Object, ConfigValue::Object(fields)) => {
            for (name, field) in fields {
                if let Some(property) = schema.properties.get(name) {
                    validate_value(&format!("{key}.{name}"), field, property)?;
                }
            }
        }
        _ => return Err(mismatch()),
    }

    if !schema.enum_values.is_empty() && !schema.enum_values.contains(value) {
        return Err(ConfigError::NotInEnum {
            key: key.to_owned(),
            value: value.to_string(),
        });
    }

    Ok(())
}

fn check_range(key: &str, value: f64, schema: &ConfigFieldSchema) -> Result<(), ConfigError> {
    if let Some(min) = schema.min
        && value < min
    {
        return Err(ConfigError::BelowMinimum {
            key: key.to_owned(),
            value,
            min,
        });
    }
    if let Some(max) = schema.max
        && value > max
    {
        return Err(ConfigError::AboveMaximum {
            key: key.to_owned(),
            value,
            max,
        });
    }
    Ok(())
}

/// Validate every key that has a schema, stopping at the first failure.
/// Keys without a schema pass through unchecked.
pub fn validate_config(config: &ConfigMap, schemas: &SchemaMap) -> Result<(), ConfigError> {
    for (key, value) in config {
        let Some(schema) = schemas.get(key) else {
            continue;
        };
        if let Err(error) = validate_value(key, value, schema) {
            debug!(%key, %error, "config rejected");
            return Err(error);
        }
    }
    Ok(())
}

/// Every declared default.
pub fn init_defaults(schemas: &SchemaMap) -> ConfigMap {
    schemas
        .iter()
        .filter_map(|(key, schema)| {
            schema
                .default
                .as_ref()
                .map(|value| (key.clone(), value.clone()))
        })
        .collect()
}

/// Shallow merge: keys in `overrides` replace those in `base`.
pub fn merge_override(base: &ConfigMap, overrides: &ConfigMap) -> ConfigMap {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Defaults first, then the caller's values on top.
pub fn with_defaults(config: &ConfigMap, schemas: &SchemaMap) -> ConfigMap {
    merge_override(&init_defaults(schemas), config)
}
