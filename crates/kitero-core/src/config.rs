//! Recursive defaults merge for the on-disk YAML configuration.

use serde_yaml::Value;

/// Recursively merges `overlay` on top of `default`, preferring
/// `overlay`'s scalars/sequences but merging mappings key by key.
///
/// A mapping key missing from `overlay` keeps the default's value; a
/// mapping key present in both is merged recursively if both sides are
/// mappings, otherwise the overlay's value wins outright.
pub fn merge(default: &Value, overlay: &Value) -> Value {
    match (default, overlay) {
        (Value::Mapping(d), Value::Mapping(o)) => {
            let mut result = d.clone();
            for (key, overlay_value) in o {
                match result.get(key) {
                    Some(default_value) => {
                        result.insert(key.clone(), merge(default_value, overlay_value));
                    }
                    None => {
                        result.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
            Value::Mapping(result)
        }
        (_, Value::Null) => default.clone(),
        _ => overlay.clone(),
    }
}

pub fn default_config() -> Value {
    serde_yaml::from_str(
        r#"
web:
  listen: 0.0.0.0
  port: 8187
  debug: false
  expire: 900
helper:
  listen: 127.0.0.1
  port: 18861
"#,
    )
    .expect("default configuration is valid YAML")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_defaults_not_overridden() {
        let overlay: Value = serde_yaml::from_str("helper:\n  port: 9999\n").unwrap();
        let merged = merge(&default_config(), &overlay);
        assert_eq!(merged["helper"]["port"], Value::from(9999));
        assert_eq!(merged["helper"]["listen"], Value::from("127.0.0.1"));
        assert_eq!(merged["web"]["port"], Value::from(8187));
    }

    #[test]
    fn merge_with_empty_overlay_is_identity() {
        let overlay = Value::Null;
        let merged = merge(&default_config(), &overlay);
        assert_eq!(merged, default_config());
    }
}
