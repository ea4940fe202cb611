//! Configuration loading: JSON file to typed [`AppConfig`], with unknown
//! keys logged and ignored so newer config files keep working on older
//! builds.

use serde_json::Value;
use std::path::Path;
use tracing::warn;

use kf_types::{AppConfig, KfResult};

/// Load, diff for unknown keys, and validate a configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> KfResult<AppConfig> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    parse_config(&raw)
}

/// Same as [`load_config`] for an in-memory JSON document.
pub fn parse_config(raw: &str) -> KfResult<AppConfig> {
    let value: Value = serde_json::from_str(raw)?;
    let config: AppConfig = serde_json::from_value(value.clone())?;

    // Serialize the typed config back and diff the key sets; anything the
    // struct did not pick up is unknown and gets logged.
    let known = serde_json::to_value(&config)?;
    let mut unknown = Vec::new();
    collect_unknown_keys("", &value, &known, &mut unknown);
    for key in &unknown {
        warn!(key = key.as_str(), "unknown configuration key ignored");
    }

    config.validate()?;
    Ok(config)
}

fn collect_unknown_keys(prefix: &str, input: &Value, known: &Value, out: &mut Vec<String>) {
    let (Value::Object(input_map), Value::Object(known_map)) = (input, known) else {
        return;
    };
    for (key, child) in input_map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match known_map.get(key) {
            None => out.push(path),
            Some(known_child) => collect_unknown_keys(&path, child, known_child, out),
        }
    }
}
