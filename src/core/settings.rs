use crate::core::SettingsMap;
use serde_json::Value;

/// Profile values overlaid with caller values; the caller always wins.
pub fn merge(base: &SettingsMap, overrides: &SettingsMap) -> SettingsMap {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Drops nulls and blank strings, renders booleans as `"true"`/`"false"`.
/// Applying it to its own output changes nothing.
pub fn normalize(settings: &SettingsMap) -> SettingsMap {
    settings
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::Bool(b) => Some((key.clone(), Value::String(b.to_string()))),
            other => Some((key.clone(), other.clone())),
        })
        .collect()
}

pub fn resolve(profile_settings: &SettingsMap, overrides: &SettingsMap) -> SettingsMap {
    normalize(&merge(profile_settings, overrides))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultKind {
    /// Derived values the engine does not infer on its own.
    Safety,
    /// House print policy.
    Policy,
}

/// A value supplied for `key` only when nothing upstream set it.
#[derive(Debug, Clone, Copy)]
pub struct DefaultRule {
    pub key: &'static str,
    pub value: DefaultValue,
    pub kind: DefaultKind,
}

#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Int(i64),
    Text(&'static str),
}

impl DefaultValue {
    fn to_json(self) -> Value {
        match self {
            DefaultValue::Int(n) => Value::from(n),
            DefaultValue::Text(s) => Value::from(s),
        }
    }
}

pub const FIRST_LAYER_TEMPERATURE_KEY: &str = "material_print_temperature_layer_0";
pub const DEFAULT_FIRST_LAYER_TEMPERATURE: i64 = 200;

pub const DEFAULT_RULES: &[DefaultRule] = &[
    DefaultRule {
        key: "roofing_layer_count",
        value: DefaultValue::Int(0),
        kind: DefaultKind::Safety,
    },
    DefaultRule {
        key: "flooring_layer_count",
        value: DefaultValue::Int(0),
        kind: DefaultKind::Safety,
    },
    DefaultRule {
        key: "adhesion_type",
        value: DefaultValue::Text("none"),
        kind: DefaultKind::Policy,
    },
    DefaultRule {
        key: "skirt_line_count",
        value: DefaultValue::Int(0),
        kind: DefaultKind::Policy,
    },
    DefaultRule {
        key: "brim_line_count",
        value: DefaultValue::Int(0),
        kind: DefaultKind::Policy,
    },
    DefaultRule {
        key: "speed_travel",
        value: DefaultValue::Int(150),
        kind: DefaultKind::Policy,
    },
    DefaultRule {
        key: "speed_infill",
        value: DefaultValue::Int(80),
        kind: DefaultKind::Policy,
    },
    DefaultRule {
        key: FIRST_LAYER_TEMPERATURE_KEY,
        value: DefaultValue::Int(DEFAULT_FIRST_LAYER_TEMPERATURE),
        kind: DefaultKind::Policy,
    },
];

/// Appends every rule whose key is still missing, in rule order. Returns the
/// keys that were filled in.
pub fn apply_defaults(
    settings: &mut SettingsMap,
    rules: &[DefaultRule],
    include_policy: bool,
) -> Vec<&'static str> {
    let mut applied = Vec::new();
    for rule in rules {
        if rule.kind == DefaultKind::Policy && !include_policy {
            continue;
        }
        if !settings.contains_key(rule.key) {
            settings.insert(rule.key.to_string(), rule.value.to_json());
            applied.push(rule.key);
        }
    }
    applied
}

/// Integer value of `key`, accepting numbers or numeric strings (rounded).
/// Anything else, including non-finite numbers, yields `fallback`.
pub fn setting_as_int(settings: &SettingsMap, key: &str, fallback: i64) -> i64 {
    let number = match settings.get(key) {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => return i,
            None => n.as_f64(),
        },
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|f| f.is_finite())
        .map(|f| f.round() as i64)
        .unwrap_or(fallback)
}

pub fn first_layer_temperature(settings: &SettingsMap) -> i64 {
    setting_as_int(
        settings,
        FIRST_LAYER_TEMPERATURE_KEY,
        DEFAULT_FIRST_LAYER_TEMPERATURE,
    )
}
