//! `{{variable}}` placeholder rendering for question prompts and effect parameters.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::flow::value::Bindings;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Replaces every `{{name}}` with the binding's string form. Unbound names render empty.
pub fn render(text: &str, bindings: &Bindings) -> String {
    placeholder()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            bindings
                .get(&caps[1])
                .map(|v| v.to_js_string())
                .unwrap_or_default()
        })
        .into_owned()
}

/// Renders every string inside a JSON value, recursing into arrays and objects.
pub fn render_value(value: &Value, bindings: &Bindings) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, bindings)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, bindings)).collect()),
        Value::Object(map) => Value::Object(render_map(map, bindings)),
        other => other.clone(),
    }
}

pub fn render_map(map: &Map<String, Value>, bindings: &Bindings) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), render_value(v, bindings)))
        .collect()
}

/// Names referenced by placeholders in `text`.
pub fn referenced_names(text: &str) -> Vec<String> {
    placeholder()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}
