//! Template interpolation of `{{dotted.path}}` placeholders against state

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::domain::execution::WorkflowState;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_$][A-Za-z0-9_$.\-]*)\s*\}\}").unwrap());

/// Resolve every `{{dotted.path}}` placeholder in a template value
///
/// The result has the same shape as the template: objects and arrays are
/// walked recursively, non-string leaves pass through unchanged. A string
/// that consists of exactly one placeholder takes the type of the resolved
/// value; placeholders embedded in longer strings stringify. Missing paths
/// leave the literal placeholder in place (fail-open) so partial state
/// never aborts interpolation; callers validate required fields separately.
pub fn interpolate(template: &Value, state: &WorkflowState) -> Value {
    match template {
        Value::String(s) => interpolate_string(s, state),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, state)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, state)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate_string(template: &str, state: &WorkflowState) -> Value {
    // whole-placeholder strings keep the resolved value's JSON type
    if let Some(captures) = PLACEHOLDER.captures(template) {
        let whole = captures.get(0).map(|m| m.as_str()) == Some(template.trim());
        if whole && template.trim() == template {
            if let Some(value) = lookup(&captures[1], state) {
                return value.clone();
            }
            return Value::String(template.to_string());
        }
    }

    let replaced = PLACEHOLDER.replace_all(template, |captures: &regex::Captures<'_>| {
        match lookup(&captures[1], state) {
            Some(value) => stringify(value),
            // missing path: keep the placeholder verbatim
            None => captures[0].to_string(),
        }
    });

    Value::String(replaced.into_owned())
}

fn lookup<'a>(path: &str, state: &'a WorkflowState) -> Option<&'a Value> {
    // tolerate an explicit `state.` prefix in authored templates
    let path = path.strip_prefix("state.").unwrap_or(path);
    state.get_path(path)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
