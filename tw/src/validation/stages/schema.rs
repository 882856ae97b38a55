//! Stage 3: parameter validation against the tool's input schema
//!
//! Supports the JSON Schema draft-07 subset MCP servers actually use:
//! `type`, `properties`, `required`, `enum`, `pattern`. Misspelled
//! parameter names are fuzzy-renamed and mistyped scalars coerced; anything
//! else is an error (the stage is critical).

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{self, ToolCall};
use crate::mcp::ToolDescriptor;
use crate::validation::fuzzy::best_match_above;
use crate::validation::result::{Correction, CorrectionKind, StageOutcome};
use crate::validation::{CatalogProvider, ValidationSettings, Validator};

pub struct SchemaValidator {
    catalog: Arc<dyn CatalogProvider>,
    threshold: f64,
}

impl SchemaValidator {
    pub fn new(catalog: Arc<dyn CatalogProvider>, settings: &ValidationSettings) -> Self {
        Self {
            catalog,
            threshold: settings.similarity_threshold,
        }
    }

    fn find_descriptor<'a>(call: &ToolCall, catalog: &'a [ToolDescriptor]) -> Option<&'a ToolDescriptor> {
        let wire = domain::denormalize(&call.tool, &call.server);
        let short = domain::short_name(&call.tool, &call.server);
        catalog
            .iter()
            .find(|t| t.name == wire)
            .or_else(|| catalog.iter().find(|t| t.name == short))
    }
}

#[async_trait]
impl Validator for SchemaValidator {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn validate(&self, calls: &[ToolCall]) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        let mut corrected: Vec<ToolCall> = calls.to_vec();
        let mut changed = false;

        for (index, call) in calls.iter().enumerate() {
            let Some(catalog) = self.catalog.catalog(&call.server).await else {
                outcome
                    .warnings
                    .push(format!("call #{index}: unknown server '{}', schema not checked", call.server));
                continue;
            };
            let Some(descriptor) = Self::find_descriptor(call, &catalog) else {
                outcome
                    .warnings
                    .push(format!("call #{index}: {} not in catalog, schema not checked", call.tool));
                continue;
            };

            let mut params = call.parameters.clone();
            let param_changed = check_against_schema(
                &call.tool,
                &descriptor.input_schema,
                &mut params,
                self.threshold,
                &mut outcome,
            );
            if param_changed {
                corrected[index].parameters = params;
                changed = true;
            }
        }

        if changed && outcome.errors.is_empty() {
            outcome.corrected_calls = Some(corrected);
        }
        outcome
    }
}

/// Validate and possibly rewrite one parameter map. Returns true when the
/// map was modified.
fn check_against_schema(
    tool: &str,
    schema: &Value,
    params: &mut Map<String, Value>,
    threshold: f64,
    outcome: &mut StageOutcome,
) -> bool {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        // No declared properties: nothing to validate
        return false;
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut changed = false;

    // Fuzzy-rename unknown keys onto declared-but-absent properties
    let unknown_keys: Vec<String> = params
        .keys()
        .filter(|k| !properties.contains_key(*k))
        .cloned()
        .collect();
    for key in unknown_keys {
        let free_targets: Vec<&str> = properties
            .keys()
            .filter(|p| !params.contains_key(*p))
            .map(String::as_str)
            .collect();
        match best_match_above(&key, free_targets, threshold) {
            Some((target, score)) => {
                debug!(tool, from = %key, to = target, score, "schema: renaming parameter");
                let target = target.to_string();
                if let Some(value) = params.remove(&key) {
                    params.insert(target.clone(), value);
                }
                outcome.corrections.push(Correction {
                    kind: CorrectionKind::ParameterRenamed,
                    tool: tool.to_string(),
                    detail: format!("{key} -> {target}"),
                });
                changed = true;
            }
            None => {
                outcome.warnings.push(format!("{tool}: unknown parameter '{key}'"));
            }
        }
    }

    for name in required {
        if !params.contains_key(name) {
            outcome.errors.push(format!("{tool}: missing required parameter '{name}'"));
        }
    }

    // Type checks with coercion, then enum and pattern constraints
    let keys: Vec<String> = params.keys().cloned().collect();
    for key in keys {
        let Some(prop) = properties.get(&key) else { continue };
        let value = params.get(&key).cloned().unwrap_or(Value::Null);

        let value = match coerce_type(prop.get("type").and_then(Value::as_str), value) {
            CoerceResult::Unchanged(value) => value,
            CoerceResult::Coerced(value) => {
                outcome.corrections.push(Correction {
                    kind: CorrectionKind::TypeCoerced,
                    tool: tool.to_string(),
                    detail: format!("{key} coerced to {}", prop["type"].as_str().unwrap_or("?")),
                });
                params.insert(key.clone(), value.clone());
                changed = true;
                value
            }
            CoerceResult::Mismatch(value) => {
                outcome.errors.push(format!(
                    "{tool}: parameter '{key}' should be {} but is {}",
                    prop.get("type").and_then(Value::as_str).unwrap_or("?"),
                    json_type_name(&value),
                ));
                continue;
            }
        };

        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(&value) {
                outcome.errors.push(format!(
                    "{tool}: parameter '{key}' must be one of {}",
                    serde_json::to_string(allowed).unwrap_or_default()
                ));
                continue;
            }
        }

        if let (Some(pattern), Some(text)) = (prop.get("pattern").and_then(Value::as_str), value.as_str()) {
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(text) {
                        outcome
                            .errors
                            .push(format!("{tool}: parameter '{key}' does not match pattern {pattern}"));
                    }
                }
                Err(_) => {
                    outcome
                        .warnings
                        .push(format!("{tool}: unusable pattern on parameter '{key}'"));
                }
            }
        }
    }

    changed
}

enum CoerceResult {
    Unchanged(Value),
    Coerced(Value),
    Mismatch(Value),
}

/// Coerce scalars toward the declared type where the intent is unambiguous.
fn coerce_type(expected: Option<&str>, value: Value) -> CoerceResult {
    let Some(expected) = expected else {
        return CoerceResult::Unchanged(value);
    };

    match (expected, &value) {
        ("string", Value::String(_)) => CoerceResult::Unchanged(value),
        ("string", Value::Number(n)) => CoerceResult::Coerced(Value::String(n.to_string())),
        ("string", Value::Bool(b)) => CoerceResult::Coerced(Value::String(b.to_string())),

        ("integer", Value::Number(n)) if n.is_i64() || n.is_u64() => CoerceResult::Unchanged(value),
        ("integer", Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => CoerceResult::Coerced(Value::Number((f as i64).into())),
            _ => CoerceResult::Mismatch(value),
        },
        ("integer", Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(i) => CoerceResult::Coerced(Value::Number(i.into())),
            Err(_) => CoerceResult::Mismatch(value),
        },

        ("number", Value::Number(_)) => CoerceResult::Unchanged(value),
        ("number", Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) => serde_json::Number::from_f64(f)
                .map(|n| CoerceResult::Coerced(Value::Number(n)))
                .unwrap_or(CoerceResult::Mismatch(value)),
            Err(_) => CoerceResult::Mismatch(value),
        },

        ("boolean", Value::Bool(_)) => CoerceResult::Unchanged(value),
        ("boolean", Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" => CoerceResult::Coerced(Value::Bool(true)),
            "false" => CoerceResult::Coerced(Value::Bool(false)),
            _ => CoerceResult::Mismatch(value),
        },

        ("array", Value::Array(_)) => CoerceResult::Unchanged(value),
        ("object", Value::Object(_)) => CoerceResult::Unchanged(value),
        ("null", Value::Null) => CoerceResult::Unchanged(value),

        _ => CoerceResult::Mismatch(value),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::test_support::FixedCatalog;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(FixedCatalog::filesystem(), &ValidationSettings::default())
    }

    fn list_call(params: serde_json::Map<String, Value>) -> ToolCall {
        ToolCall::new("filesystem", "list_directory", params)
    }

    fn params(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_conforming_call_passes() {
        let outcome = validator()
            .validate(&[list_call(params(&[("path", json!("/tmp"))]))])
            .await;
        assert!(outcome.passed());
        assert!(outcome.corrections.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_rejected() {
        let outcome = validator().validate(&[list_call(params(&[]))]).await;
        assert!(!outcome.passed());
        assert!(outcome.errors[0].contains("missing required parameter 'path'"));
    }

    #[tokio::test]
    async fn test_misspelled_parameter_renamed() {
        let outcome = validator()
            .validate(&[list_call(params(&[("paths", json!("/tmp"))]))])
            .await;
        assert!(outcome.passed(), "errors: {:?}", outcome.errors);
        assert_eq!(outcome.corrections.len(), 1);
        assert_eq!(outcome.corrections[0].kind, CorrectionKind::ParameterRenamed);

        let corrected = outcome.corrected_calls.unwrap();
        assert_eq!(corrected[0].parameters.get("path").unwrap(), &json!("/tmp"));
        assert!(!corrected[0].parameters.contains_key("paths"));
    }

    #[tokio::test]
    async fn test_type_coercion_number_to_string() {
        let outcome = validator()
            .validate(&[list_call(params(&[("path", json!(42))]))])
            .await;
        assert!(outcome.passed());
        assert_eq!(outcome.corrections[0].kind, CorrectionKind::TypeCoerced);
        let corrected = outcome.corrected_calls.unwrap();
        assert_eq!(corrected[0].parameters.get("path").unwrap(), &json!("42"));
    }

    #[tokio::test]
    async fn test_type_coercion_string_to_integer() {
        let call = ToolCall::new(
            "filesystem",
            "read_file",
            params(&[("path", json!("/a")), ("limit", json!("10"))]),
        );
        let outcome = validator().validate(&[call]).await;
        assert!(outcome.passed());
        let corrected = outcome.corrected_calls.unwrap();
        assert_eq!(corrected[0].parameters.get("limit").unwrap(), &json!(10));
    }

    #[tokio::test]
    async fn test_uncoercible_type_rejected() {
        let call = ToolCall::new(
            "filesystem",
            "read_file",
            params(&[("path", json!("/a")), ("limit", json!("ten"))]),
        );
        let outcome = validator().validate(&[call]).await;
        assert!(!outcome.passed());
        assert!(outcome.errors[0].contains("'limit'"));
    }

    #[tokio::test]
    async fn test_enum_constraint() {
        let catalog = Arc::new(FixedCatalog::new().with_tools(
            "git",
            vec![(
                "git_checkout",
                json!({
                    "type": "object",
                    "properties": { "mode": { "type": "string", "enum": ["branch", "tag"] } },
                    "required": ["mode"],
                }),
            )],
        ));
        let v = SchemaValidator::new(catalog, &ValidationSettings::default());

        let good = ToolCall::new("git", "checkout", params(&[("mode", json!("branch"))]));
        assert!(v.validate(&[good]).await.passed());

        let bad = ToolCall::new("git", "checkout", params(&[("mode", json!("commit"))]));
        let outcome = v.validate(&[bad]).await;
        assert!(!outcome.passed());
        assert!(outcome.errors[0].contains("must be one of"));
    }

    #[tokio::test]
    async fn test_pattern_constraint() {
        let catalog = Arc::new(FixedCatalog::new().with_tools(
            "web",
            vec![(
                "web_fetch",
                json!({
                    "type": "object",
                    "properties": { "url": { "type": "string", "pattern": "^https?://" } },
                    "required": ["url"],
                }),
            )],
        ));
        let v = SchemaValidator::new(catalog, &ValidationSettings::default());

        let good = ToolCall::new("web", "fetch", params(&[("url", json!("https://example.com"))]));
        assert!(v.validate(&[good]).await.passed());

        let bad = ToolCall::new("web", "fetch", params(&[("url", json!("ftp://example.com"))]));
        assert!(!v.validate(&[bad]).await.passed());
    }

    #[tokio::test]
    async fn test_unknown_tool_only_warns() {
        let call = ToolCall::new("filesystem", "no_such_tool", params(&[("x", json!(1))]));
        let outcome = validator().validate(&[call]).await;
        assert!(outcome.passed());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let first = validator()
            .validate(&[list_call(params(&[("paths", json!(42))]))])
            .await;
        assert!(first.passed());
        let corrected = first.corrected_calls.unwrap();

        let second = validator().validate(&corrected).await;
        assert!(second.passed());
        assert!(second.corrections.is_empty(), "corrections: {:?}", second.corrections);
    }
}
