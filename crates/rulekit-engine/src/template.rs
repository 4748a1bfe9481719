//! Template rendering seam
//!
//! The engine does not ship a template language. Hosts that want dynamic
//! parameters implement [`TemplateRenderer`] over whatever engine they
//! already use and hand it to the engine, which installs a templating
//! interceptor that rewrites step parameters before each call.

use rulekit_core::{EngineResult, EngineError};
use serde_json::Value;

/// Host-provided template engine
///
/// `render` receives the template string and a scope value shaped as
/// `{"event": {...}, "metadata": {...}}` and returns the rendered string.
pub trait TemplateRenderer: Send + Sync {
    /// Whether a string contains template syntax worth rendering
    fn is_template(&self, s: &str) -> bool {
        s.contains("{{")
    }

    /// Render a template string against a scope
    fn render(&self, template: &str, scope: &Value) -> EngineResult<String>;
}

/// Recursively render every template string inside a JSON value
///
/// Rendered strings that parse back as JSON are substituted as their
/// parsed value, so a template can expand to a number, bool, or object.
pub fn render_value(
    renderer: &dyn TemplateRenderer,
    value: &Value,
    scope: &Value,
) -> EngineResult<Value> {
    match value {
        Value::String(s) if renderer.is_template(s) => {
            let rendered = renderer.render(s, scope)?;
            match serde_json::from_str(&rendered) {
                Ok(parsed) => Ok(parsed),
                Err(_) => Ok(Value::String(rendered)),
            }
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(renderer, v, scope)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| render_value(renderer, v, scope))
            .collect::<EngineResult<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// A renderer for tests and hosts without templating needs: substitutes
/// `{{ key }}` with the string form of `scope.metadata.key`
pub struct MetadataRenderer;

impl TemplateRenderer for MetadataRenderer {
    fn render(&self, template: &str, scope: &Value) -> EngineResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                EngineError::Template(format!("unterminated template expression in {:?}", template))
            })?;
            let key = after[..end].trim();
            let value = scope
                .pointer(&format!("/metadata/{}", key))
                .ok_or_else(|| EngineError::Template(format!("unknown template key: {}", key)))?;
            match value {
                Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "event": {"event_type": "door_open"},
            "metadata": {"room": "kitchen", "count": 3}
        })
    }

    #[test]
    fn test_plain_strings_pass_through() {
        let v = json!({"message": "no templates here"});
        let out = render_value(&MetadataRenderer, &v, &scope()).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn test_renders_nested_values() {
        let v = json!({
            "message": "light on in {{ room }}",
            "tags": ["{{ room }}", "static"]
        });
        let out = render_value(&MetadataRenderer, &v, &scope()).unwrap();
        assert_eq!(out["message"], json!("light on in kitchen"));
        assert_eq!(out["tags"], json!(["kitchen", "static"]));
    }

    #[test]
    fn test_rendered_json_is_reparsed() {
        let v = json!({"value": "{{ count }}"});
        let out = render_value(&MetadataRenderer, &v, &scope()).unwrap();
        assert_eq!(out["value"], json!(3));
    }

    #[test]
    fn test_unknown_key_is_template_error() {
        let v = json!({"message": "{{ nope }}"});
        let err = render_value(&MetadataRenderer, &v, &scope()).unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }
}
