//! Merge-field resolver.
//!
//! Pure transform from a template and a context record to a string.
//! Placeholders look like `{{ contact.first_name }}` and may carry a
//! fallback: `{{ contact.first_name | "there" }}`. Unknown or empty fields
//! render as the fallback, or as an empty string when none is given; the
//! resolver never fails.
//!
//! Substituted values are sanitized for the target medium and are never
//! re-scanned for placeholders, so contact data cannot inject template
//! syntax or control characters into rendered output.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use cadence_types::contact::{Contact, Organization};
use cadence_types::workflow::WorkflowRun;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Lookup surface for placeholders and condition expressions.
///
/// Always a JSON object with the roots `contact`, `organization` (alias
/// `org`), `pipeline`, `stage`, `workflow`, `run`, `trigger` and `now`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeContext {
    root: Value,
}

impl MergeContext {
    /// Context for a live run.
    pub fn for_run(
        run: &WorkflowRun,
        contact: Option<&Contact>,
        organization: Option<&Organization>,
        now: DateTime<Utc>,
    ) -> Self {
        let contact_value = contact.map(contact_to_value).unwrap_or_else(|| json!({}));
        let org_value = organization
            .and_then(|o| serde_json::to_value(o).ok())
            .unwrap_or_else(|| json!({}));

        Self {
            root: json!({
                "contact": contact_value,
                "organization": org_value.clone(),
                "org": org_value,
                "pipeline": { "name": contact.and_then(|c| c.pipeline.clone()) },
                "stage": { "name": contact.and_then(|c| c.stage.clone()) },
                "workflow": { "id": run.workflow_id, "name": run.workflow_name },
                "run": {
                    "id": run.id,
                    "started_at": run.started_at.to_rfc3339(),
                    "trigger_type": run.trigger_type,
                },
                "trigger": run.trigger_payload.clone().unwrap_or_else(|| json!({})),
                "now": now.to_rfc3339(),
            }),
        }
    }

    /// Context from an arbitrary JSON object, e.g. synthetic preview data.
    ///
    /// Non-object input yields an empty context; `org` mirrors
    /// `organization` when only one of them is given.
    pub fn from_value(value: Value) -> Self {
        let mut map = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        match (map.get("organization").cloned(), map.get("org").cloned()) {
            (Some(org), None) => {
                map.insert("org".to_string(), org);
            }
            (None, Some(org)) => {
                map.insert("organization".to_string(), org);
            }
            _ => {}
        }
        Self {
            root: Value::Object(map),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Resolve a dotted path such as `contact.custom_fields.plan`.
    ///
    /// Numeric segments index into arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

fn contact_to_value(contact: &Contact) -> Value {
    let mut map = Map::new();
    // Custom fields first so standard fields win on collision.
    for (key, value) in &contact.custom_fields {
        map.insert(key.clone(), value.clone());
    }
    let standard = json!({
        "id": contact.id,
        "first_name": contact.first_name,
        "last_name": contact.last_name,
        "full_name": contact.full_name(),
        "name": contact.full_name(),
        "email": contact.email,
        "phone": contact.phone,
        "company": contact.company,
        "tags": contact.tags,
        "pipeline": contact.pipeline,
        "stage": contact.stage,
        "custom_fields": contact.custom_fields,
    });
    if let Value::Object(fields) = standard {
        map.extend(fields);
    }
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// How substituted values are sanitized for their destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeMode {
    /// Strip control characters except newline and tab.
    #[default]
    Plain,
    /// Like `Plain`, but newlines and tabs collapse to spaces. For subject
    /// lines and other header-like fields.
    SingleLine,
    /// Like `Plain`, plus HTML entity escaping. For HTML bodies.
    Html,
}

fn sanitize(raw: &str, mode: EscapeMode, out: &mut String) {
    for ch in raw.chars() {
        match ch {
            '\n' | '\t' if mode == EscapeMode::SingleLine => out.push(' '),
            '\n' | '\t' => out.push(ch),
            c if c.is_control() => {}
            '&' if mode == EscapeMode::Html => out.push_str("&amp;"),
            '<' if mode == EscapeMode::Html => out.push_str("&lt;"),
            '>' if mode == EscapeMode::Html => out.push_str("&gt;"),
            '"' if mode == EscapeMode::Html => out.push_str("&quot;"),
            '\'' if mode == EscapeMode::Html => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A parsed `{{ path | fallback }}` placeholder.
struct Placeholder<'a> {
    path: &'a str,
    fallback: Option<&'a str>,
}

fn parse_placeholder(inner: &str) -> Placeholder<'_> {
    let (path, fallback) = match inner.split_once('|') {
        Some((path, fallback)) => (path, Some(unquote(fallback.trim()))),
        None => (inner, None),
    };
    Placeholder {
        path: path.trim(),
        fallback,
    }
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    s
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-'))
}

/// Render a context value as placeholder text. `None` means "no usable value".
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(render_value).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        Value::Object(_) => None,
    }
}

/// Resolve `template` against `context` with [`EscapeMode::Plain`].
pub fn resolve(template: &str, context: &MergeContext) -> String {
    resolve_with(template, context, EscapeMode::Plain)
}

/// Resolve `template` against `context`, sanitizing substitutions for `mode`.
///
/// Literal template text is copied unchanged; an unterminated `{{` is
/// treated as literal text.
pub fn resolve_with(template: &str, context: &MergeContext, mode: EscapeMode) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let placeholder = parse_placeholder(&after_open[..end]);
        let value = if is_valid_path(placeholder.path) {
            context.lookup(placeholder.path).and_then(render_value)
        } else {
            None
        };
        if let Some(text) = value.as_deref().or(placeholder.fallback) {
            sanitize(text, mode, &mut out);
        }

        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Resolve every string leaf of a JSON document.
pub fn resolve_json(value: &Value, context: &MergeContext) -> Value {
    match value {
        Value::String(s) => Value::String(resolve(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_json(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_json(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Placeholder paths in `template` that have no usable value in `context`.
pub fn missing_fields(template: &str, context: &MergeContext) -> Vec<String> {
    let mut missing = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        let placeholder = parse_placeholder(&after_open[..end]);
        let present = is_valid_path(placeholder.path)
            && context.lookup(placeholder.path).and_then(render_value).is_some();
        if !present && !missing.iter().any(|m| m == placeholder.path) {
            missing.push(placeholder.path.to_string());
        }
        rest = &after_open[end + 2..];
    }
    missing
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample() -> MergeContext {
        MergeContext::from_value(json!({
            "contact": {
                "first_name": "Ada",
                "last_name": "",
                "tags": ["vip", "beta"],
                "custom_fields": { "plan": "pro", "seats": 12 },
                "bio": "line1\nline2\u{0007}<b>bold</b>"
            },
            "organization": { "name": "Analytical Engines" },
            "stage": { "name": null }
        }))
    }

    #[test]
    fn test_basic_substitution() {
        assert_eq!(
            resolve("Hi {{contact.first_name}} from {{ org.name }}!", &sample()),
            "Hi Ada from Analytical Engines!"
        );
    }

    #[test]
    fn test_missing_field_renders_empty() {
        assert_eq!(resolve("[{{ contact.phone }}]", &sample()), "[]");
        assert_eq!(resolve("[{{ nothing.here.at.all }}]", &sample()), "[]");
        assert_eq!(resolve("[{{ stage.name }}]", &sample()), "[]");
    }

    #[test]
    fn test_fallback_used_for_missing_and_empty() {
        let ctx = sample();
        assert_eq!(resolve("Hi {{ contact.nickname | \"there\" }}", &ctx), "Hi there");
        assert_eq!(resolve("{{ contact.last_name | 'Unknown' }}", &ctx), "Unknown");
        assert_eq!(resolve("{{ contact.first_name | friend }}", &ctx), "Ada");
    }

    #[test]
    fn test_nested_numbers_and_arrays() {
        let ctx = sample();
        assert_eq!(resolve("{{contact.custom_fields.seats}}", &ctx), "12");
        assert_eq!(resolve("{{contact.tags}}", &ctx), "vip, beta");
        assert_eq!(resolve("{{contact.tags.1}}", &ctx), "beta");
    }

    #[test]
    fn test_object_value_renders_empty() {
        assert_eq!(resolve("[{{contact.custom_fields}}]", &sample()), "[]");
    }

    #[test]
    fn test_control_characters_stripped() {
        assert_eq!(
            resolve("{{contact.bio}}", &sample()),
            "line1\nline2<b>bold</b>"
        );
    }

    #[test]
    fn test_single_line_collapses_newlines() {
        assert_eq!(
            resolve_with("{{contact.bio}}", &sample(), EscapeMode::SingleLine),
            "line1 line2<b>bold</b>"
        );
    }

    #[test]
    fn test_html_mode_escapes_values_not_template() {
        assert_eq!(
            resolve_with("<p>{{contact.bio}}</p>", &sample(), EscapeMode::Html),
            "<p>line1\nline2&lt;b&gt;bold&lt;/b&gt;</p>"
        );
    }

    #[test]
    fn test_substituted_values_are_not_reexpanded() {
        let ctx = MergeContext::from_value(json!({
            "contact": { "first_name": "{{ org.secret }}" },
            "org": { "secret": "leak" }
        }));
        assert_eq!(resolve("{{ contact.first_name }}", &ctx), "{{ org.secret }}");
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        assert_eq!(resolve("Hi {{ contact.first_name", &sample()), "Hi {{ contact.first_name");
    }

    #[test]
    fn test_invalid_path_renders_fallback() {
        assert_eq!(resolve("{{ contact..x | ok }}", &sample()), "ok");
        assert_eq!(resolve("{{ }}", &sample()), "");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let ctx = sample();
        let template = "{{contact.first_name}} {{contact.tags}} {{contact.missing}}";
        let first = resolve(template, &ctx);
        for _ in 0..10 {
            assert_eq!(resolve(template, &ctx), first);
        }
    }

    #[test]
    fn test_resolve_json_string_leaves() {
        let payload = json!({
            "title": "Call {{contact.first_name}}",
            "priority": 2,
            "labels": ["{{contact.custom_fields.plan}}", "static"]
        });
        assert_eq!(
            resolve_json(&payload, &sample()),
            json!({ "title": "Call Ada", "priority": 2, "labels": ["pro", "static"] })
        );
    }

    #[test]
    fn test_missing_fields_lists_unique_paths() {
        let missing = missing_fields(
            "{{contact.first_name}} {{contact.phone}} {{contact.phone}} {{ stage.name }}",
            &sample(),
        );
        assert_eq!(missing, vec!["contact.phone", "stage.name"]);
    }

    #[test]
    fn test_for_run_context_shape() {
        let org_id = Uuid::now_v7();
        let mut custom = Map::new();
        custom.insert("plan".to_string(), json!("pro"));
        custom.insert("email".to_string(), json!("shadowed@example.com"));
        let contact = Contact {
            id: Uuid::now_v7(),
            organization_id: org_id,
            first_name: Some("Grace".to_string()),
            last_name: Some("Hopper".to_string()),
            email: Some("grace@example.com".to_string()),
            phone: None,
            company: None,
            tags: vec![],
            pipeline: Some("Sales".to_string()),
            stage: Some("Demo".to_string()),
            custom_fields: custom,
            updated_at: Utc::now(),
        };
        let run = crate::workflow::tests_support::run_for(org_id, contact.id);
        let ctx = MergeContext::for_run(&run, Some(&contact), None, Utc::now());

        assert_eq!(resolve("{{contact.full_name}}", &ctx), "Grace Hopper");
        assert_eq!(resolve("{{contact.plan}}", &ctx), "pro");
        assert_eq!(resolve("{{contact.email}}", &ctx), "grace@example.com");
        assert_eq!(resolve("{{pipeline.name}}/{{stage.name}}", &ctx), "Sales/Demo");
        assert_eq!(resolve("{{workflow.name}}", &ctx), run.workflow_name);
        assert_eq!(resolve("[{{org.name}}]", &ctx), "[]");
    }
}
