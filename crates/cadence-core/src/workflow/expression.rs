//! JEXL expression evaluator for trigger guards and condition steps.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered string and collection
//! transforms. Contact data is always passed as the context object, never
//! interpolated into the expression text.

use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("expression produced no usable branch label: got {result}")]
    NoLabel { result: Value },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Used for:
/// - Trigger `when` guards (e.g. `payload.source == 'landing'`)
/// - `wait_until_condition` checks (e.g. `'customer' in contact.tags`)
/// - `branch_on_condition` label selection
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

fn str_arg(args: &[Value], idx: usize) -> &str {
    args.get(idx).and_then(|v| v.as_str()).unwrap_or("")
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
            .with_transform("contains", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).contains(str_arg(args, 1))))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).starts_with(str_arg(args, 1))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).ends_with(str_arg(args, 1))))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!Self::value_to_bool(&val)))
            })
            // Works on strings, arrays and objects.
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("default", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                if val.is_null() {
                    Ok(args.get(1).cloned().unwrap_or(Value::Null))
                } else {
                    Ok(val)
                }
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean using JavaScript-like truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Ok(Self::value_to_bool(&result))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate an expression into a branch label.
    ///
    /// Booleans map to `"true"`/`"false"`, strings are used as-is and
    /// integral numbers drop their fractional part (`2.0` becomes `"2"`).
    pub fn evaluate_label(&self, expression: &str, context: &Value) -> Result<String, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Self::value_to_label(&result).ok_or(ExpressionError::NoLabel { result })
    }

    pub fn value_to_label(value: &Value) -> Option<String> {
        match value {
            Value::Bool(b) => Some(b.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", f as i64)),
                _ => Some(n.to_string()),
            },
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Coerce a JSON value to boolean using JavaScript-like truthiness.
    pub fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new()
    }

    fn contact_ctx() -> Value {
        json!({
            "contact": {
                "first_name": "Ada",
                "email": "ada@example.com",
                "tags": ["customer", "newsletter"],
                "custom_fields": { "plan": "pro", "seats": 12.0 }
            },
            "stage": { "name": "Qualified" }
        })
    }

    #[test]
    fn test_dot_notation_nested() {
        let result = evaluator()
            .evaluate_value("contact.custom_fields.plan", &contact_ctx())
            .unwrap();
        assert_eq!(result, json!("pro"));
    }

    #[test]
    fn test_boolean_and_or() {
        let eval = evaluator();
        let ctx = contact_ctx();
        assert!(eval
            .evaluate_bool("contact.custom_fields.plan == 'pro' && stage.name == 'Qualified'", &ctx)
            .unwrap());
        assert!(eval
            .evaluate_bool("contact.custom_fields.plan == 'free' || contact.custom_fields.seats > 10", &ctx)
            .unwrap());
    }

    #[test]
    fn test_in_operator_on_tags() {
        let eval = evaluator();
        let ctx = contact_ctx();
        assert!(eval.evaluate_bool("'customer' in contact.tags", &ctx).unwrap());
        assert!(!eval.evaluate_bool("'churned' in contact.tags", &ctx).unwrap());
    }

    #[test]
    fn test_transforms() {
        let eval = evaluator();
        let ctx = contact_ctx();
        assert_eq!(
            eval.evaluate_value("contact.first_name|upper", &ctx).unwrap(),
            json!("ADA")
        );
        assert!(eval
            .evaluate_bool("contact.email|endsWith('@example.com')", &ctx)
            .unwrap());
        assert!(eval.evaluate_bool("contact.tags|length > 1", &ctx).unwrap());
        assert_eq!(
            eval.evaluate_value("contact.last_name|default('friend')", &ctx)
                .unwrap(),
            json!("friend")
        );
    }

    #[test]
    fn test_missing_property_is_null() {
        let result = evaluator()
            .evaluate_value("contact.phone", &contact_ctx())
            .unwrap();
        assert_eq!(result, json!(null));
    }

    #[test]
    fn test_label_from_boolean_and_string() {
        let eval = evaluator();
        let ctx = contact_ctx();
        assert_eq!(
            eval.evaluate_label("contact.custom_fields.plan == 'pro'", &ctx)
                .unwrap(),
            "true"
        );
        assert_eq!(
            eval.evaluate_label("contact.custom_fields.plan", &ctx).unwrap(),
            "pro"
        );
        assert_eq!(
            eval.evaluate_label("(contact.custom_fields.seats > 5) ? 'big' : 'small'", &ctx)
                .unwrap(),
            "big"
        );
    }

    #[test]
    fn test_label_from_number() {
        assert_eq!(
            ConditionEvaluator::value_to_label(&json!(2.0)).as_deref(),
            Some("2")
        );
        assert_eq!(
            ConditionEvaluator::value_to_label(&json!(2.5)).as_deref(),
            Some("2.5")
        );
    }

    #[test]
    fn test_label_from_null_is_error() {
        let err = evaluator()
            .evaluate_label("contact.phone", &contact_ctx())
            .unwrap_err();
        assert!(matches!(err, ExpressionError::NoLabel { .. }));
    }

    #[test]
    fn test_truthiness() {
        assert!(!ConditionEvaluator::value_to_bool(&json!("")));
        assert!(!ConditionEvaluator::value_to_bool(&json!(0.0)));
        assert!(!ConditionEvaluator::value_to_bool(&json!(null)));
        assert!(ConditionEvaluator::value_to_bool(&json!([])));
        assert!(ConditionEvaluator::value_to_bool(&json!("x")));
    }

    #[test]
    fn test_invalid_context_not_object() {
        assert!(evaluator().evaluate_bool("true", &json!("nope")).is_err());
    }
}
