use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use verspec_core::dsl::Assertion;
use verspec_core::expressions::CompareOp;

use crate::executor::eval::{json_to_text, ResponseData, VarEnv};

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(?:0|[1-9][0-9]*)(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?$").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AssertionReport {
    /// The assertion as written.
    pub expression: String,
    pub op: CompareOp,
    /// The literal after interpolation.
    pub expected: String,
    pub actual: JsonValue,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub line: usize,
}

impl AssertionReport {
    pub fn actual_text(&self) -> String {
        match &self.actual {
            JsonValue::Null => "null".to_string(),
            JsonValue::String(s) => format!("{s:?}"),
            other => json_to_text(other),
        }
    }
}

pub fn evaluate_assertion(
    assertion: &Assertion,
    resp: &ResponseData,
    env: &VarEnv<'_>,
) -> AssertionReport {
    let mut report = AssertionReport {
        expression: assertion.to_string(),
        op: assertion.op,
        expected: assertion.literal.clone(),
        actual: JsonValue::Null,
        passed: false,
        error: None,
        line: assertion.line,
    };

    if assertion.literal.contains("{{") {
        match env.render(&assertion.literal) {
            Ok(text) => report.expected = text,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        }
    }

    let env = VarEnv::new(env.vars, env.refs, Some(resp));
    match env.eval(&assertion.lhs) {
        Ok(actual) => report.actual = actual,
        Err(e) => {
            report.error = Some(e);
            return report;
        }
    }

    report.passed = compare(&report.actual, &report.expected, assertion.op);
    report
}

/// Compares an actual value with a literal:
/// `null`, `true` and `false` compare as JSON (equality only), numeric
/// literals compare numerically when the actual value is or parses as a
/// number, anything else compares as text. Text literals are used exactly as
/// written, quotes and backslashes included.
pub fn compare(actual: &JsonValue, literal: &str, op: CompareOp) -> bool {
    let literal = literal.trim();
    let expected = match literal {
        "null" => Some(JsonValue::Null),
        "true" => Some(JsonValue::Bool(true)),
        "false" => Some(JsonValue::Bool(false)),
        _ => None,
    };
    if let Some(expected) = expected {
        return match op {
            CompareOp::Eq => *actual == expected,
            CompareOp::Ne => *actual != expected,
            _ => false,
        };
    }

    if NUMBER_RE.is_match(literal) {
        if let (Some(a), Ok(b)) = (as_number(actual), literal.parse::<f64>()) {
            return a.partial_cmp(&b).is_some_and(|o| op.holds(o));
        }
    }

    let actual = json_to_text(actual);
    op.holds(actual.as_str().cmp(literal))
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) if NUMBER_RE.is_match(s.trim()) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_numerically() {
        assert!(compare(&json!(200), "200", CompareOp::Eq));
        assert!(compare(&json!(200.0), "200", CompareOp::Eq));
        assert!(compare(&json!(9), "10", CompareOp::Lt));
        assert!(compare(&json!("42"), "42", CompareOp::Eq));
        assert!(!compare(&json!(3), "3", CompareOp::Gt));
    }

    #[test]
    fn keywords_compare_as_json() {
        assert!(compare(&JsonValue::Null, "null", CompareOp::Eq));
        assert!(compare(&json!("null"), "null", CompareOp::Ne));
        assert!(compare(&json!(true), "true", CompareOp::Eq));
        assert!(!compare(&json!("true"), "true", CompareOp::Eq));
        assert!(!compare(&json!(true), "false", CompareOp::Lt));
    }

    #[test]
    fn everything_else_compares_as_text() {
        assert!(compare(&json!("application/json"), "application/json", CompareOp::Eq));
        assert!(compare(&json!("apple"), "banana", CompareOp::Lt));
        // lexicographic, not natural order
        assert!(compare(&json!("v10"), "v9", CompareOp::Lt));
        assert!(compare(&json!("x"), "42", CompareOp::Gt));
    }

    #[test]
    fn text_literals_are_taken_verbatim() {
        assert!(compare(&json!("\"quoted\""), "\"quoted\"", CompareOp::Eq));
        assert!(!compare(&json!("quoted"), "\"quoted\"", CompareOp::Eq));
        assert!(compare(&json!("a\\nb"), "a\\nb", CompareOp::Eq));
        assert!(!compare(&json!("a\nb"), "a\\nb", CompareOp::Eq));
    }
}
