use std::fmt;

use super::template::{parse_template, TemplateError};

/// A value read from the response of the block being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpr {
    Status,
    /// Elapsed milliseconds of the HTTP call.
    Duration,
    Header(String),
    /// `body` or `body<path>` where path is `.a.b`, `[0]`, `['x-y']`, ...
    Body(Option<String>),
}

impl ValueExpr {
    /// JSONPath query equivalent of a body path (`body.items[0]` -> `$.items[0]`).
    pub fn body_json_path(&self) -> Option<String> {
        match self {
            Self::Body(Some(path)) => Some(format!("${path}")),
            Self::Body(None) => Some("$".to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => f.write_str("status"),
            Self::Duration => f.write_str("duration"),
            Self::Header(h) => write!(f, "header {h}"),
            Self::Body(None) => f.write_str("body"),
            Self::Body(Some(p)) => write!(f, "body{p}"),
        }
    }
}

/// Left-hand side of an assertion or right-hand side of a script statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Value(ValueExpr),
    /// Text with optional `{{var}}` placeholders.
    Template(String),
}

impl Expr {
    pub fn parse(input: &str) -> Result<Self, TemplateError> {
        let s = input.trim();
        match s {
            "status" => return Ok(Self::Value(ValueExpr::Status)),
            "duration" => return Ok(Self::Value(ValueExpr::Duration)),
            "body" => return Ok(Self::Value(ValueExpr::Body(None))),
            _ => {}
        }
        if let Some(name) = s.strip_prefix("header ") {
            let name = name.trim();
            if !name.is_empty() {
                return Ok(Self::Value(ValueExpr::Header(name.to_string())));
            }
        }
        if let Some(path) = s.strip_prefix("body") {
            if path.starts_with('.') || path.starts_with('[') {
                return Ok(Self::Value(ValueExpr::Body(Some(path.to_string()))));
            }
        }
        parse_template(s)?;
        Ok(Self::Template(s.to_string()))
    }

    pub fn reads_response(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => v.fmt(f),
            Self::Template(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    pub const ALL: [CompareOp; 6] = [
        CompareOp::Eq,
        CompareOp::Ne,
        CompareOp::Lt,
        CompareOp::Gt,
        CompareOp::Le,
        CompareOp::Ge,
    ];

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == token)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }

    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Self::Eq => ordering.is_eq(),
            Self::Ne => ordering.is_ne(),
            Self::Lt => ordering.is_lt(),
            Self::Gt => ordering.is_gt(),
            Self::Le => ordering.is_le(),
            Self::Ge => ordering.is_ge(),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_response_forms() {
        assert_eq!(Expr::parse("status").unwrap(), Expr::Value(ValueExpr::Status));
        assert_eq!(
            Expr::parse("header Content-Type").unwrap(),
            Expr::Value(ValueExpr::Header("Content-Type".to_string()))
        );
        assert_eq!(
            Expr::parse("body.items[0].id").unwrap(),
            Expr::Value(ValueExpr::Body(Some(".items[0].id".to_string())))
        );
    }

    #[test]
    fn other_text_is_a_template() {
        assert_eq!(
            Expr::parse("{{login.token}}").unwrap(),
            Expr::Template("{{login.token}}".to_string())
        );
        assert_eq!(
            Expr::parse("bodyguard").unwrap(),
            Expr::Template("bodyguard".to_string())
        );
    }

    #[test]
    fn body_path_maps_to_json_path() {
        let v = ValueExpr::Body(Some(".token".to_string()));
        assert_eq!(v.body_json_path().as_deref(), Some("$.token"));
    }
}
