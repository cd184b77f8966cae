use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use serde_json_path::JsonPath;
use verspec_core::expressions::{parse_template, Expr, TemplateError, ValueExpr};

/// Nesting limit when a variable's value itself contains placeholders.
const MAX_VAR_DEPTH: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    pub status: u16,
    /// Lowercase names.
    pub headers: BTreeMap<String, String>,
    pub body_text: String,
    pub body_json: Option<JsonValue>,
    pub duration_ms: u64,
}

impl ResponseData {
    pub fn new(
        status: u16,
        headers: BTreeMap<String, String>,
        body: &[u8],
        duration_ms: u64,
    ) -> Self {
        let body_text = String::from_utf8_lossy(body).into_owned();
        let body_json = serde_json::from_str(&body_text).ok();
        Self {
            status,
            headers,
            body_text,
            body_json,
            duration_ms,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// What a referrer can see of an executed block.
#[derive(Debug, Clone, Default)]
pub struct BlockResult {
    pub response: ResponseData,
    pub exports: BTreeMap<String, String>,
}

pub fn eval_value(value: &ValueExpr, resp: &ResponseData) -> Result<JsonValue, String> {
    match value {
        ValueExpr::Status => Ok(JsonValue::from(resp.status)),
        ValueExpr::Duration => Ok(JsonValue::from(resp.duration_ms)),
        ValueExpr::Header(name) => Ok(resp
            .header(name)
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null)),
        ValueExpr::Body(None) => Ok(resp
            .body_json
            .clone()
            .unwrap_or_else(|| JsonValue::String(resp.body_text.clone()))),
        ValueExpr::Body(Some(_)) => {
            let query = value.body_json_path().unwrap_or_else(|| "$".to_string());
            query_body(resp, &query)
        }
    }
}

fn query_body(resp: &ResponseData, query: &str) -> Result<JsonValue, String> {
    let Some(json) = resp.body_json.as_ref() else {
        return Err("response body is not JSON".to_string());
    };
    let path = JsonPath::parse(query).map_err(|e| format!("invalid body path `{query}`: {e}"))?;
    let nodes = path.query(json).all();
    Ok(match nodes.as_slice() {
        [] => JsonValue::Null,
        [one] => (*one).clone(),
        many => JsonValue::Array(many.iter().map(|v| (*v).clone()).collect()),
    })
}

/// Text form used when a value is interpolated into a request or compared as text.
pub fn json_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Variable lookup for template interpolation.
///
/// Plain names come from `vars`. A dotted name whose head is a reference name
/// reads that block's exports or response (`login.token`, `login.status`,
/// `login.body.user.id`, `login.headers.etag`). Without a matching reference,
/// `status`, `duration`, `body...` and `headers.X` read the current response
/// when there is one.
pub struct VarEnv<'a> {
    pub vars: &'a BTreeMap<String, String>,
    pub refs: &'a BTreeMap<String, Arc<BlockResult>>,
    pub response: Option<&'a ResponseData>,
}

impl<'a> VarEnv<'a> {
    pub fn new(
        vars: &'a BTreeMap<String, String>,
        refs: &'a BTreeMap<String, Arc<BlockResult>>,
        response: Option<&'a ResponseData>,
    ) -> Self {
        Self {
            vars,
            refs,
            response,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        self.lookup_at(name, 0)
    }

    fn lookup_at(&self, name: &str, depth: usize) -> Option<String> {
        if let Some(value) = self.vars.get(name) {
            if value.contains("{{") {
                if depth >= MAX_VAR_DEPTH {
                    return None;
                }
                let tpl = parse_template(value).ok()?;
                return tpl.render(|n| self.lookup_at(n, depth + 1)).ok();
            }
            return Some(value.clone());
        }

        if let Some((head, rest)) = name.split_once('.') {
            if let Some(result) = self.refs.get(head) {
                if let Some(v) = result.exports.get(rest) {
                    return Some(v.clone());
                }
                return response_field(&result.response, rest);
            }
        }

        self.response.and_then(|resp| response_field(resp, name))
    }

    pub fn render(&self, text: &str) -> Result<String, TemplateError> {
        parse_template(text)?.render(|n| self.lookup(n))
    }

    /// Evaluates a script or assertion expression.
    pub fn eval(&self, expr: &Expr) -> Result<JsonValue, String> {
        match expr {
            Expr::Value(v) => match self.response {
                Some(resp) => eval_value(v, resp),
                None => Err(format!("`{v}` needs a response")),
            },
            Expr::Template(t) => self
                .render(t)
                .map(JsonValue::String)
                .map_err(|e| e.to_string()),
        }
    }
}

fn response_field(resp: &ResponseData, field: &str) -> Option<String> {
    match field {
        "status" => return Some(resp.status.to_string()),
        "duration" => return Some(resp.duration_ms.to_string()),
        "body" => return Some(resp.body_text.clone()),
        _ => {}
    }
    if let Some(name) = field.strip_prefix("headers.") {
        return resp.header(name).map(str::to_string);
    }
    if let Some(path) = field.strip_prefix("body") {
        if path.starts_with('.') || path.starts_with('[') {
            return query_body(resp, &format!("${path}"))
                .ok()
                .filter(|v| !v.is_null())
                .map(|v| json_to_text(&v));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resp(body: &str) -> ResponseData {
        let mut headers = BTreeMap::new();
        headers.insert("etag".to_string(), "abc".to_string());
        ResponseData::new(201, headers, body.as_bytes(), 12)
    }

    #[test]
    fn body_paths_go_through_json_path() {
        let r = resp(r#"{"items":[{"id":7},{"id":8}],"x-y":true}"#);
        let v = eval_value(&ValueExpr::Body(Some(".items[1].id".to_string())), &r).unwrap();
        assert_eq!(v, json!(8));
        let v = eval_value(&ValueExpr::Body(Some("['x-y']".to_string())), &r).unwrap();
        assert_eq!(v, json!(true));
        let v = eval_value(&ValueExpr::Body(Some(".missing".to_string())), &r).unwrap();
        assert_eq!(v, JsonValue::Null);
    }

    #[test]
    fn non_json_body_path_is_an_error() {
        let r = resp("plain text");
        assert!(eval_value(&ValueExpr::Body(Some(".a".to_string())), &r).is_err());
        assert_eq!(
            eval_value(&ValueExpr::Body(None), &r).unwrap(),
            json!("plain text")
        );
    }

    #[test]
    fn headers_are_case_insensitive() {
        let r = resp("{}");
        let v = eval_value(&ValueExpr::Header("ETag".to_string()), &r).unwrap();
        assert_eq!(v, json!("abc"));
    }

    #[test]
    fn lookup_reads_vars_refs_and_response() {
        let mut vars = BTreeMap::new();
        vars.insert("host".to_string(), "api".to_string());
        vars.insert("url".to_string(), "https://{{host}}/v1".to_string());

        let mut login = BlockResult {
            response: resp(r#"{"user":{"id":"u-1"}}"#),
            ..Default::default()
        };
        login.exports.insert("token".to_string(), "t0k".to_string());
        let mut refs = BTreeMap::new();
        refs.insert("login".to_string(), Arc::new(login));

        let current = resp(r#"{"n":3}"#);
        let env = VarEnv::new(&vars, &refs, Some(&current));

        assert_eq!(env.lookup("url").as_deref(), Some("https://api/v1"));
        assert_eq!(env.lookup("login.token").as_deref(), Some("t0k"));
        assert_eq!(env.lookup("login.status").as_deref(), Some("201"));
        assert_eq!(env.lookup("login.body.user.id").as_deref(), Some("u-1"));
        assert_eq!(env.lookup("login.headers.ETag").as_deref(), Some("abc"));
        assert_eq!(env.lookup("body.n").as_deref(), Some("3"));
        assert_eq!(env.lookup("nope"), None);
        assert_eq!(env.lookup("login.nope"), None);
    }

    #[test]
    fn self_referencing_variable_is_unresolved() {
        let mut vars = BTreeMap::new();
        vars.insert("a".to_string(), "x{{a}}".to_string());
        let refs = BTreeMap::new();
        let env = VarEnv::new(&vars, &refs, None);
        assert_eq!(env.lookup("a"), None);
    }
}
