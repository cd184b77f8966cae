use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::dsl::ast::{
    Assertion, Header, Import, Method, Reference, ReferenceKind, RequestBlock, RequestLine,
    Script, ScriptPhase, SpecFile, Statement, Variable,
};
use crate::error::ParseError;
use crate::expressions::{parse_template, CompareOp, Expr};

static METADATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*(name|tags|ref|forceRef)\s*:(.*)$").expect("valid regex")
});
static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@([A-Za-z_][A-Za-z0-9_\-]*)\s*=(.*)$").expect("valid regex")
});
static REQUEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z]+)\s+(\S+)(?:\s+(HTTP/\d(?:\.\d)?))?$").expect("valid regex")
});
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([!#$%&'*+\-.^_`|~0-9A-Za-z]+)\s*:(.*)$").expect("valid regex")
});
pub(crate) static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("valid regex"));

/// Parses spec text that has no file of origin; errors report `<input>`.
pub fn parse_spec(input: &str) -> Result<SpecFile, ParseError> {
    parse_spec_file("<input>", input)
}

pub fn parse_spec_file(path: &str, input: &str) -> Result<SpecFile, ParseError> {
    Parser {
        path,
        lines: input.lines().collect(),
        pos: 0,
    }
    .parse()
}

fn is_title(t: &str) -> bool {
    t.starts_with("###")
}

fn is_comment(t: &str) -> bool {
    (t.starts_with('#') && !is_title(t)) || t.starts_with("//")
}

fn is_assertion(t: &str) -> bool {
    t.starts_with("??")
}

fn is_script_open(t: &str) -> bool {
    t == "{{"
}

struct Parser<'a> {
    path: &'a str,
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(mut self) -> Result<SpecFile, ParseError> {
        let mut file = SpecFile::default();
        self.parse_file_scope(&mut file)?;
        while self.pos < self.lines.len() {
            let block = self.parse_block()?;
            file.blocks.push(block);
        }
        self.check_unique_names(&file)?;
        Ok(file)
    }

    fn peek(&self) -> Option<(usize, &'a str)> {
        self.lines.get(self.pos).map(|l| (self.pos + 1, *l))
    }

    fn err(&self, line: usize, message: impl Into<String>) -> ParseError {
        ParseError::new(self.path, line, message)
    }

    fn parse_file_scope(&mut self, file: &mut SpecFile) -> Result<(), ParseError> {
        while let Some((line, raw)) = self.peek() {
            let t = raw.trim();
            if is_title(t) {
                break;
            }
            if METADATA_RE.is_match(t) {
                return Err(self.err(
                    line,
                    "metadata line outside of a block (missing `###` title marker)",
                ));
            }
            if t.is_empty() || is_comment(t) {
                self.pos += 1;
                continue;
            }
            if let Some(target) = t.strip_prefix("import ").map(str::trim) {
                if target.is_empty() {
                    return Err(self.err(line, "`import` requires a target file"));
                }
                file.imports.push(Import {
                    target: target.to_string(),
                    line,
                });
                self.pos += 1;
                continue;
            }
            if let Some(caps) = VARIABLE_RE.captures(t) {
                file.variables.push(Variable {
                    name: caps[1].to_string(),
                    value: caps[2].trim().to_string(),
                    line,
                });
                self.pos += 1;
                continue;
            }
            if is_script_open(t) {
                let script = self.parse_script(ScriptPhase::File)?;
                file.scripts.push(script);
                continue;
            }
            if REQUEST_RE.is_match(t) {
                return Err(self.err(
                    line,
                    "request line outside of a block (missing `###` title marker)",
                ));
            }
            if is_assertion(t) {
                return Err(self.err(
                    line,
                    "assertion outside of a block (missing `###` title marker)",
                ));
            }
            return Err(self.err(
                line,
                format!("unexpected content before the first `###` block title: `{t}`"),
            ));
        }
        Ok(())
    }

    fn parse_block(&mut self) -> Result<RequestBlock, ParseError> {
        let Some((title_line, raw)) = self.peek() else {
            return Err(self.err(self.lines.len(), "expected a `###` block title"));
        };
        let title = raw.trim()[3..].trim().to_string();
        self.pos += 1;

        let mut name: Option<String> = None;
        let mut tags: Vec<String> = Vec::new();
        let mut references = Vec::new();
        let mut comments = Vec::new();
        let mut pre_script = None;

        let request = loop {
            let Some((line, raw)) = self.peek() else {
                return Err(self.err(title_line, format!("block `{title}` has no request line")));
            };
            let t = raw.trim();
            if t.is_empty() {
                self.pos += 1;
                continue;
            }
            if is_title(t) {
                return Err(self.err(title_line, format!("block `{title}` has no request line")));
            }
            if let Some(caps) = METADATA_RE.captures(t) {
                let value = caps[2].trim();
                match &caps[1] {
                    "name" => {
                        if !IDENT_RE.is_match(value) {
                            return Err(self.err(line, format!("invalid block name `{value}`")));
                        }
                        if name.is_some() {
                            return Err(self.err(line, "block declares more than one `name`"));
                        }
                        name = Some(value.to_string());
                    }
                    "tags" => {
                        for tag in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                            if !tags.iter().any(|t| t == tag) {
                                tags.push(tag.to_string());
                            }
                        }
                    }
                    directive => {
                        let kind = if directive == "ref" {
                            ReferenceKind::Cached
                        } else {
                            ReferenceKind::Forced
                        };
                        if !IDENT_RE.is_match(value) {
                            return Err(self.err(
                                line,
                                format!("`{directive}` requires a block name, found `{value}`"),
                            ));
                        }
                        references.push(Reference {
                            kind,
                            target: value.to_string(),
                            line,
                        });
                    }
                }
                self.pos += 1;
                continue;
            }
            if is_comment(t) {
                comments.push(t.to_string());
                self.pos += 1;
                continue;
            }
            if is_script_open(t) {
                if pre_script.is_some() {
                    return Err(self.err(line, "block has more than one pre-request script"));
                }
                pre_script = Some(self.parse_script(ScriptPhase::PreRequest)?);
                continue;
            }
            if is_assertion(t) {
                return Err(self.err(line, "assertion before the request line"));
            }
            self.pos += 1;
            break self.parse_request_line(line, t)?;
        };

        let mut headers = Vec::new();
        let mut in_body = false;
        while let Some((line, raw)) = self.peek() {
            let t = raw.trim();
            if t.is_empty() {
                self.pos += 1;
                in_body = true;
                break;
            }
            if is_title(t) || is_assertion(t) || is_script_open(t) {
                break;
            }
            if METADATA_RE.is_match(t) {
                return Err(self.err(line, "metadata must appear above the request line"));
            }
            if is_comment(t) {
                self.pos += 1;
                continue;
            }
            let Some(caps) = HEADER_RE.captures(t) else {
                return Err(self.err(
                    line,
                    format!("malformed header line `{t}` (expected `Name: value`)"),
                ));
            };
            headers.push(Header {
                name: caps[1].to_string(),
                value: caps[2].trim().to_string(),
            });
            self.pos += 1;
        }

        let body = if in_body { self.parse_body() } else { None };

        let mut post_script = None;
        let mut assertions = Vec::new();
        while let Some((line, raw)) = self.peek() {
            let t = raw.trim();
            if is_title(t) {
                break;
            }
            if t.is_empty() || (is_comment(t) && !METADATA_RE.is_match(t)) {
                self.pos += 1;
                continue;
            }
            if is_assertion(t) {
                assertions.push(self.parse_assertion(line, t)?);
                self.pos += 1;
                continue;
            }
            if is_script_open(t) {
                if post_script.is_some() {
                    return Err(self.err(line, "block has more than one post-response script"));
                }
                post_script = Some(self.parse_script(ScriptPhase::PostResponse)?);
                continue;
            }
            return Err(self.err(
                line,
                format!(
                    "unexpected content `{t}` after the body; only `??` assertions and a `{{{{ }}}}` script may follow"
                ),
            ));
        }

        Ok(RequestBlock {
            title,
            name,
            tags,
            references,
            comments,
            pre_script,
            request,
            headers,
            body,
            post_script,
            assertions,
            line: title_line,
        })
    }

    fn parse_request_line(&self, line: usize, t: &str) -> Result<RequestLine, ParseError> {
        let Some(caps) = REQUEST_RE.captures(t) else {
            return Err(self.err(
                line,
                format!("expected request line `METHOD target`, found `{t}`"),
            ));
        };
        let method: Method = caps[1].parse().map_err(|e: String| self.err(line, e))?;
        let target = caps[2].to_string();
        parse_template(&target).map_err(|e| self.err(line, format!("request target: {e}")))?;
        Ok(RequestLine {
            method,
            target,
            http_version: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }

    fn parse_body(&mut self) -> Option<String> {
        let mut lines: Vec<&str> = Vec::new();
        while let Some((_, raw)) = self.peek() {
            let t = raw.trim();
            if is_title(t) || is_assertion(t) || is_script_open(t) {
                break;
            }
            lines.push(raw.trim_end());
            self.pos += 1;
        }
        while lines.first().is_some_and(|l| l.is_empty()) {
            lines.remove(0);
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    fn parse_assertion(&self, line: usize, t: &str) -> Result<Assertion, ParseError> {
        let rest = &t[2..];
        let Some((op, op_start, op_end)) = find_operator(rest) else {
            return Err(self.err(
                line,
                format!(
                    "assertion `{}` has no comparison operator (expected one of ==, !=, <, >, <=, >=)",
                    rest.trim()
                ),
            ));
        };
        let lhs = rest[..op_start].trim();
        if lhs.is_empty() {
            return Err(self.err(line, "assertion is missing its left-hand expression"));
        }
        let literal = rest[op_end..].trim();
        if literal.is_empty() {
            return Err(self.err(line, "assertion is missing its right-hand literal"));
        }
        let lhs = Expr::parse(lhs).map_err(|e| self.err(line, e.to_string()))?;
        Ok(Assertion {
            lhs,
            op,
            literal: literal.to_string(),
            line,
        })
    }

    fn parse_script(&mut self, phase: ScriptPhase) -> Result<Script, ParseError> {
        let open_line = self.pos + 1;
        self.pos += 1;
        let mut statements = Vec::new();
        loop {
            let Some((line, raw)) = self.peek() else {
                return Err(self.err(open_line, "unclosed `{{` script block"));
            };
            self.pos += 1;
            let t = raw.trim();
            if t == "}}" {
                break;
            }
            if t.is_empty() || is_comment(t) {
                continue;
            }
            statements.push(self.parse_statement(line, t, phase)?);
        }
        Ok(Script {
            statements,
            line: open_line,
        })
    }

    fn parse_statement(
        &self,
        line: usize,
        t: &str,
        phase: ScriptPhase,
    ) -> Result<Statement, ParseError> {
        let stmt = if let Some(rest) = strip_keyword(t, "set") {
            let (name, expr) = self.parse_assignment(line, rest)?;
            Statement::Set { name, expr }
        } else if let Some(rest) = strip_keyword(t, "export") {
            if phase == ScriptPhase::File {
                return Err(self.err(line, "`export` is only valid in block scripts"));
            }
            let (name, expr) = self.parse_assignment(line, rest)?;
            Statement::Export { name, expr }
        } else if let Some(rest) = strip_keyword(t, "log") {
            if rest.is_empty() {
                return Err(self.err(line, "`log` requires an expression"));
            }
            Statement::Log(Expr::parse(rest).map_err(|e| self.err(line, e.to_string()))?)
        } else {
            return Err(self.err(
                line,
                format!("unknown script statement `{t}` (expected set, export or log)"),
            ));
        };

        let reads_response = match &stmt {
            Statement::Set { expr, .. } | Statement::Export { expr, .. } | Statement::Log(expr) => {
                expr.reads_response()
            }
        };
        if reads_response && phase != ScriptPhase::PostResponse {
            return Err(self.err(
                line,
                format!(
                    "response values are only available in post-response scripts, not in a {} script",
                    phase.as_str()
                ),
            ));
        }
        Ok(stmt)
    }

    fn parse_assignment(&self, line: usize, rest: &str) -> Result<(String, Expr), ParseError> {
        let Some((name, expr)) = rest.split_once('=') else {
            return Err(self.err(line, "expected `<name> = <expression>`"));
        };
        let name = name.trim();
        if !IDENT_RE.is_match(name) {
            return Err(self.err(line, format!("invalid variable name `{name}`")));
        }
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(self.err(line, format!("`{name}` is assigned an empty expression")));
        }
        let expr = Expr::parse(expr).map_err(|e| self.err(line, e.to_string()))?;
        Ok((name.to_string(), expr))
    }

    fn check_unique_names(&self, file: &SpecFile) -> Result<(), ParseError> {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for block in &file.blocks {
            if let Some(name) = block.name.as_deref() {
                if let Some(first) = seen.insert(name, block.line) {
                    return Err(self.err(
                        block.line,
                        format!("duplicate block name `{name}` (first defined at line {first})"),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn strip_keyword<'s>(t: &'s str, kw: &str) -> Option<&'s str> {
    let rest = t.strip_prefix(kw)?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Finds the first whitespace-separated token that is a comparison operator.
/// Returns the operator and its byte range in `s`.
fn find_operator(s: &str) -> Option<(CompareOp, usize, usize)> {
    let mut start = None;
    for (i, c) in s.char_indices().chain(std::iter::once((s.len(), ' '))) {
        match (c.is_whitespace(), start) {
            (true, Some(st)) => {
                if let Some(op) = CompareOp::from_token(&s[st..i]) {
                    return Some((op, st, i));
                }
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_must_be_a_separate_token() {
        assert_eq!(find_operator(" status == 200"), Some((CompareOp::Eq, 8, 10)));
        assert_eq!(find_operator(" status==200"), None);
        assert_eq!(
            find_operator(" header x-count >= 3").map(|(op, _, _)| op),
            Some(CompareOp::Ge)
        );
    }

    #[test]
    fn keyword_needs_a_word_boundary() {
        assert_eq!(strip_keyword("set a = 1", "set"), Some("a = 1"));
        assert_eq!(strip_keyword("settle", "set"), None);
    }
}
