use std::fmt;
use std::str::FromStr;

use crate::expressions::{CompareOp, Expr};

/// One parsed spec file: file-scope directives followed by request blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecFile {
    pub imports: Vec<Import>,
    pub variables: Vec<Variable>,
    /// File-scope scripts; run once per session before any block of this file
    /// or of a file importing it.
    pub scripts: Vec<Script>,
    pub blocks: Vec<RequestBlock>,
}

impl SpecFile {
    pub fn block_named(&self, name: &str) -> Option<(usize, &RequestBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.name.as_deref() == Some(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub target: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    File,
    PreRequest,
    PostResponse,
}

impl ScriptPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::PreRequest => "pre-request",
            Self::PostResponse => "post-response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub statements: Vec<Statement>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Writes a session variable.
    Set { name: String, expr: Expr },
    /// Writes a block export, visible to referrers as `{{<block>.<name>}}`.
    Export { name: String, expr: Expr },
    Log(Expr),
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { name, expr } => write!(f, "set {name} = {expr}"),
            Self::Export { name, expr } => write!(f, "export {name} = {expr}"),
            Self::Log(expr) => write!(f, "log {expr}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBlock {
    pub title: String,
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub references: Vec<Reference>,
    pub comments: Vec<String>,
    pub pre_script: Option<Script>,
    pub request: RequestLine,
    pub headers: Vec<Header>,
    pub body: Option<String>,
    pub post_script: Option<Script>,
    pub assertions: Vec<Assertion>,
    /// Line of the `###` title.
    pub line: usize,
}

impl RequestBlock {
    /// The block's name, falling back to its title.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.title)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Appends tags not already present. Returns true if anything changed.
    pub fn add_tags<'a>(&mut self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        let mut changed = false;
        for tag in tags {
            if !self.has_tag(tag) {
                self.tags.push(tag.clone());
                changed = true;
            }
        }
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// Executes the target at most once per session and reuses the result.
    Cached,
    /// Re-executes the target fresh for this referrer.
    Forced,
}

impl ReferenceKind {
    pub fn directive(self) -> &'static str {
        match self {
            Self::Cached => "ref",
            Self::Forced => "forceRef",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub target: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
    pub http_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
    Connect,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            "CONNECT" => Self::Connect,
            other => return Err(format!("unknown HTTP method `{other}`")),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// `?? <lhs> <op> <literal>`; the literal is kept exactly as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub lhs: Expr,
    pub op: CompareOp,
    pub literal: String,
    pub line: usize,
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.literal)
    }
}
