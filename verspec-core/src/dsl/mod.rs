//! The spec file format: a line-oriented DSL of `###`-titled request blocks.

mod ast;
mod parser;
mod render;

pub use ast::{
    Assertion, Header, Import, Method, Reference, ReferenceKind, RequestBlock, RequestLine,
    Script, ScriptPhase, SpecFile, Statement, Variable,
};
pub use parser::{parse_spec, parse_spec_file};
pub use render::render_file;

pub(crate) use parser::IDENT_RE;
