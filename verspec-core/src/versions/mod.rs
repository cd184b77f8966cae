//! Version graph and the inheritance materializer.

mod glob;
mod io;
mod materialize;
mod model;

pub use glob::Glob;
pub use io::{
    load_local_files, out_of_date, write_generated, FileAction, FileReport, LocalLoad,
    WriteOptions, WriteReport,
};
pub use materialize::{
    apply_tag_rules, materialize, Diagnostic, DiagnosticKind, EffectiveFile, EffectiveTree,
    LocalFiles, Materialized,
};
pub use model::{
    Exclusion, ExclusionDecl, TagRule, TagRuleDecl, VersionDecl, VersionError, VersionGraph,
    VersionNode,
};
