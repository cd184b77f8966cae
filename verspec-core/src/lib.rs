#![forbid(unsafe_code)]

pub mod dsl;
pub mod error;
pub mod expressions;
pub mod imports;
pub mod planner;
pub mod select;
pub mod tree;
pub mod versions;

pub use crate::dsl::{parse_spec, parse_spec_file, render_file, RequestBlock, SpecFile};
pub use crate::error::{ParseError, TreeError, VerspecError};
pub use crate::imports::{FileScope, ImportError, ScopeResolver};
pub use crate::planner::{plan, ExecutionPlan, PlanError, PlannedUnit, ResolveError, UnitId};
pub use crate::select::{SelectError, Selector, TagExpr};
pub use crate::tree::{load_subtree, load_tree, BlockId, FileId, SpecTree};
pub use crate::versions::{
    materialize, EffectiveTree, LocalFiles, Materialized, VersionDecl, VersionError, VersionGraph,
};
