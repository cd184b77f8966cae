//! Block selection by path prefix and tag expression.

mod tag_expr;

use thiserror::Error;

pub use tag_expr::TagExpr;

use crate::tree::{path_has_prefix, BlockId, SpecTree};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("invalid tag expression `{input}`: {message}")]
    InvalidTagExpr { input: String, message: String },
}

/// Matches blocks by path prefix and/or tag expression; both must hold when
/// both are set. Dependencies are pulled in later by the planner.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub path_prefix: Option<String>,
    pub tags: Option<TagExpr>,
}

impl Selector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// Adds a tag expression, AND-ed with any already present.
    pub fn with_tags(mut self, expr: TagExpr) -> Self {
        self.tags = Some(match self.tags.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn matches(&self, path: &str, tags: &[String]) -> bool {
        let path_ok = self
            .path_prefix
            .as_deref()
            .map_or(true, |p| path_has_prefix(path, p));
        path_ok && self.tags.as_ref().map_or(true, |e| e.eval(tags))
    }

    pub fn select(&self, tree: &SpecTree) -> Vec<BlockId> {
        tree.blocks()
            .filter(|(_, file, block)| self.matches(&file.path, &block.tags))
            .map(|(id, _, _)| id)
            .collect()
    }
}
