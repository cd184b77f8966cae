use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::error::{ParseError, TreeError};
use crate::versions::glob::Glob;

static VERSION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("invalid version id `{id}` (letters, digits, `.`, `_` and `-` only)")]
    InvalidId { id: String },
    #[error("version `{id}` is declared more than once")]
    DuplicateVersion { id: String },
    #[error("version `{id}` inherits from unknown parent `{parent}`")]
    UnknownParent { id: String, parent: String },
    #[error("version parent cycle: {}", chain.join(" -> "))]
    ParentCycle { chain: Vec<String> },
    #[error("unknown version `{id}`")]
    UnknownVersion { id: String },
    #[error("version `{version}`: invalid tag rule glob `{glob}`: {message}")]
    InvalidGlob {
        version: String,
        glob: String,
        message: String,
    },
    #[error("{} local spec file(s) failed to parse; first: {}", errors.len(), errors.first().map(ToString::to_string).unwrap_or_default())]
    LocalParse { errors: Vec<ParseError> },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// One entry of the `versions:` list in the project config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionDecl {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub exclude: Vec<ExclusionDecl>,
    #[serde(default)]
    pub tag_rules: Vec<TagRuleDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExclusionDecl {
    pub path: String,
    #[serde(default)]
    pub block: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagRuleDecl {
    pub glob: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub path: String,
    /// `None` excludes the whole file.
    pub block: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TagRule {
    pub glob: Glob,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VersionNode {
    pub id: String,
    pub parent: Option<String>,
    pub exclusions: Vec<Exclusion>,
    pub tag_rules: Vec<TagRule>,
}

impl VersionNode {
    pub fn excludes_file(&self, path: &str) -> bool {
        self.exclusions
            .iter()
            .any(|e| e.path == path && e.block.is_none())
    }

    pub fn excludes_block(&self, path: &str, name: &str) -> bool {
        self.exclusions
            .iter()
            .any(|e| e.path == path && e.block.as_deref() == Some(name))
    }
}

/// A validated, acyclic single-parent version graph.
#[derive(Debug, Clone)]
pub struct VersionGraph {
    nodes: Vec<VersionNode>,
    index: BTreeMap<String, usize>,
    order: Vec<usize>,
}

impl VersionGraph {
    pub fn new(decls: Vec<VersionDecl>) -> Result<Self, VersionError> {
        let mut index = BTreeMap::new();
        let mut nodes = Vec::with_capacity(decls.len());

        for decl in decls {
            if !VERSION_ID_RE.is_match(&decl.id) {
                return Err(VersionError::InvalidId { id: decl.id });
            }
            if index.insert(decl.id.clone(), nodes.len()).is_some() {
                return Err(VersionError::DuplicateVersion { id: decl.id });
            }
            let tag_rules = decl
                .tag_rules
                .into_iter()
                .map(|r| {
                    let glob = Glob::new(&r.glob).map_err(|e| VersionError::InvalidGlob {
                        version: decl.id.clone(),
                        glob: r.glob.clone(),
                        message: e.to_string(),
                    })?;
                    Ok(TagRule { glob, tags: r.tags })
                })
                .collect::<Result<Vec<_>, VersionError>>()?;
            nodes.push(VersionNode {
                id: decl.id,
                parent: decl.parent,
                exclusions: decl
                    .exclude
                    .into_iter()
                    .map(|e| Exclusion {
                        path: e.path.trim_start_matches("./").to_string(),
                        block: e.block,
                    })
                    .collect(),
                tag_rules,
            });
        }

        for node in &nodes {
            if let Some(parent) = &node.parent {
                if !index.contains_key(parent) {
                    return Err(VersionError::UnknownParent {
                        id: node.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        let order = topo_order(&nodes, &index)?;
        Ok(Self {
            nodes,
            index,
            order,
        })
    }

    pub fn get(&self, id: &str) -> Option<&VersionNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn require(&self, id: &str) -> Result<&VersionNode, VersionError> {
        self.get(id).ok_or_else(|| VersionError::UnknownVersion { id: id.to_string() })
    }

    /// Parents before children; declaration order breaks ties.
    pub fn topo_order(&self) -> impl Iterator<Item = &VersionNode> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut cur = self.get(id).and_then(|n| n.parent.as_deref());
        while let Some(p) = cur {
            out.push(p);
            cur = self.get(p).and_then(|n| n.parent.as_deref());
        }
        out
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn topo_order(
    nodes: &[VersionNode],
    index: &BTreeMap<String, usize>,
) -> Result<Vec<usize>, VersionError> {
    let mut children: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut ready: BTreeSet<usize> = BTreeSet::new();
    for (i, node) in nodes.iter().enumerate() {
        match node.parent.as_ref().and_then(|p| index.get(p)) {
            Some(&p) => children.entry(p).or_default().push(i),
            None => {
                ready.insert(i);
            }
        }
    }

    let mut out = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_first() {
        out.push(i);
        if let Some(kids) = children.get(&i) {
            ready.extend(kids.iter().copied());
        }
    }

    if out.len() != nodes.len() {
        let done: BTreeSet<usize> = out.iter().copied().collect();
        let start = (0..nodes.len()).find(|i| !done.contains(i)).unwrap_or(0);
        return Err(VersionError::ParentCycle {
            chain: parent_cycle(nodes, index, start),
        });
    }
    Ok(out)
}

fn parent_cycle(nodes: &[VersionNode], index: &BTreeMap<String, usize>, start: usize) -> Vec<String> {
    let mut seen: Vec<usize> = Vec::new();
    let mut cur = start;
    while !seen.contains(&cur) {
        seen.push(cur);
        match nodes[cur].parent.as_ref().and_then(|p| index.get(p)) {
            Some(&p) => cur = p,
            None => break,
        }
    }
    let pos = seen.iter().position(|&i| i == cur).unwrap_or(0);
    let mut chain: Vec<String> = seen[pos..].iter().map(|&i| nodes[i].id.clone()).collect();
    chain.push(nodes[cur].id.clone());
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(id: &str, parent: Option<&str>) -> VersionDecl {
        VersionDecl {
            id: id.to_string(),
            parent: parent.map(str::to_string),
            exclude: Vec::new(),
            tag_rules: Vec::new(),
        }
    }

    #[test]
    fn orders_parents_first() {
        let g = VersionGraph::new(vec![
            decl("v3", Some("v2")),
            decl("v1", None),
            decl("v2", Some("v1")),
        ])
        .unwrap();
        let ids: Vec<&str> = g.topo_order().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2", "v3"]);
        assert_eq!(g.ancestors("v3"), vec!["v2", "v1"]);
    }

    #[test]
    fn unknown_parent_is_fatal() {
        let err = VersionGraph::new(vec![decl("v2", Some("v1"))]).unwrap_err();
        assert!(matches!(err, VersionError::UnknownParent { .. }));
    }

    #[test]
    fn parent_cycle_names_the_chain() {
        let err = VersionGraph::new(vec![
            decl("a", Some("b")),
            decl("b", Some("a")),
            decl("root", None),
        ])
        .unwrap_err();
        match err {
            VersionError::ParentCycle { chain } => {
                assert_eq!(chain.first(), chain.last());
                assert!(chain.contains(&"a".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = VersionGraph::new(vec![decl("v1", None), decl("v1", None)]).unwrap_err();
        assert!(matches!(err, VersionError::DuplicateVersion { .. }));
    }
}
