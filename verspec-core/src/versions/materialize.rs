use std::collections::BTreeMap;
use std::fmt;

use crate::dsl::{render_file, SpecFile};
use crate::tree::{generated_header, FileOrigin, SpecTree, TreeFile};
use crate::versions::model::{VersionGraph, VersionNode};

/// Local (hand-written) files per version, keyed by tree-relative path.
#[derive(Debug, Clone, Default)]
pub struct LocalFiles {
    versions: BTreeMap<String, BTreeMap<String, SpecFile>>,
}

impl LocalFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, version: &str, path: &str, spec: SpecFile) {
        self.versions
            .entry(version.to_string())
            .or_default()
            .insert(path.to_string(), spec);
    }

    pub fn version(&self, version: &str) -> Option<&BTreeMap<String, SpecFile>> {
        self.versions.get(version)
    }

    fn contains(&self, version: &str, path: &str) -> bool {
        self.versions
            .get(version)
            .is_some_and(|files| files.contains_key(path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveFile {
    pub origin: FileOrigin,
    pub spec: SpecFile,
}

/// The fully resolved file set of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveTree {
    pub version: String,
    pub parent: Option<String>,
    pub files: BTreeMap<String, EffectiveFile>,
}

impl EffectiveTree {
    /// Text of every generated file, marker line first.
    pub fn render_generated(&self) -> BTreeMap<String, String> {
        self.files
            .iter()
            .filter_map(|(path, file)| match &file.origin {
                FileOrigin::Generated { parent } => Some((
                    path.clone(),
                    format!("{}\n{}", generated_header(parent), render_file(&file.spec)),
                )),
                FileOrigin::Local => None,
            })
            .collect()
    }

    pub fn into_spec_tree(self) -> SpecTree {
        SpecTree::new(self.files.into_iter().map(|(path, f)| TreeFile {
            path,
            origin: f.origin,
            spec: f.spec,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnknownExclusion { path: String, block: Option<String> },
    ExclusionWithoutParent { path: String },
    UnmatchedTagRule { glob: String },
}

/// A non-fatal materialization finding.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Diagnostic {
    pub version: String,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.version;
        match &self.kind {
            DiagnosticKind::UnknownExclusion { path, block: Some(b) } => write!(
                f,
                "{v}: exclusion of block `{b}` in `{path}` matches nothing in the parent tree"
            ),
            DiagnosticKind::UnknownExclusion { path, block: None } => write!(
                f,
                "{v}: exclusion of `{path}` matches nothing in the parent tree"
            ),
            DiagnosticKind::ExclusionWithoutParent { path } => write!(
                f,
                "{v}: exclusion of `{path}` has no effect, version has no parent"
            ),
            DiagnosticKind::UnmatchedTagRule { glob } => {
                write!(f, "{v}: tag rule `{glob}` matches no files")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Materialized {
    pub trees: BTreeMap<String, EffectiveTree>,
    pub warnings: Vec<Diagnostic>,
}

/// Computes the effective tree of every version, parents first.
///
/// A pure function of its inputs: the same graph and local files always give
/// equal trees, and so byte-identical generated text.
pub fn materialize(graph: &VersionGraph, locals: &LocalFiles) -> Materialized {
    let mut out = Materialized::default();

    for node in graph.topo_order() {
        let parent = node.parent.as_ref().and_then(|p| out.trees.get(p));
        let mut files: BTreeMap<String, EffectiveFile> = BTreeMap::new();
        let mut warnings = check_exclusions(node, parent);

        if let Some(parent) = parent {
            for (path, inherited) in &parent.files {
                if locals.contains(&node.id, path) || node.excludes_file(path) {
                    continue;
                }
                let mut spec = inherited.spec.clone();
                let before = spec.blocks.len();
                spec.blocks.retain(|b| {
                    b.name
                        .as_deref()
                        .map_or(true, |name| !node.excludes_block(path, name))
                });
                if before > 0 && spec.blocks.is_empty() {
                    tracing::debug!(version = %node.id, path = %path, "exclusions emptied file; dropping");
                    continue;
                }
                files.insert(
                    path.clone(),
                    EffectiveFile {
                        origin: FileOrigin::Generated {
                            parent: parent.version.clone(),
                        },
                        spec,
                    },
                );
            }
        }

        if let Some(own) = locals.version(&node.id) {
            for (path, spec) in own {
                files.insert(
                    path.clone(),
                    EffectiveFile {
                        origin: FileOrigin::Local,
                        spec: spec.clone(),
                    },
                );
            }
        }

        for rule in &node.tag_rules {
            let mut matched = 0usize;
            for (path, file) in files.iter_mut() {
                if rule.glob.matches_file(&node.id, path) {
                    matched += 1;
                    for block in &mut file.spec.blocks {
                        block.add_tags(&rule.tags);
                    }
                }
            }
            if matched == 0 {
                warnings.push(Diagnostic {
                    version: node.id.clone(),
                    kind: DiagnosticKind::UnmatchedTagRule {
                        glob: rule.glob.as_str().to_string(),
                    },
                });
            }
        }

        for w in &warnings {
            tracing::warn!("{w}");
        }
        out.warnings.extend(warnings);
        out.trees.insert(
            node.id.clone(),
            EffectiveTree {
                version: node.id.clone(),
                parent: node.parent.clone(),
                files,
            },
        );
    }

    out
}

/// Applies a version's tag rules to a loaded tree. Idempotent, so running it
/// over already materialized files changes nothing.
pub fn apply_tag_rules(node: &VersionNode, tree: &mut SpecTree) {
    for file in tree.files_mut() {
        for rule in &node.tag_rules {
            if rule.glob.matches_file(&node.id, &file.path) {
                for block in &mut file.spec.blocks {
                    block.add_tags(&rule.tags);
                }
            }
        }
    }
}

fn check_exclusions(node: &VersionNode, parent: Option<&EffectiveTree>) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for excl in &node.exclusions {
        let kind = match parent {
            None => Some(DiagnosticKind::ExclusionWithoutParent {
                path: excl.path.clone(),
            }),
            Some(parent) => {
                let found = parent.files.get(&excl.path).is_some_and(|f| match &excl.block {
                    Some(name) => f.spec.block_named(name).is_some(),
                    None => true,
                });
                (!found).then(|| DiagnosticKind::UnknownExclusion {
                    path: excl.path.clone(),
                    block: excl.block.clone(),
                })
            }
        };
        if let Some(kind) = kind {
            out.push(Diagnostic {
                version: node.id.clone(),
                kind,
            });
        }
    }
    out
}
