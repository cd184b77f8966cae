use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::dsl::ReferenceKind;
use crate::imports::ImportError;
use crate::tree::{BlockId, FileId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UnitInstance {
    /// Runs at most once per session; its result may be shared.
    Shared,
    /// A fresh execution owned by a single consumer.
    Fresh { consumer: UnitId },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResolvedReference {
    pub name: String,
    pub kind: ReferenceKind,
    pub unit: UnitId,
}

/// One scheduled execution of a block.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PlannedUnit {
    pub id: UnitId,
    pub block: BlockId,
    /// `path#name`
    pub label: String,
    pub instance: UnitInstance,
    /// Matched by the selector (as opposed to pulled in as a dependency).
    pub selected: bool,
    /// Target of at least one cached reference.
    pub cached_target: bool,
    pub references: Vec<ResolvedReference>,
    pub depends_on: Vec<UnitId>,
}

impl PlannedUnit {
    pub fn display_name(&self) -> String {
        match self.instance {
            UnitInstance::Shared => self.label.clone(),
            UnitInstance::Fresh { consumer } => format!("{} (fresh for {consumer})", self.label),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self.instance, UnitInstance::Fresh { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileContext {
    pub path: String,
    /// Variables visible in the file after import resolution.
    pub variables: BTreeMap<String, String>,
    pub script_chain: Vec<FileId>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionPlan {
    pub units: Vec<PlannedUnit>,
    /// A deterministic topological order.
    pub order: Vec<UnitId>,
    /// Units grouped by parallelizable levels.
    pub levels: Vec<Vec<UnitId>>,
    #[serde(skip)]
    pub files: BTreeMap<FileId, FileContext>,
}

impl ExecutionPlan {
    pub fn unit(&self, id: UnitId) -> &PlannedUnit {
        &self.units[id.0]
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn dependents(&self, id: UnitId) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|u| u.depends_on.contains(&id))
            .map(|u| u.id)
            .collect()
    }

    pub fn file_context(&self, file: FileId) -> Option<&FileContext> {
        self.files.get(&file)
    }

    pub fn to_dot(&self, title: &str) -> String {
        let mut out = String::new();
        out.push_str("digraph verspec {\n");
        out.push_str(&format!("  label=\"{}\";\n", escape(title)));
        out.push_str("  labelloc=t;\n");
        out.push_str("  rankdir=LR;\n");

        for unit in &self.units {
            let style = if unit.is_fresh() { ", style=dashed" } else { "" };
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\"{style}];\n",
                unit.id,
                escape(&unit.display_name())
            ));
        }
        for unit in &self.units {
            for r in &unit.references {
                let style = match r.kind {
                    ReferenceKind::Cached => "",
                    ReferenceKind::Forced => " [style=dashed]",
                };
                out.push_str(&format!("  \"{}\" -> \"{}\"{style};\n", r.unit, unit.id));
            }
        }
        for level in &self.levels {
            if level.len() > 1 {
                out.push_str("  { rank=same; ");
                for id in level {
                    out.push_str(&format!("\"{id}\"; "));
                }
                out.push_str("}\n");
            }
        }

        out.push_str("}\n");
        out
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("{file}:{line}: block `{block}` references unknown block `{name}`{}", hint.as_ref().map(|h| format!(" ({h})")).unwrap_or_default())]
    ReferenceNotFound {
        name: String,
        file: String,
        block: String,
        line: usize,
        hint: Option<String>,
    },
    #[error("{file}:{line}: block `{block}` reference `{name}` is ambiguous; candidates: {}", candidates.join(", "))]
    AmbiguousReference {
        name: String,
        file: String,
        block: String,
        line: usize,
        candidates: Vec<String>,
    },
    #[error("dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },
    #[error("`{consumer}` force-refs `{target}`, but `{target}` only cached-refs `{dependency}`; make it `forceRef: {}` so the fresh run does not reuse a stale result", dependency.rsplit('#').next().unwrap_or_default())]
    StaleForcedRef {
        consumer: String,
        target: String,
        dependency: String,
    },
    #[error("{file}: {source}")]
    Import {
        file: String,
        #[source]
        source: ImportError,
    },
}

/// Every error found while resolving a selection. No plan is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
pub struct PlanError {
    pub errors: Vec<ResolveError>,
}
