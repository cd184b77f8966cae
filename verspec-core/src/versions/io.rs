use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::dsl::parse_spec_file;
use crate::error::{ParseError, TreeError};
use crate::tree::{is_generated, list_spec_files};
use crate::versions::materialize::{EffectiveTree, LocalFiles};
use crate::versions::model::VersionGraph;

#[derive(Debug, Default)]
pub struct LocalLoad {
    pub files: LocalFiles,
    pub errors: Vec<ParseError>,
}

/// Reads the hand-written files of every declared version from
/// `<root>/<version>/`. Files carrying the generated marker are skipped.
pub fn load_local_files(root: &Path, graph: &VersionGraph) -> Result<LocalLoad, TreeError> {
    let mut out = LocalLoad::default();
    for id in graph.ids() {
        let dir = root.join(id);
        for rel in list_spec_files(&dir)? {
            let full = dir.join(&rel);
            let text = fs::read_to_string(&full).map_err(|source| TreeError::Read {
                path: full.clone(),
                source,
            })?;
            if is_generated(&text) {
                continue;
            }
            match parse_spec_file(&format!("{id}/{rel}"), &text) {
                Ok(spec) => out.files.insert(id, &rel, spec),
                Err(e) => out.errors.push(e),
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Compute the report without touching disk.
    pub dry_run: bool,
    /// Delete generated files no longer part of the tree.
    pub clean: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Created,
    Updated,
    Unchanged,
    /// A generated file that no longer belongs to the tree, left in place.
    Stale,
    Removed,
    /// A hand-written file sits where a generated one would go.
    KeptLocal,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileReport {
    pub path: String,
    pub action: FileAction,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WriteReport {
    pub version: String,
    pub files: Vec<FileReport>,
}

impl WriteReport {
    pub fn count(&self, action: FileAction) -> usize {
        self.files.iter().filter(|f| f.action == action).count()
    }
}

/// Brings `<root>/<version>/` in line with the tree's generated files.
pub fn write_generated(
    root: &Path,
    tree: &EffectiveTree,
    opts: &WriteOptions,
) -> Result<WriteReport, TreeError> {
    let dir = root.join(&tree.version);
    let on_disk = list_spec_files(&dir)?;
    let generated = tree.render_generated();
    let mut files = Vec::new();

    for (rel, text) in &generated {
        let full = dir.join(rel);
        let action = if on_disk.contains(rel) {
            let existing = fs::read_to_string(&full).map_err(|source| TreeError::Read {
                path: full.clone(),
                source,
            })?;
            if !is_generated(&existing) {
                tracing::warn!(path = %full.display(), "refusing to overwrite hand-written file");
                FileAction::KeptLocal
            } else if existing == *text {
                FileAction::Unchanged
            } else {
                FileAction::Updated
            }
        } else {
            FileAction::Created
        };

        if !opts.dry_run && matches!(action, FileAction::Created | FileAction::Updated) {
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).map_err(|source| TreeError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&full, text).map_err(|source| TreeError::Write {
                path: full.clone(),
                source,
            })?;
            tracing::debug!(path = %full.display(), ?action, "wrote generated file");
        }
        files.push(FileReport {
            path: rel.clone(),
            action,
        });
    }

    let keep: BTreeSet<&String> = generated.keys().collect();
    for rel in on_disk.iter().filter(|p| !keep.contains(p)) {
        let full = dir.join(rel);
        let existing = fs::read_to_string(&full).map_err(|source| TreeError::Read {
            path: full.clone(),
            source,
        })?;
        if !is_generated(&existing) {
            continue;
        }
        let action = if opts.clean {
            if !opts.dry_run {
                fs::remove_file(&full).map_err(|source| TreeError::Write {
                    path: full.clone(),
                    source,
                })?;
            }
            FileAction::Removed
        } else {
            FileAction::Stale
        };
        files.push(FileReport {
            path: rel.clone(),
            action,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(WriteReport {
        version: tree.version.clone(),
        files,
    })
}

/// Generated files under `<root>/<version>/` that do not match the tree:
/// missing (`Created`), hand-edited or outdated (`Updated`), or no longer
/// part of the version (`Stale`). Empty when the directory is current.
pub fn out_of_date(root: &Path, tree: &EffectiveTree) -> Result<Vec<FileReport>, TreeError> {
    let opts = WriteOptions {
        dry_run: true,
        clean: false,
    };
    let report = write_generated(root, tree, &opts)?;
    Ok(report
        .files
        .into_iter()
        .filter(|f| !matches!(f.action, FileAction::Unchanged | FileAction::KeptLocal))
        .collect())
}
