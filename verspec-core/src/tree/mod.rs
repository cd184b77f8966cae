//! An in-memory set of parsed spec files addressed by tree-relative path.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dsl::{parse_spec_file, RequestBlock, SpecFile};
use crate::error::{ParseError, TreeError};
use crate::imports::resolve_import_path;

pub const SPEC_EXTENSION: &str = "spec";

const GENERATED_PREFIX: &str = "# verspec:generated from ";
const GENERATED_SUFFIX: &str = " (do not edit)";

/// First line of every file written by the materializer.
pub fn generated_header(parent: &str) -> String {
    format!("{GENERATED_PREFIX}{parent}{GENERATED_SUFFIX}")
}

/// The parent version named in a generated file's marker line, if any.
pub fn generated_parent(text: &str) -> Option<&str> {
    let first = text.lines().next()?.trim_end();
    first
        .strip_prefix(GENERATED_PREFIX)?
        .strip_suffix(GENERATED_SUFFIX)
}

pub fn is_generated(text: &str) -> bool {
    generated_parent(text).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct FileId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct BlockId {
    pub file: FileId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FileOrigin {
    Local,
    Generated { parent: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    pub path: String,
    pub origin: FileOrigin,
    pub spec: SpecFile,
}

/// Files are kept sorted by path, so `FileId` order is file order.
#[derive(Debug, Clone, Default)]
pub struct SpecTree {
    files: Vec<TreeFile>,
    index: BTreeMap<String, FileId>,
    broken: BTreeMap<String, ParseError>,
}

impl SpecTree {
    pub fn new(files: impl IntoIterator<Item = TreeFile>) -> Self {
        let mut files: Vec<TreeFile> = files.into_iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        let index = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.clone(), FileId(i)))
            .collect();
        Self {
            files,
            index,
            broken: BTreeMap::new(),
        }
    }

    pub fn with_broken(mut self, broken: BTreeMap<String, ParseError>) -> Self {
        self.broken = broken;
        self
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &TreeFile)> {
        self.files.iter().enumerate().map(|(i, f)| (FileId(i), f))
    }

    pub fn files_mut(&mut self) -> impl Iterator<Item = &mut TreeFile> {
        self.files.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, id: FileId) -> &TreeFile {
        &self.files[id.0]
    }

    pub fn file_id(&self, path: &str) -> Option<FileId> {
        self.index.get(path).copied()
    }

    pub fn block(&self, id: BlockId) -> &RequestBlock {
        &self.files[id.file.0].spec.blocks[id.index]
    }

    /// `path#name` (or `path#title` for unnamed blocks).
    pub fn block_label(&self, id: BlockId) -> String {
        format!("{}#{}", self.file(id.file).path, self.block(id).label())
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &TreeFile, &RequestBlock)> {
        self.files().flat_map(|(fid, file)| {
            file.spec.blocks.iter().enumerate().map(move |(index, block)| {
                (BlockId { file: fid, index }, file, block)
            })
        })
    }

    /// Files that exist on disk but failed to parse.
    pub fn broken(&self) -> &BTreeMap<String, ParseError> {
        &self.broken
    }

    pub fn is_broken(&self, path: &str) -> bool {
        self.broken.contains_key(path)
    }
}

/// Loads every `*.spec` file under `dir`. Unparseable files are recorded as
/// broken instead of failing the whole load.
pub fn load_tree(dir: &Path) -> Result<SpecTree, TreeError> {
    let paths = list_spec_files(dir)?;
    load_paths(dir, paths)
}

/// Loads the files under `prefix` plus everything they transitively import.
pub fn load_subtree(dir: &Path, prefix: &str) -> Result<SpecTree, TreeError> {
    let all = list_spec_files(dir)?;
    let mut wanted: BTreeSet<String> = all
        .iter()
        .filter(|p| path_has_prefix(p, prefix))
        .cloned()
        .collect();
    let mut queue: Vec<String> = wanted.iter().cloned().collect();
    let mut parsed: BTreeMap<String, Result<TreeFile, ParseError>> = BTreeMap::new();

    while let Some(path) = queue.pop() {
        if parsed.contains_key(&path) {
            continue;
        }
        let loaded = read_file(dir, &path)?;
        if let Ok(file) = &loaded {
            for import in &file.spec.imports {
                if let Ok(target) = resolve_import_path(&path, &import.target) {
                    if all.contains(&target) && wanted.insert(target.clone()) {
                        queue.push(target);
                    }
                }
            }
        }
        parsed.insert(path, loaded);
    }

    Ok(assemble(parsed))
}

/// True when `path` is `prefix` itself or lies under the directory `prefix`.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_start_matches("./").trim_end_matches('/');
    if prefix.is_empty() || prefix == "." {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn load_paths(dir: &Path, paths: BTreeSet<String>) -> Result<SpecTree, TreeError> {
    let mut parsed = BTreeMap::new();
    for path in paths {
        let loaded = read_file(dir, &path)?;
        parsed.insert(path, loaded);
    }
    Ok(assemble(parsed))
}

fn assemble(parsed: BTreeMap<String, Result<TreeFile, ParseError>>) -> SpecTree {
    let mut files = Vec::new();
    let mut broken = BTreeMap::new();
    for (path, loaded) in parsed {
        match loaded {
            Ok(file) => files.push(file),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "spec file failed to parse");
                broken.insert(path, e);
            }
        }
    }
    SpecTree::new(files).with_broken(broken)
}

fn read_file(dir: &Path, rel: &str) -> Result<Result<TreeFile, ParseError>, TreeError> {
    let full = dir.join(rel);
    let text = fs::read_to_string(&full).map_err(|source| TreeError::Read {
        path: full.clone(),
        source,
    })?;
    let origin = match generated_parent(&text) {
        Some(parent) => FileOrigin::Generated {
            parent: parent.to_string(),
        },
        None => FileOrigin::Local,
    };
    Ok(parse_spec_file(rel, &text).map(|spec| TreeFile {
        path: rel.to_string(),
        origin,
        spec,
    }))
}

/// Every `*.spec` file under `dir` as a sorted set of `/`-separated relative
/// paths. A missing directory is an empty tree.
pub fn list_spec_files(dir: &Path) -> Result<BTreeSet<String>, TreeError> {
    let mut out = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current).map_err(|source| TreeError::Read {
            path: current.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| TreeError::Read {
                path: current.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(SPEC_EXTENSION) {
                continue;
            }
            out.insert(relative_path(dir, &path)?);
        }
    }
    Ok(out)
}

fn relative_path(root: &Path, path: &Path) -> Result<String, TreeError> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for comp in rel.components() {
        let Some(part) = comp.as_os_str().to_str() else {
            return Err(TreeError::NonUtf8Path {
                path: path.to_path_buf(),
            });
        };
        parts.push(part);
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_round_trips() {
        let header = generated_header("v201");
        assert_eq!(generated_parent(&format!("{header}\n### x")), Some("v201"));
        assert!(!is_generated("### x\nGET /"));
    }

    #[test]
    fn prefix_is_segment_aware() {
        assert!(path_has_prefix("auth/login.spec", "auth"));
        assert!(path_has_prefix("auth/login.spec", "auth/"));
        assert!(path_has_prefix("auth/login.spec", "auth/login.spec"));
        assert!(!path_has_prefix("authz/login.spec", "auth"));
        assert!(path_has_prefix("anything.spec", ""));
    }
}
