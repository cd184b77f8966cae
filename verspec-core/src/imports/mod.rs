//! Import resolution: per-file scopes of visible variables, named blocks and
//! file-scope scripts.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::tree::{BlockId, FileId, SpecTree};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error("import cycle: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },
    #[error("{importer}: import `{target}` escapes the spec tree")]
    EscapesTree { importer: String, target: String },
    #[error("{importer}: imported file `{target}` failed to parse")]
    Broken { importer: String, target: String },
}

/// Resolves `target` relative to the directory of `importer`. A leading `/`
/// anchors the target at the tree root.
pub fn resolve_import_path(importer: &str, target: &str) -> Result<String, ImportError> {
    let mut parts: Vec<&str> = Vec::new();
    if !target.starts_with('/') {
        parts.extend(importer.split('/'));
        parts.pop();
    }
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(ImportError::EscapesTree {
                        importer: importer.to_string(),
                        target: target.to_string(),
                    });
                }
            }
            s => parts.push(s),
        }
    }
    Ok(parts.join("/"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameEntry {
    Block(BlockId),
    Ambiguous(Vec<BlockId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(BlockId),
    Ambiguous(Vec<BlockId>),
    NotFound,
}

/// Everything visible from one file after import resolution.
#[derive(Debug, Clone)]
pub struct FileScope {
    pub file: FileId,
    /// Files whose file-scope scripts run before this file's blocks, imports
    /// first (depth-first in import order), ending with the file itself.
    pub script_chain: Vec<FileId>,
    pub variables: BTreeMap<String, String>,
    /// Import targets that do not exist in the tree.
    pub missing_imports: Vec<String>,
    names: BTreeMap<String, NameEntry>,
}

impl FileScope {
    pub fn lookup(&self, name: &str) -> Lookup {
        match self.names.get(name) {
            Some(NameEntry::Block(id)) => Lookup::Found(*id),
            Some(NameEntry::Ambiguous(ids)) => Lookup::Ambiguous(ids.clone()),
            None => Lookup::NotFound,
        }
    }
}

/// Memoizes one scope per file for the lifetime of the resolver.
pub struct ScopeResolver<'t> {
    tree: &'t SpecTree,
    cache: BTreeMap<FileId, Result<Arc<FileScope>, ImportError>>,
}

impl<'t> ScopeResolver<'t> {
    pub fn new(tree: &'t SpecTree) -> Self {
        Self {
            tree,
            cache: BTreeMap::new(),
        }
    }

    pub fn scope(&mut self, file: FileId) -> Result<Arc<FileScope>, ImportError> {
        let mut stack = Vec::new();
        self.resolve(file, &mut stack)
    }

    fn resolve(
        &mut self,
        file: FileId,
        stack: &mut Vec<FileId>,
    ) -> Result<Arc<FileScope>, ImportError> {
        if let Some(cached) = self.cache.get(&file) {
            return cached.clone();
        }
        if let Some(pos) = stack.iter().position(|f| *f == file) {
            let mut chain: Vec<String> = stack[pos..]
                .iter()
                .map(|f| self.tree.file(*f).path.clone())
                .collect();
            chain.push(self.tree.file(file).path.clone());
            return Err(ImportError::Cycle { chain });
        }

        stack.push(file);
        let result = self.build(file, stack);
        stack.pop();

        self.cache.insert(file, result.clone());
        result
    }

    fn build(
        &mut self,
        file: FileId,
        stack: &mut Vec<FileId>,
    ) -> Result<Arc<FileScope>, ImportError> {
        let tree = self.tree;
        let tf = tree.file(file);

        let mut script_chain: Vec<FileId> = Vec::new();
        let mut variables: BTreeMap<String, String> = BTreeMap::new();
        let mut names: BTreeMap<String, NameEntry> = BTreeMap::new();
        let mut missing_imports = Vec::new();

        for import in &tf.spec.imports {
            let target = resolve_import_path(&tf.path, &import.target)?;
            let Some(target_id) = tree.file_id(&target) else {
                if tree.is_broken(&target) {
                    return Err(ImportError::Broken {
                        importer: tf.path.clone(),
                        target,
                    });
                }
                tracing::warn!(
                    file = %tf.path,
                    line = import.line,
                    target = %target,
                    "imported file not found in tree"
                );
                missing_imports.push(target);
                continue;
            };

            let imported = self.resolve(target_id, stack)?;
            for f in &imported.script_chain {
                if !script_chain.contains(f) {
                    script_chain.push(*f);
                }
            }
            for (k, v) in &imported.variables {
                variables.insert(k.clone(), v.clone());
            }
            for (name, entry) in &imported.names {
                merge_name(&mut names, name, entry);
            }
            missing_imports.extend(imported.missing_imports.iter().cloned());
        }

        for var in &tf.spec.variables {
            variables.insert(var.name.clone(), var.value.clone());
        }
        for (index, block) in tf.spec.blocks.iter().enumerate() {
            if let Some(name) = &block.name {
                names.insert(name.clone(), NameEntry::Block(BlockId { file, index }));
            }
        }
        if !script_chain.contains(&file) {
            script_chain.push(file);
        }
        missing_imports.sort();
        missing_imports.dedup();

        Ok(Arc::new(FileScope {
            file,
            script_chain,
            variables,
            missing_imports,
            names,
        }))
    }
}

fn merge_name(names: &mut BTreeMap<String, NameEntry>, name: &str, incoming: &NameEntry) {
    let Some(existing) = names.get_mut(name) else {
        names.insert(name.to_string(), incoming.clone());
        return;
    };
    let mut ids = match existing {
        NameEntry::Block(id) => vec![*id],
        NameEntry::Ambiguous(ids) => ids.clone(),
    };
    match incoming {
        NameEntry::Block(id) => ids.push(*id),
        NameEntry::Ambiguous(more) => ids.extend(more.iter().copied()),
    }
    ids.sort();
    ids.dedup();
    *existing = if ids.len() == 1 {
        NameEntry::Block(ids[0])
    } else {
        NameEntry::Ambiguous(ids)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_to_importer_dir() {
        assert_eq!(
            resolve_import_path("auth/login.spec", "./shared.spec").unwrap(),
            "auth/shared.spec"
        );
        assert_eq!(
            resolve_import_path("auth/login.spec", "../common/setup.spec").unwrap(),
            "common/setup.spec"
        );
        assert_eq!(
            resolve_import_path("auth/login.spec", "/root.spec").unwrap(),
            "root.spec"
        );
    }

    #[test]
    fn escaping_the_tree_is_an_error() {
        let err = resolve_import_path("login.spec", "../outside.spec").unwrap_err();
        assert!(matches!(err, ImportError::EscapesTree { .. }));
    }
}
