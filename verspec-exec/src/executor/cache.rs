use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::OnceCell;
use verspec_core::{BlockId, FileId};

use crate::executor::eval::BlockResult;

/// Results of cached-ref targets for the rest of the session. Write-once:
/// the first completion for a block wins.
#[derive(Default)]
pub struct ResultCache {
    inner: RwLock<HashMap<BlockId, Arc<BlockResult>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the block already had a result.
    pub fn insert_once(&self, block: BlockId, result: Arc<BlockResult>) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(&block) {
            return false;
        }
        map.insert(block, result);
        true
    }

    pub fn get(&self, block: BlockId) -> Option<Arc<BlockResult>> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(&block).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Variables written by `set`, visible to every later unit of the session.
#[derive(Default)]
pub struct SessionVariables {
    inner: RwLock<BTreeMap<String, String>>,
}

impl SessionVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: &str) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Runs each file's file-scope scripts at most once per session. Concurrent
/// callers for the same file wait for the first run and share its outcome.
#[derive(Default)]
pub struct FileScriptGate {
    cells: Mutex<HashMap<FileId, Arc<OnceCell<Result<(), String>>>>>,
}

impl FileScriptGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_once<F, Fut>(&self, file: FileId, init: F) -> Result<(), String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            cells.entry(file).or_default().clone()
        };
        cell.get_or_init(init).await.clone()
    }
}
