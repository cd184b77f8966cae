use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::dsl::ReferenceKind;
use crate::imports::{Lookup, ScopeResolver};
use crate::planner::model::{
    PlannedUnit, ResolveError, ResolvedReference, UnitId, UnitInstance,
};
use crate::tree::{BlockId, SpecTree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edge {
    pub name: String,
    pub kind: ReferenceKind,
    pub target: BlockId,
}

/// Block-level reference graph over the selection and everything it reaches.
pub(crate) type BlockGraph = BTreeMap<BlockId, Vec<Edge>>;

/// Walks references breadth-first from `roots`, resolving each name through
/// the referring file's import scope.
pub(crate) fn resolve_references(
    tree: &SpecTree,
    resolver: &mut ScopeResolver<'_>,
    roots: &[BlockId],
) -> Result<BlockGraph, Vec<ResolveError>> {
    let mut graph: BlockGraph = BTreeMap::new();
    let mut errors = Vec::new();
    let mut failed_files = BTreeSet::new();
    let mut queue: VecDeque<BlockId> = roots.iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        if graph.contains_key(&id) {
            continue;
        }
        let file = tree.file(id.file);
        let block = tree.block(id);
        let mut edges = Vec::with_capacity(block.references.len());

        let scope = match resolver.scope(id.file) {
            Ok(scope) => scope,
            Err(source) => {
                if failed_files.insert(id.file) {
                    errors.push(ResolveError::Import {
                        file: file.path.clone(),
                        source,
                    });
                }
                graph.insert(id, edges);
                continue;
            }
        };

        for reference in &block.references {
            match scope.lookup(&reference.target) {
                Lookup::Found(target) => {
                    edges.push(Edge {
                        name: reference.target.clone(),
                        kind: reference.kind,
                        target,
                    });
                    if !graph.contains_key(&target) {
                        queue.push_back(target);
                    }
                }
                Lookup::NotFound => {
                    let hint = (!scope.missing_imports.is_empty()).then(|| {
                        format!("missing import: {}", scope.missing_imports.join(", "))
                    });
                    errors.push(ResolveError::ReferenceNotFound {
                        name: reference.target.clone(),
                        file: file.path.clone(),
                        block: block.label().to_string(),
                        line: reference.line,
                        hint,
                    });
                }
                Lookup::Ambiguous(ids) => {
                    errors.push(ResolveError::AmbiguousReference {
                        name: reference.target.clone(),
                        file: file.path.clone(),
                        block: block.label().to_string(),
                        line: reference.line,
                        candidates: ids.into_iter().map(|b| tree.block_label(b)).collect(),
                    });
                }
            }
        }
        graph.insert(id, edges);
    }

    if errors.is_empty() {
        Ok(graph)
    } else {
        Err(errors)
    }
}

/// Depth-first search with a recursion stack; returns the first cycle found
/// as a closed path (`a -> b -> a`).
pub(crate) fn find_cycle(graph: &BlockGraph) -> Option<Vec<BlockId>> {
    let mut visited = BTreeSet::new();
    let mut stack = Vec::new();
    for &node in graph.keys() {
        if !visited.contains(&node) {
            if let Some(cycle) = dfs_cycle(graph, node, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_cycle(
    graph: &BlockGraph,
    node: BlockId,
    visited: &mut BTreeSet<BlockId>,
    stack: &mut Vec<BlockId>,
) -> Option<Vec<BlockId>> {
    visited.insert(node);
    stack.push(node);
    for edge in graph.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
        if let Some(pos) = stack.iter().position(|n| *n == edge.target) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(edge.target);
            return Some(cycle);
        }
        if !visited.contains(&edge.target) {
            if let Some(cycle) = dfs_cycle(graph, edge.target, visited, stack) {
                return Some(cycle);
            }
        }
    }
    stack.pop();
    None
}

/// Every block reached through a forced reference must itself only use forced
/// references, otherwise a fresh run would consume a cached result.
pub(crate) fn check_forced_freshness(tree: &SpecTree, graph: &BlockGraph) -> Vec<ResolveError> {
    let mut errors = Vec::new();
    let mut reported = BTreeSet::new();
    let mut checked = BTreeSet::new();
    let mut pending: Vec<(BlockId, BlockId)> = Vec::new();

    for (&consumer, edges) in graph {
        for edge in edges.iter().filter(|e| e.kind == ReferenceKind::Forced) {
            pending.push((consumer, edge.target));
        }
    }

    while let Some((consumer, target)) = pending.pop() {
        if !checked.insert((consumer, target)) {
            continue;
        }
        for edge in graph.get(&target).map(Vec::as_slice).unwrap_or(&[]) {
            match edge.kind {
                ReferenceKind::Forced => pending.push((target, edge.target)),
                ReferenceKind::Cached => {
                    if reported.insert((target, edge.target)) {
                        errors.push(ResolveError::StaleForcedRef {
                            consumer: tree.block_label(consumer),
                            target: tree.block_label(target),
                            dependency: tree.block_label(edge.target),
                        });
                    }
                }
            }
        }
    }

    errors.sort_by_key(|e| e.to_string());
    errors
}

/// Expands the block graph into execution units: one shared unit per
/// selected or cached-ref target block, one fresh unit per forced reference.
pub(crate) struct UnitBuilder<'a> {
    tree: &'a SpecTree,
    graph: &'a BlockGraph,
    units: Vec<PlannedUnit>,
    shared: BTreeMap<BlockId, UnitId>,
}

impl<'a> UnitBuilder<'a> {
    pub fn new(tree: &'a SpecTree, graph: &'a BlockGraph) -> Self {
        Self {
            tree,
            graph,
            units: Vec::new(),
            shared: BTreeMap::new(),
        }
    }

    pub fn select(&mut self, block: BlockId) {
        let id = self.shared_unit(block);
        self.units[id.0].selected = true;
    }

    pub fn finish(self) -> Vec<PlannedUnit> {
        self.units
    }

    fn push(&mut self, block: BlockId, instance: UnitInstance) -> UnitId {
        let id = UnitId(self.units.len());
        self.units.push(PlannedUnit {
            id,
            block,
            label: self.tree.block_label(block),
            instance,
            selected: false,
            cached_target: false,
            references: Vec::new(),
            depends_on: Vec::new(),
        });
        id
    }

    fn shared_unit(&mut self, block: BlockId) -> UnitId {
        if let Some(&id) = self.shared.get(&block) {
            return id;
        }
        let id = self.push(block, UnitInstance::Shared);
        self.shared.insert(block, id);
        self.wire(id);
        id
    }

    fn fresh_unit(&mut self, block: BlockId, consumer: UnitId) -> UnitId {
        let id = self.push(block, UnitInstance::Fresh { consumer });
        self.wire(id);
        id
    }

    fn wire(&mut self, id: UnitId) {
        let block = self.units[id.0].block;
        let edges = self.graph.get(&block).cloned().unwrap_or_default();
        let mut references = Vec::with_capacity(edges.len());
        for edge in edges {
            let unit = match edge.kind {
                ReferenceKind::Cached => {
                    let u = self.shared_unit(edge.target);
                    self.units[u.0].cached_target = true;
                    u
                }
                ReferenceKind::Forced => self.fresh_unit(edge.target, id),
            };
            references.push(ResolvedReference {
                name: edge.name,
                kind: edge.kind,
                unit,
            });
        }
        let mut depends_on: Vec<UnitId> = references.iter().map(|r| r.unit).collect();
        depends_on.sort();
        depends_on.dedup();
        let unit = &mut self.units[id.0];
        unit.references = references;
        unit.depends_on = depends_on;
    }
}

/// Kahn's algorithm; among ready units the lowest (file, block, instance)
/// key goes first.
pub(crate) fn topo_sort(units: &[PlannedUnit]) -> Vec<UnitId> {
    let key = |u: &PlannedUnit| (u.block, u.is_fresh(), u.id);
    let mut indeg: Vec<usize> = units.iter().map(|u| u.depends_on.len()).collect();
    let mut outgoing: BTreeMap<UnitId, Vec<UnitId>> = BTreeMap::new();
    for u in units {
        for d in &u.depends_on {
            outgoing.entry(*d).or_default().push(u.id);
        }
    }

    let mut ready: BTreeSet<(BlockId, bool, UnitId)> = units
        .iter()
        .filter(|u| u.depends_on.is_empty())
        .map(key)
        .collect();

    let mut out = Vec::with_capacity(units.len());
    while let Some((_, _, id)) = ready.pop_first() {
        out.push(id);
        for next in outgoing.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            let e = &mut indeg[next.0];
            *e -= 1;
            if *e == 0 {
                ready.insert(key(&units[next.0]));
            }
        }
    }
    out
}

pub(crate) fn compute_levels(topo: &[UnitId], units: &[PlannedUnit]) -> Vec<Vec<UnitId>> {
    let mut level: BTreeMap<UnitId, usize> = BTreeMap::new();
    for id in topo {
        let l = units[id.0]
            .depends_on
            .iter()
            .filter_map(|d| level.get(d).copied())
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        level.insert(*id, l);
    }

    if topo.is_empty() {
        return Vec::new();
    }
    let max_level = level.values().copied().max().unwrap_or(0);
    let mut levels = vec![Vec::<UnitId>::new(); max_level + 1];
    for id in topo {
        levels[level[id]].push(*id);
    }
    levels
}
