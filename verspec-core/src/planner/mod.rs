//! Dependency resolution: from selected blocks to an ordered set of
//! execution units.

mod dependency;
mod model;

use std::collections::BTreeMap;

pub use model::{
    ExecutionPlan, FileContext, PlanError, PlannedUnit, ResolveError, ResolvedReference, UnitId,
    UnitInstance,
};

use crate::imports::ScopeResolver;
use crate::tree::{BlockId, SpecTree};

/// Resolves the references of `selected` (transitively, through each file's
/// import scope) and orders the resulting units.
///
/// Fails without a plan on any unresolved or ambiguous reference, on a
/// dependency cycle, or when a forced reference would reuse a cached result.
pub fn plan(tree: &SpecTree, selected: &[BlockId]) -> Result<ExecutionPlan, PlanError> {
    let mut selected = selected.to_vec();
    selected.sort();
    selected.dedup();

    let mut resolver = ScopeResolver::new(tree);
    let graph = dependency::resolve_references(tree, &mut resolver, &selected)
        .map_err(|errors| PlanError { errors })?;

    if let Some(cycle) = dependency::find_cycle(&graph) {
        return Err(PlanError {
            errors: vec![ResolveError::DependencyCycle {
                path: cycle.into_iter().map(|b| tree.block_label(b)).collect(),
            }],
        });
    }

    let stale = dependency::check_forced_freshness(tree, &graph);
    if !stale.is_empty() {
        return Err(PlanError { errors: stale });
    }

    let mut builder = dependency::UnitBuilder::new(tree, &graph);
    for &block in &selected {
        builder.select(block);
    }
    let units = builder.finish();

    let order = dependency::topo_sort(&units);
    let levels = dependency::compute_levels(&order, &units);

    let mut files = BTreeMap::new();
    for unit in &units {
        if files.contains_key(&unit.block.file) {
            continue;
        }
        // Scopes of every unit's file resolved cleanly during reference resolution.
        let Ok(scope) = resolver.scope(unit.block.file) else {
            continue;
        };
        files.insert(
            unit.block.file,
            FileContext {
                path: tree.file(unit.block.file).path.clone(),
                variables: scope.variables.clone(),
                script_chain: scope.script_chain.clone(),
            },
        );
    }

    tracing::debug!(
        units = units.len(),
        levels = levels.len(),
        "planned execution"
    );

    Ok(ExecutionPlan {
        units,
        order,
        levels,
        files,
    })
}
