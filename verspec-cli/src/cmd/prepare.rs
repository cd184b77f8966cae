use std::path::Path;
use std::sync::Arc;

use verspec_core::versions::{
    apply_tag_rules, load_local_files, materialize, out_of_date, FileAction, VersionGraph,
    VersionNode,
};
use verspec_core::{load_subtree, load_tree, plan, ExecutionPlan, Selector, SpecTree, TagExpr};

use crate::cmd::config::ProjectConfig;
use crate::exit_codes;
use crate::output::print_error;
use crate::{GlobalArgs, SelectionArgs};

/// A loaded version tree and the plan for the selected blocks.
pub struct Prepared {
    pub version: String,
    pub tree: Arc<SpecTree>,
    pub plan: Arc<ExecutionPlan>,
}

/// Loads the project config, the version's tree and resolves the selection.
/// On error the message has been printed and the exit code is returned.
pub fn prepare(global: &GlobalArgs, selection: &SelectionArgs) -> Result<(ProjectConfig, Prepared), i32> {
    let out = &global.output;
    let fail = |code: i32, message: &str| {
        print_error(out.format, out.quiet, message);
        code
    };

    let config = ProjectConfig::load(&global.root).map_err(|e| fail(exit_codes::FAILED, &e.to_string()))?;
    let graph = config
        .version_graph()
        .map_err(|e| fail(exit_codes::FAILED, &e.to_string()))?;
    let node = graph
        .require(&selection.version)
        .map_err(|e| fail(exit_codes::INVALID_INVOCATION, &e.to_string()))?;

    let dir = global.root.join(&node.id);
    if !dir.is_dir() {
        return Err(fail(
            exit_codes::FAILED,
            &format!(
                "{} does not exist; run `verspec materialize {}` first",
                dir.display(),
                node.id
            ),
        ));
    }

    let (selector, scope) =
        build_selector(&dir, selection).map_err(|m| fail(exit_codes::INVALID_INVOCATION, &m))?;
    check_generated(global, &graph, node)?;

    let loaded = match &scope {
        Some(prefix) => load_subtree(&dir, prefix),
        None => load_tree(&dir),
    };
    let mut tree = loaded.map_err(|e| fail(exit_codes::FAILED, &e.to_string()))?;
    if !tree.broken().is_empty() {
        for err in tree.broken().values() {
            print_error(out.format, out.quiet, &err.to_string());
        }
        return Err(exit_codes::FAILED);
    }
    apply_tag_rules(node, &mut tree);

    let selected = selector.select(&tree);
    if selected.is_empty() {
        return Err(fail(
            exit_codes::INVALID_INVOCATION,
            &format!("no blocks in `{}` match `{}`", node.id, selection.target),
        ));
    }
    tracing::debug!(version = %node.id, selected = selected.len(), "selection resolved");

    let plan = plan(&tree, &selected).map_err(|e| {
        for err in &e.errors {
            print_error(out.format, out.quiet, &err.to_string());
        }
        exit_codes::FAILED
    })?;

    Ok((
        config,
        Prepared {
            version: node.id.clone(),
            tree: Arc::new(tree),
            plan: Arc::new(plan),
        },
    ))
}

/// Refuses to run a version whose generated files on disk disagree with what
/// materializing it now would produce. Local parse errors in the version or
/// its ancestors are fatal.
fn check_generated(global: &GlobalArgs, graph: &VersionGraph, node: &VersionNode) -> Result<(), i32> {
    let out = &global.output;
    let load = load_local_files(&global.root, graph).map_err(|e| {
        print_error(out.format, out.quiet, &e.to_string());
        exit_codes::FAILED
    })?;

    let mut chain = graph.ancestors(&node.id);
    chain.push(node.id.as_str());
    let relevant: Vec<_> = load
        .errors
        .iter()
        .filter(|e| chain.iter().any(|id| e.path.starts_with(&format!("{id}/"))))
        .collect();
    if !relevant.is_empty() {
        for err in relevant {
            print_error(out.format, out.quiet, &err.to_string());
        }
        return Err(exit_codes::FAILED);
    }

    let materialized = materialize(graph, &load.files);
    for warning in &materialized.warnings {
        tracing::warn!("{warning}");
    }
    let Some(effective) = materialized.trees.get(&node.id) else {
        return Ok(());
    };
    let pending = out_of_date(&global.root, effective).map_err(|e| {
        print_error(out.format, out.quiet, &e.to_string());
        exit_codes::FAILED
    })?;
    if pending.is_empty() {
        return Ok(());
    }

    for file in &pending {
        let state = match file.action {
            FileAction::Created => "missing",
            FileAction::Updated => "modified or outdated",
            FileAction::Stale => "no longer inherited",
            _ => "out of date",
        };
        print_error(
            out.format,
            out.quiet,
            &format!("{}/{}: generated file is {state}", node.id, file.path),
        );
    }
    print_error(
        out.format,
        out.quiet,
        &format!(
            "generated files of `{}` are out of date; run `verspec materialize {} --clean` first",
            node.id, node.id
        ),
    );
    Err(exit_codes::FAILED)
}

/// The target is a path when it names something under the version directory
/// (or looks like one); otherwise it is a tag expression. `--tag` values are
/// AND-ed onto either. A path target is also returned so only that subtree
/// (and what it imports) needs loading.
fn build_selector(
    version_dir: &Path,
    selection: &SelectionArgs,
) -> Result<(Selector, Option<String>), String> {
    let target = selection.target.trim();
    let mut selector = Selector::all();
    let mut scope = None;

    let as_path = target.trim_start_matches("./").trim_end_matches('/');
    if as_path.is_empty() || as_path == "." {
        // the whole version
    } else if version_dir.join(as_path).exists() || target.ends_with(".spec") || target.ends_with('/') {
        selector = selector.with_path(as_path);
        scope = Some(as_path.to_string());
    } else {
        selector = selector.with_tags(TagExpr::parse(target).map_err(|e| e.to_string())?);
    }

    for expr in &selection.tags {
        selector = selector.with_tags(TagExpr::parse(expr).map_err(|e| e.to_string())?);
    }
    Ok((selector, scope))
}
