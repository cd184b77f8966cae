use serde::Serialize;
use sha2::{Digest, Sha256};
use verspec_core::versions::{
    load_local_files, materialize, write_generated, Diagnostic, FileAction, WriteOptions,
    WriteReport,
};

use crate::cmd::config::ProjectConfig;
use crate::exit_codes;
use crate::output::{print_error, print_result, print_warning, OutputFormat};
use crate::GlobalArgs;

#[derive(Serialize)]
struct MaterializeResult {
    dry_run: bool,
    versions: Vec<VersionResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<Diagnostic>,
}

#[derive(Serialize)]
struct VersionResult {
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    files: Vec<FileResult>,
}

#[derive(Serialize)]
struct FileResult {
    path: String,
    action: FileAction,
    /// Digest of the generated content, for files the tree still contains.
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
}

pub fn materialize_cmd(global: &GlobalArgs, requested: &[String], dry_run: bool, clean: bool) -> i32 {
    let out = &global.output;

    let config = match ProjectConfig::load(&global.root) {
        Ok(c) => c,
        Err(e) => {
            print_error(out.format, out.quiet, &e.to_string());
            return exit_codes::FAILED;
        }
    };
    let graph = match config.version_graph() {
        Ok(g) => g,
        Err(e) => {
            print_error(out.format, out.quiet, &e.to_string());
            return exit_codes::FAILED;
        }
    };
    for id in requested {
        if let Err(e) = graph.require(id) {
            print_error(out.format, out.quiet, &e.to_string());
            return exit_codes::INVALID_INVOCATION;
        }
    }

    let load = match load_local_files(&global.root, &graph) {
        Ok(l) => l,
        Err(e) => {
            print_error(out.format, out.quiet, &e.to_string());
            return exit_codes::FAILED;
        }
    };
    if !load.errors.is_empty() {
        for err in &load.errors {
            print_error(out.format, out.quiet, &err.to_string());
        }
        return exit_codes::FAILED;
    }

    let materialized = materialize(&graph, &load.files);
    if out.format == OutputFormat::Text {
        for w in &materialized.warnings {
            print_warning(out.format, out.quiet, &w.to_string());
        }
    }

    let opts = WriteOptions { dry_run, clean };
    let mut versions = Vec::new();
    for node in graph.topo_order() {
        if !requested.is_empty() && !requested.contains(&node.id) {
            continue;
        }
        let Some(tree) = materialized.trees.get(&node.id) else {
            continue;
        };
        let report = match write_generated(&global.root, tree, &opts) {
            Ok(r) => r,
            Err(e) => {
                print_error(out.format, out.quiet, &e.to_string());
                return exit_codes::FAILED;
            }
        };
        let rendered = tree.render_generated();
        versions.push(VersionResult {
            version: node.id.clone(),
            parent: tree.parent.clone(),
            files: report
                .files
                .iter()
                .map(|f| FileResult {
                    path: f.path.clone(),
                    action: f.action,
                    sha256: rendered.get(&f.path).map(|text| hex::encode(Sha256::digest(text.as_bytes()))),
                })
                .collect(),
        });
        if out.format == OutputFormat::Text && !out.quiet {
            print_text(&report, dry_run);
        }
    }

    if out.format != OutputFormat::Text {
        let result = MaterializeResult {
            dry_run,
            versions,
            warnings: materialized.warnings,
        };
        print_result(out.format, out.quiet, &result);
    }
    exit_codes::SUCCESS
}

fn print_text(report: &WriteReport, dry_run: bool) {
    let prefix = if dry_run { "(dry run) " } else { "" };
    let counted = [
        (FileAction::Created, "created"),
        (FileAction::Updated, "updated"),
        (FileAction::Unchanged, "unchanged"),
        (FileAction::Stale, "stale"),
        (FileAction::Removed, "removed"),
        (FileAction::KeptLocal, "kept local"),
    ];
    let summary: Vec<String> = counted
        .iter()
        .filter_map(|(action, label)| {
            let n = report.count(*action);
            (n > 0).then(|| format!("{n} {label}"))
        })
        .collect();
    let summary = if summary.is_empty() {
        "nothing to generate".to_string()
    } else {
        summary.join(", ")
    };
    println!("{prefix}{}: {summary}", report.version);
    for f in &report.files {
        if f.action != FileAction::Unchanged {
            println!("  {:<10} {}", format!("{:?}", f.action).to_lowercase(), f.path);
        }
    }
}
