use std::fmt::Write as _;

use crate::dsl::ast::{RequestBlock, Script, SpecFile};

/// Renders the canonical text of a parsed file.
///
/// Output is deterministic and parses back to an equal [`SpecFile`]. File
/// scope is emitted as imports, variables, then scripts, regardless of the
/// order they were written in.
pub fn render_file(file: &SpecFile) -> String {
    let mut out = String::new();

    for import in &file.imports {
        let _ = writeln!(out, "import {}", import.target);
    }
    for var in &file.variables {
        if var.value.is_empty() {
            let _ = writeln!(out, "@{} =", var.name);
        } else {
            let _ = writeln!(out, "@{} = {}", var.name, var.value);
        }
    }
    for script in &file.scripts {
        render_script(&mut out, script);
    }

    for block in &file.blocks {
        if !out.is_empty() {
            out.push('\n');
        }
        render_block(&mut out, block);
    }
    out
}

fn render_block(out: &mut String, block: &RequestBlock) {
    if block.title.is_empty() {
        out.push_str("###\n");
    } else {
        let _ = writeln!(out, "### {}", block.title);
    }
    if let Some(name) = &block.name {
        let _ = writeln!(out, "# name: {name}");
    }
    if !block.tags.is_empty() {
        let _ = writeln!(out, "# tags: {}", block.tags.join(", "));
    }
    for reference in &block.references {
        let _ = writeln!(out, "# {}: {}", reference.kind.directive(), reference.target);
    }
    for comment in &block.comments {
        let _ = writeln!(out, "{comment}");
    }
    if let Some(script) = &block.pre_script {
        render_script(out, script);
    }

    let req = &block.request;
    match &req.http_version {
        Some(v) => {
            let _ = writeln!(out, "{} {} {v}", req.method, req.target);
        }
        None => {
            let _ = writeln!(out, "{} {}", req.method, req.target);
        }
    }
    for header in &block.headers {
        if header.value.is_empty() {
            let _ = writeln!(out, "{}:", header.name);
        } else {
            let _ = writeln!(out, "{}: {}", header.name, header.value);
        }
    }
    if let Some(body) = &block.body {
        out.push('\n');
        out.push_str(body);
        out.push('\n');
    }
    if block.post_script.is_some() || !block.assertions.is_empty() {
        out.push('\n');
    }
    if let Some(script) = &block.post_script {
        render_script(out, script);
    }
    for assertion in &block.assertions {
        let _ = writeln!(out, "?? {assertion}");
    }
}

fn render_script(out: &mut String, script: &Script) {
    out.push_str("{{\n");
    for stmt in &script.statements {
        let _ = writeln!(out, "{stmt}");
    }
    out.push_str("}}\n");
}
