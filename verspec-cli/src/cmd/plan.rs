use verspec_core::dsl::ReferenceKind;
use verspec_core::ExecutionPlan;

use crate::cmd::prepare::prepare;
use crate::exit_codes;
use crate::output::{print_result, OutputFormat};
use crate::{GlobalArgs, SelectionArgs};

pub fn plan_cmd(global: &GlobalArgs, selection: &SelectionArgs) -> i32 {
    let out = &global.output;
    let prepared = match prepare(global, selection) {
        Ok((_, p)) => p,
        Err(code) => return code,
    };

    if out.quiet {
        return exit_codes::SUCCESS;
    }
    match out.format {
        OutputFormat::Json => print_result(out.format, false, prepared.plan.as_ref()),
        OutputFormat::Dot => print!("{}", prepared.plan.to_dot(&prepared.version)),
        OutputFormat::Text => print_text(&prepared.plan),
    }
    exit_codes::SUCCESS
}

fn print_text(plan: &ExecutionPlan) {
    for (i, level) in plan.levels.iter().enumerate() {
        println!("level {i}:");
        for id in level {
            let unit = plan.unit(*id);
            let mut notes = Vec::new();
            if !unit.selected {
                notes.push("dependency".to_string());
            }
            if unit.cached_target {
                notes.push("cached".to_string());
            }
            for r in &unit.references {
                let how = match r.kind {
                    ReferenceKind::Cached => "ref",
                    ReferenceKind::Forced => "forceRef",
                };
                notes.push(format!("{how} {}", r.unit));
            }
            let notes = if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            };
            println!("  {id} {}{notes}", unit.display_name());
        }
    }
    println!("{} unit(s)", plan.len());
}
