use serde::Serialize;
use verspec_exec::{RunReport, UnitOutcome, UnitReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Dot,
}

pub fn print_result<T: Serialize>(format: OutputFormat, quiet: bool, result: &T) {
    if quiet {
        return;
    }
    match format {
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string(result) {
                println!("{json}");
            }
        }
        // Commands with a real text or DOT rendering handle those themselves.
        OutputFormat::Text | OutputFormat::Dot => {
            if let Ok(json) = serde_json::to_string_pretty(result) {
                println!("{json}");
            }
        }
    }
}

pub fn print_error(format: OutputFormat, quiet: bool, message: &str) {
    if quiet {
        return;
    }
    match format {
        OutputFormat::Json => {
            let err = serde_json::json!({"error": message});
            eprintln!("{}", serde_json::to_string(&err).unwrap_or_default());
        }
        OutputFormat::Text | OutputFormat::Dot => eprintln!("error: {message}"),
    }
}

pub fn print_warning(format: OutputFormat, quiet: bool, message: &str) {
    if quiet {
        return;
    }
    match format {
        OutputFormat::Json => {
            let warn = serde_json::json!({"warning": message});
            eprintln!("{}", serde_json::to_string(&warn).unwrap_or_default());
        }
        OutputFormat::Text | OutputFormat::Dot => eprintln!("warning: {message}"),
    }
}

pub fn print_run_report(report: &RunReport) {
    for unit in &report.units {
        print_unit(unit);
    }
    println!();
    println!(
        "{} passed, {} failed, {} skipped, {} errored in {} ms",
        report.passed, report.failed, report.skipped, report.errored, report.duration_ms
    );
    if let Some(reason) = &report.halted {
        println!("{reason}");
    }
}

fn print_unit(unit: &UnitReport) {
    let tag = match unit.outcome {
        UnitOutcome::Passed => "PASS",
        UnitOutcome::Failed => "FAIL",
        UnitOutcome::Skipped => "SKIP",
        UnitOutcome::Errored => "ERR ",
    };
    let fresh = if unit.instance == verspec_core::planner::UnitInstance::Shared {
        ""
    } else {
        " (fresh)"
    };
    println!("{tag} {}{fresh} [{} ms]", unit.label, unit.duration_ms);

    if let Some(failure) = &unit.failure {
        println!("     {}", failure.message);
    }
    if unit.outcome == UnitOutcome::Failed {
        for a in &unit.assertions {
            let mark = if a.passed { "ok  " } else { "fail" };
            match &a.error {
                Some(err) => println!("     {mark} {}:{} {}: {err}", unit.file, a.line, a.expression),
                None => println!(
                    "     {mark} {}:{} {} (actual {})",
                    unit.file,
                    a.line,
                    a.expression,
                    a.actual_text()
                ),
            }
        }
    }
    for line in &unit.logs {
        println!("     log: {line}");
    }
}
