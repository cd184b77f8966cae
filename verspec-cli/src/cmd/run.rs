use std::sync::Arc;

use verspec_exec::executor::{
    CompositeEventSink, ReqwestHttpClient, StdoutEventSink, TracingEventSink,
};
use verspec_exec::Executor;

use crate::cmd::config::build_executor_config;
use crate::cmd::prepare::prepare;
use crate::exit_codes;
use crate::output::{print_error, print_result, print_run_report, OutputFormat};
use crate::{EventsMode, ExecArgs, GlobalArgs, SelectionArgs};

pub async fn run_cmd(global: &GlobalArgs, selection: &SelectionArgs, exec: &ExecArgs) -> i32 {
    let out = &global.output;

    let (config, prepared) = match prepare(global, selection) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let executor_config = match build_executor_config(exec, &config) {
        Ok(c) => c,
        Err(e) => {
            print_error(out.format, out.quiet, &e.to_string());
            return exit_codes::INVALID_INVOCATION;
        }
    };

    let http = match ReqwestHttpClient::new() {
        Ok(c) => c,
        Err(e) => {
            print_error(out.format, out.quiet, &e.to_string());
            return exit_codes::FAILED;
        }
    };

    let mut sink = CompositeEventSink::new();
    sink.add(Box::new(TracingEventSink));
    if exec.events == EventsMode::Stdout {
        sink.add(Box::new(StdoutEventSink));
    }

    tracing::info!(
        version = %prepared.version,
        units = prepared.plan.len(),
        "starting run"
    );
    let executor = Executor::new(executor_config, Arc::new(http), Arc::new(sink));
    let report = match executor.execute(prepared.tree, prepared.plan).await {
        Ok(r) => r,
        Err(e) => {
            print_error(out.format, out.quiet, &e.to_string());
            return exit_codes::FAILED;
        }
    };

    match out.format {
        OutputFormat::Text if !out.quiet => print_run_report(&report),
        OutputFormat::Text => {}
        OutputFormat::Json | OutputFormat::Dot => print_result(OutputFormat::Json, out.quiet, &report),
    }

    if report.is_success() {
        exit_codes::SUCCESS
    } else {
        exit_codes::FAILED
    }
}
