use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use url::Url;
use uuid::Uuid;
use verspec_core::dsl::{RequestBlock, ScriptPhase};
use verspec_core::expressions::TemplateError;
use verspec_core::{ExecutionPlan, FileId, SpecTree, UnitId};

use crate::executor::assertions::evaluate_assertion;
use crate::executor::cache::{FileScriptGate, SessionVariables};
use crate::executor::concurrency::ConcurrencyPermit;
use crate::executor::eval::{BlockResult, ResponseData, VarEnv};
use crate::executor::events::{Event, EventSink};
use crate::executor::http::{HttpClient, HttpError, HttpRequest};
use crate::executor::result::{Failure, FailureKind, UnitOutcome, UnitReport};
use crate::executor::script::{ScriptEngine, ScriptScope};
use crate::executor::types::ExecutorConfig;

/// Session-wide collaborators shared by every unit.
#[derive(Clone)]
pub(crate) struct WorkerDeps {
    pub config: Arc<ExecutorConfig>,
    pub http: Arc<dyn HttpClient>,
    pub event_sink: Arc<dyn EventSink>,
    pub engine: Arc<dyn ScriptEngine>,
    pub session: Arc<SessionVariables>,
    pub file_scripts: Arc<FileScriptGate>,
}

pub(crate) struct UnitJob {
    pub session_id: Uuid,
    pub unit: UnitId,
    pub tree: Arc<SpecTree>,
    pub plan: Arc<ExecutionPlan>,
    /// Results of the unit's references, keyed by the name used in the block.
    pub refs: BTreeMap<String, Arc<BlockResult>>,
}

pub(crate) struct UnitRun {
    pub report: UnitReport,
    pub result: Option<Arc<BlockResult>>,
    /// Set when the session cannot go on (the target is unreachable).
    pub fatal: Option<String>,
}

struct BlockFailure {
    failure: Failure,
    fatal: bool,
}

impl From<Failure> for BlockFailure {
    fn from(failure: Failure) -> Self {
        Self {
            failure,
            fatal: false,
        }
    }
}

/// A report for `unit` with no execution details filled in yet.
pub(crate) fn blank_report(tree: &SpecTree, plan: &ExecutionPlan, unit: UnitId) -> UnitReport {
    let planned = plan.unit(unit);
    UnitReport {
        unit,
        label: planned.label.clone(),
        file: tree.file(planned.block.file).path.clone(),
        line: tree.block(planned.block).line,
        instance: planned.instance,
        selected: planned.selected,
        outcome: UnitOutcome::Passed,
        failure: None,
        request: None,
        status: None,
        duration_ms: 0,
        assertions: Vec::new(),
        logs: Vec::new(),
    }
}

pub(crate) async fn run_unit(job: UnitJob, deps: WorkerDeps, _permit: ConcurrencyPermit) -> UnitRun {
    let mut report = blank_report(&job.tree, &job.plan, job.unit);
    deps.event_sink
        .emit(Event::UnitStarted {
            session_id: job.session_id,
            unit: job.unit,
            label: report.label.clone(),
        })
        .await;

    let started = Instant::now();
    let (result, fatal) = match execute_block(&job, &deps, &mut report).await {
        Ok(result) => (Some(result), None),
        Err(BlockFailure { failure, fatal }) => {
            report.outcome = if fatal {
                UnitOutcome::Errored
            } else {
                UnitOutcome::Failed
            };
            let fatal = fatal.then(|| failure.message.clone());
            report.failure = Some(failure);
            (None, fatal)
        }
    };
    report.duration_ms = started.elapsed().as_millis() as u64;

    deps.event_sink
        .emit(Event::UnitFinished {
            session_id: job.session_id,
            unit: job.unit,
            label: report.label.clone(),
            outcome: report.outcome,
            duration_ms: report.duration_ms,
        })
        .await;

    UnitRun {
        report,
        result,
        fatal,
    }
}

async fn execute_block(
    job: &UnitJob,
    deps: &WorkerDeps,
    report: &mut UnitReport,
) -> Result<Arc<BlockResult>, BlockFailure> {
    let planned = job.plan.unit(job.unit);
    let file = planned.block.file;
    let block = job.tree.block(planned.block);

    run_file_scripts(job, deps, file).await?;

    let mut vars = base_variables(job, &deps.config, &deps.session, file);
    let mut exports = BTreeMap::new();

    if let Some(script) = &block.pre_script {
        let mut scope = ScriptScope {
            phase: ScriptPhase::PreRequest,
            vars: &mut vars,
            session: &deps.session,
            exports: &mut exports,
            refs: &job.refs,
            response: None,
            logs: &mut report.logs,
        };
        deps.engine
            .run(script, &mut scope)
            .map_err(|e| Failure::new(FailureKind::Script, e.to_string()))?;
    }

    let request = build_request(block, &vars, &job.refs, &deps.config, report)?;
    report.request = Some(format!("{} {}", request.method, request.url));
    tracing::debug!(unit = %report.label, request = ?report.request, "sending request");

    let sent = Instant::now();
    let response = deps
        .http
        .send(request, deps.config.timeout, deps.config.max_response_bytes)
        .await
        .map_err(|e| match e {
            HttpError::Timeout => BlockFailure::from(Failure::new(
                FailureKind::Timeout,
                format!("no response within {} ms", deps.config.timeout.as_millis()),
            )),
            HttpError::Network(message) => BlockFailure {
                failure: Failure::new(FailureKind::Network, message),
                fatal: true,
            },
            other => Failure::new(FailureKind::Http, other.to_string()).into(),
        })?;
    let response = ResponseData::new(
        response.status,
        response.headers,
        &response.body,
        sent.elapsed().as_millis() as u64,
    );
    report.status = Some(response.status);

    if let Some(script) = &block.post_script {
        let mut scope = ScriptScope {
            phase: ScriptPhase::PostResponse,
            vars: &mut vars,
            session: &deps.session,
            exports: &mut exports,
            refs: &job.refs,
            response: Some(&response),
            logs: &mut report.logs,
        };
        deps.engine
            .run(script, &mut scope)
            .map_err(|e| Failure::new(FailureKind::Script, e.to_string()))?;
    }

    let env = VarEnv::new(&vars, &job.refs, Some(&response));
    for assertion in &block.assertions {
        let result = evaluate_assertion(assertion, &response, &env);
        if !result.passed {
            deps.event_sink
                .emit(Event::AssertionFailed {
                    session_id: job.session_id,
                    unit: job.unit,
                    label: report.label.clone(),
                    expression: result.expression.clone(),
                    expected: result.expected.clone(),
                    actual: result
                        .error
                        .clone()
                        .unwrap_or_else(|| result.actual_text()),
                })
                .await;
        }
        report.assertions.push(result);
    }

    if let Some(failed) = report.assertions.iter().find(|a| !a.passed) {
        let message = match &failed.error {
            Some(error) => format!("line {}: `{}`: {error}", failed.line, failed.expression),
            None => format!(
                "line {}: `{}`: expected {} {}, got {}",
                failed.line,
                failed.expression,
                failed.op,
                failed.expected,
                failed.actual_text()
            ),
        };
        return Err(Failure::new(FailureKind::Assertion, message).into());
    }

    Ok(Arc::new(BlockResult { response, exports }))
}

/// Runs the file-scope scripts of the unit's file and of everything it
/// imports, each file at most once per session.
async fn run_file_scripts(job: &UnitJob, deps: &WorkerDeps, file: FileId) -> Result<(), BlockFailure> {
    let chain = job
        .plan
        .file_context(file)
        .map(|ctx| ctx.script_chain.clone())
        .unwrap_or_else(|| vec![file]);

    for f in chain {
        let scripts = &job.tree.file(f).spec.scripts;
        if scripts.is_empty() {
            continue;
        }
        let path = &job.tree.file(f).path;
        deps.file_scripts
            .run_once(f, || async move {
                let mut vars = base_variables(job, &deps.config, &deps.session, f);
                let mut exports = BTreeMap::new();
                let mut logs = Vec::new();
                let refs = BTreeMap::new();
                for script in scripts {
                    let mut scope = ScriptScope {
                        phase: ScriptPhase::File,
                        vars: &mut vars,
                        session: &deps.session,
                        exports: &mut exports,
                        refs: &refs,
                        response: None,
                        logs: &mut logs,
                    };
                    deps.engine
                        .run(script, &mut scope)
                        .map_err(|e| e.to_string())?;
                }
                Ok(())
            })
            .await
            .map_err(|e| Failure::new(FailureKind::Script, format!("{path}: {e}")))?;
    }
    Ok(())
}

/// Config variables, overridden by the file's scope, overridden by `set`.
fn base_variables(
    job: &UnitJob,
    config: &ExecutorConfig,
    session: &SessionVariables,
    file: FileId,
) -> BTreeMap<String, String> {
    let mut vars = config.variables.clone();
    match job.plan.file_context(file) {
        Some(ctx) => vars.extend(ctx.variables.clone()),
        None => vars.extend(
            job.tree
                .file(file)
                .spec
                .variables
                .iter()
                .map(|v| (v.name.clone(), v.value.clone())),
        ),
    }
    vars.extend(session.snapshot());
    vars
}

fn build_request(
    block: &RequestBlock,
    vars: &BTreeMap<String, String>,
    refs: &BTreeMap<String, Arc<BlockResult>>,
    config: &ExecutorConfig,
    report: &UnitReport,
) -> Result<HttpRequest, Failure> {
    let env = VarEnv::new(vars, refs, None);
    let interpolate = |text: &str, location: &str| {
        env.render(text)
            .map_err(|e| interpolation_failure(e, location, report))
    };

    let target = interpolate(&block.request.target, "request line")?;
    let mut headers = Vec::with_capacity(block.headers.len());
    for header in &block.headers {
        let location = format!("header `{}`", header.name);
        headers.push((
            interpolate(&header.name, &location)?,
            interpolate(&header.value, &location)?,
        ));
    }
    let body = block
        .body
        .as_deref()
        .map(|b| interpolate(b, "body"))
        .transpose()?;

    let url = resolve_url(&target, config.base_url.as_ref())
        .map_err(|message| Failure::new(FailureKind::InvalidRequest, message))?;

    Ok(HttpRequest {
        method: block.request.method.as_str().to_string(),
        url,
        headers,
        body,
    })
}

fn interpolation_failure(error: TemplateError, location: &str, report: &UnitReport) -> Failure {
    let kind = match error {
        TemplateError::Unresolved(_) => FailureKind::UnresolvedVariable,
        _ => FailureKind::InvalidRequest,
    };
    Failure::new(
        kind,
        format!(
            "{error} in {location} of `{}` ({}:{})",
            report.label, report.file, report.line
        ),
    )
}

/// Absolute `http(s)` targets are used as written; anything else is resolved
/// against the base URL. A leading `/` keeps the base URL's path prefix.
pub(crate) fn resolve_url(target: &str, base: Option<&Url>) -> Result<String, String> {
    if target.starts_with("http://") || target.starts_with("https://") {
        return Url::parse(target)
            .map(|u| u.to_string())
            .map_err(|e| format!("invalid URL `{target}`: {e}"));
    }
    let Some(base) = base else {
        return Err(format!(
            "`{target}` is not an absolute URL and no base URL is configured"
        ));
    };
    if target.starts_with('/') {
        let joined = format!("{}{target}", base.as_str().trim_end_matches('/'));
        return Url::parse(&joined)
            .map(|u| u.to_string())
            .map_err(|e| format!("invalid URL `{joined}`: {e}"));
    }
    base.join(target)
        .map(|u| u.to_string())
        .map_err(|e| format!("invalid URL `{target}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_targets_resolve_against_base() {
        let base = Url::parse("http://localhost:8080/api/").unwrap();
        assert_eq!(
            resolve_url("/users/1", Some(&base)).unwrap(),
            "http://localhost:8080/api/users/1"
        );
        assert_eq!(
            resolve_url("users?x=1", Some(&base)).unwrap(),
            "http://localhost:8080/api/users?x=1"
        );
        assert_eq!(
            resolve_url("https://other.test/a", Some(&base)).unwrap(),
            "https://other.test/a"
        );
    }

    #[test]
    fn relative_target_without_base_is_rejected() {
        let err = resolve_url("/users", None).unwrap_err();
        assert!(err.contains("no base URL"), "{err}");
    }
}
