use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinSet;
use uuid::Uuid;
use verspec_core::dsl::ReferenceKind;
use verspec_core::planner::UnitInstance;
use verspec_core::{ExecutionPlan, SpecTree, UnitId};

use crate::executor::cache::{FileScriptGate, ResultCache, SessionVariables};
use crate::executor::concurrency::ConcurrencyLimits;
use crate::executor::eval::BlockResult;
use crate::executor::events::{Event, EventSink};
use crate::executor::http::HttpClient;
use crate::executor::result::{
    ExecutionError, Failure, FailureKind, RunReport, UnitOutcome, UnitReport,
};
use crate::executor::script::{BuiltinScriptEngine, ScriptEngine};
use crate::executor::types::ExecutorConfig;
use crate::executor::worker::{blank_report, run_unit, UnitJob, UnitRun, WorkerDeps};

pub struct Executor {
    config: Arc<ExecutorConfig>,
    http: Arc<dyn HttpClient>,
    event_sink: Arc<dyn EventSink>,
    engine: Arc<dyn ScriptEngine>,
}

/// Bookkeeping for one session.
struct Session {
    id: Uuid,
    cache: ResultCache,
    /// Results of fresh units, held until their consumer has finished.
    fresh: HashMap<UnitId, Arc<BlockResult>>,
    waiting_on: HashMap<UnitId, usize>,
    /// Positions in the plan order of units whose dependencies all passed.
    ready: BTreeSet<usize>,
    reports: BTreeMap<UnitId, UnitReport>,
    halted: Option<String>,
    aborted: bool,
}

impl Session {
    fn new(plan: &ExecutionPlan, position: &HashMap<UnitId, usize>) -> Self {
        let mut session = Session {
            id: Uuid::new_v4(),
            cache: ResultCache::new(),
            fresh: HashMap::new(),
            waiting_on: plan
                .units
                .iter()
                .map(|u| (u.id, u.depends_on.len()))
                .collect(),
            ready: BTreeSet::new(),
            reports: BTreeMap::new(),
            halted: None,
            aborted: false,
        };
        for unit in &plan.units {
            if unit.depends_on.is_empty() {
                session.ready.insert(position[&unit.id]);
            }
        }
        session
    }

    /// Drops the fresh results `consumer` holds through forced refs. Called
    /// once the consumer has a report, whatever its outcome.
    fn release_fresh(&mut self, plan: &ExecutionPlan, consumer: UnitId) {
        for r in &plan.unit(consumer).references {
            if r.kind == ReferenceKind::Forced {
                self.fresh.remove(&r.unit);
            }
        }
    }
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        http: Arc<dyn HttpClient>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            http,
            event_sink,
            engine: Arc::new(BuiltinScriptEngine),
        }
    }

    pub fn with_script_engine(mut self, engine: Arc<dyn ScriptEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Runs every unit of `plan` whose dependencies pass, at most
    /// `config.concurrency` at a time.
    pub async fn execute(
        &self,
        tree: Arc<SpecTree>,
        plan: Arc<ExecutionPlan>,
    ) -> Result<RunReport, ExecutionError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let limits = ConcurrencyLimits::new(self.config.concurrency);
        let deps = WorkerDeps {
            config: self.config.clone(),
            http: self.http.clone(),
            event_sink: self.event_sink.clone(),
            engine: self.engine.clone(),
            session: Arc::new(SessionVariables::new()),
            file_scripts: Arc::new(FileScriptGate::new()),
        };

        let position: HashMap<UnitId, usize> =
            plan.order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let mut session = Session::new(&plan, &position);

        tracing::info!(session = %session.id, units = plan.len(), "session started");
        self.event_sink
            .emit(Event::SessionStarted {
                session_id: session.id,
                units: plan.len(),
            })
            .await;

        let mut running: JoinSet<UnitRun> = JoinSet::new();
        loop {
            while session.halted.is_none() {
                let Some(&pos) = session.ready.first() else {
                    break;
                };
                let permit = match limits.try_acquire() {
                    Some(permit) => permit,
                    None if running.is_empty() => limits.acquire().await?,
                    None => break,
                };
                session.ready.remove(&pos);
                let id = plan.order[pos];
                let job = UnitJob {
                    session_id: session.id,
                    unit: id,
                    tree: tree.clone(),
                    plan: plan.clone(),
                    refs: reference_results(&plan, id, &session),
                };
                tracing::debug!(unit = %plan.unit(id).display_name(), "scheduling");
                running.spawn(run_unit(job, deps.clone(), permit));
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let run = joined.map_err(|e| ExecutionError::TaskJoin(e.to_string()))?;
            self.finish_unit(&tree, &plan, &position, &mut session, run)
                .await;
        }

        self.skip_unreached(&tree, &plan, &mut session).await;
        tracing::debug!(
            session = %session.id,
            cached = session.cache.len(),
            "releasing session results"
        );

        let units: Vec<UnitReport> = plan
            .order
            .iter()
            .filter_map(|id| session.reports.remove(id))
            .collect();
        let count = |o: UnitOutcome| units.iter().filter(|u| u.outcome == o).count();
        let report = RunReport {
            session_id: session.id,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            passed: count(UnitOutcome::Passed),
            failed: count(UnitOutcome::Failed),
            skipped: count(UnitOutcome::Skipped),
            errored: count(UnitOutcome::Errored),
            units,
            halted: session.halted,
            aborted: session.aborted,
        };

        tracing::info!(
            session = %report.session_id,
            passed = report.passed,
            failed = report.failed,
            skipped = report.skipped,
            errored = report.errored,
            "session finished"
        );
        self.event_sink
            .emit(Event::SessionFinished {
                session_id: report.session_id,
                passed: report.passed,
                failed: report.failed,
                skipped: report.skipped,
                errored: report.errored,
                aborted: report.aborted,
            })
            .await;

        Ok(report)
    }

    async fn finish_unit(
        &self,
        tree: &SpecTree,
        plan: &ExecutionPlan,
        position: &HashMap<UnitId, usize>,
        session: &mut Session,
        run: UnitRun,
    ) {
        let id = run.report.unit;
        let unit = plan.unit(id);
        session.release_fresh(plan, id);

        if run.report.outcome == UnitOutcome::Passed {
            if let Some(result) = run.result {
                if unit.cached_target && !session.cache.insert_once(unit.block, result.clone()) {
                    tracing::debug!(unit = %unit.label, "result already cached");
                }
                if let UnitInstance::Fresh { consumer } = unit.instance {
                    // a consumer skipped in the meantime will never read it
                    if !session.reports.contains_key(&consumer) {
                        session.fresh.insert(id, result);
                    }
                }
            }
            for dependent in plan.dependents(id) {
                if let Some(n) = session.waiting_on.get_mut(&dependent) {
                    *n = n.saturating_sub(1);
                    if *n == 0 {
                        session.ready.insert(position[&dependent]);
                    }
                }
            }
        } else {
            self.skip_dependents(tree, plan, session, id, &run.report).await;
            if let Some(message) = &run.fatal {
                tracing::warn!(unit = %unit.label, %message, "aborting session");
                session.halted = Some(format!("aborted after `{}`: {message}", unit.label));
                session.aborted = true;
            } else if !self.config.keep_going && session.halted.is_none() {
                session.halted = Some(format!("stopped after `{}` failed", unit.label));
            }
        }

        session.reports.insert(id, run.report);
    }

    /// Marks everything downstream of a unit that did not pass as skipped.
    async fn skip_dependents(
        &self,
        tree: &SpecTree,
        plan: &ExecutionPlan,
        session: &mut Session,
        id: UnitId,
        upstream: &UnitReport,
    ) {
        let mut stack = plan.dependents(id);
        while let Some(dependent) = stack.pop() {
            if session.reports.contains_key(&dependent) {
                continue;
            }
            let mut report = blank_report(tree, plan, dependent);
            report.outcome = UnitOutcome::Skipped;
            report.failure = Some(Failure::new(
                FailureKind::Dependency,
                format!("dependency `{}` {}", upstream.label, upstream.outcome.as_str()),
            ));
            self.emit_finished(session.id, &report).await;
            session.reports.insert(dependent, report);
            session.release_fresh(plan, dependent);
            stack.extend(plan.dependents(dependent));
        }
    }

    /// Reports every unit that never ran as skipped, with the halt reason.
    async fn skip_unreached(&self, tree: &SpecTree, plan: &ExecutionPlan, session: &mut Session) {
        for id in &plan.order {
            if session.reports.contains_key(id) {
                continue;
            }
            let reason = session
                .halted
                .clone()
                .unwrap_or_else(|| "not scheduled".to_string());
            let mut report = blank_report(tree, plan, *id);
            report.outcome = UnitOutcome::Skipped;
            report.failure = Some(Failure::new(FailureKind::Halted, reason));
            self.emit_finished(session.id, &report).await;
            session.reports.insert(*id, report);
            session.release_fresh(plan, *id);
        }
    }

    async fn emit_finished(&self, session_id: Uuid, report: &UnitReport) {
        self.event_sink
            .emit(Event::UnitFinished {
                session_id,
                unit: report.unit,
                label: report.label.clone(),
                outcome: report.outcome,
                duration_ms: report.duration_ms,
            })
            .await;
    }
}

/// Results visible to `id`: fresh units by unit, cached targets by block.
fn reference_results(
    plan: &ExecutionPlan,
    id: UnitId,
    session: &Session,
) -> BTreeMap<String, Arc<BlockResult>> {
    let mut refs = BTreeMap::new();
    for r in &plan.unit(id).references {
        let target = plan.unit(r.unit);
        let result = if target.is_fresh() {
            session.fresh.get(&r.unit).cloned()
        } else {
            session.cache.get(target.block)
        };
        if let Some(result) = result {
            refs.insert(r.name.clone(), result);
        }
    }
    refs
}
