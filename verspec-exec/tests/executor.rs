use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use verspec_core::dsl::{parse_spec_file, Script, ScriptPhase};
use verspec_core::tree::{FileOrigin, SpecTree, TreeFile};
use verspec_core::{plan, ExecutionPlan, Selector};
use verspec_exec::executor::{
    BuiltinScriptEngine, Event, EventSink, FailureKind, HttpClient, HttpError, HttpRequest,
    HttpResponse, NoOpEventSink, ScriptEngine, ScriptError, ScriptScope, UnitOutcome,
};
use verspec_exec::{Executor, ExecutorConfig, RunReport};

/// Answers by path; anything unrouted is `200 {}`.
#[derive(Default)]
struct MockHttp {
    routes: HashMap<String, Result<(u16, String), HttpError>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl MockHttp {
    fn route(mut self, path: &str, status: u16, body: &str) -> Self {
        self.routes
            .insert(path.to_string(), Ok((status, body.to_string())));
        self
    }

    fn fail(mut self, path: &str, err: HttpError) -> Self {
        self.routes.insert(path.to_string(), Err(err));
        self
    }

    fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| path_of(&r.url) == path)
            .count()
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }
}

fn path_of(url: &str) -> String {
    Url::parse(url).unwrap().path().to_string()
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn send(
        &self,
        req: HttpRequest,
        _timeout: Duration,
        _max_response_bytes: usize,
    ) -> Result<HttpResponse, HttpError> {
        let path = path_of(&req.url);
        self.calls.lock().unwrap().push(req);
        let (status, body) = match self.routes.get(&path) {
            Some(Ok((status, body))) => (*status, body.clone()),
            Some(Err(e)) => return Err(e.clone()),
            None => (200, "{}".to_string()),
        };
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Ok(HttpResponse {
            status,
            headers,
            body: body.into_bytes(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

fn tree(files: &[(&str, &str)]) -> Arc<SpecTree> {
    Arc::new(SpecTree::new(files.iter().map(|(path, text)| TreeFile {
        path: path.to_string(),
        origin: FileOrigin::Local,
        spec: parse_spec_file(path, text).unwrap(),
    })))
}

fn plan_for(tree: &SpecTree, selector: Selector) -> Arc<ExecutionPlan> {
    let selected = selector.select(tree);
    Arc::new(plan(tree, &selected).unwrap())
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        base_url: Some(Url::parse("http://svc.test").unwrap()),
        ..ExecutorConfig::default()
    }
}

async fn run(
    files: &[(&str, &str)],
    selector: Selector,
    http: Arc<MockHttp>,
    config: ExecutorConfig,
) -> RunReport {
    let t = tree(files);
    let p = plan_for(&t, selector);
    Executor::new(config, http, Arc::new(NoOpEventSink))
        .execute(t, p)
        .await
        .unwrap()
}

const AUTH: &str = "\
### Login
# name: login
POST /auth

{{
export token = body.token
}}
?? status == 200

### Me
# name: me
# ref: login
GET /me
Authorization: Bearer {{login.token}}

?? status == 200

### Orders
# name: orders
# ref: login
GET /orders
Authorization: Bearer {{login.token}}

?? status == 200
";

#[tokio::test]
async fn cached_reference_runs_once_and_shares_exports() {
    let http = Arc::new(MockHttp::default().route("/auth", 200, r#"{"token":"t-1"}"#));
    let report = run(&[("auth.spec", AUTH)], Selector::all(), http.clone(), config()).await;

    assert!(report.is_success(), "{report:#?}");
    assert_eq!(report.passed, 3);
    assert_eq!(http.calls_to("/auth"), 1);

    for req in http.requests().iter().filter(|r| !r.url.ends_with("/auth")) {
        assert!(req
            .headers
            .contains(&("Authorization".to_string(), "Bearer t-1".to_string())));
    }
}

#[tokio::test]
async fn forced_reference_runs_fresh_for_each_consumer() {
    let text = "\
### Reset
# name: reset
POST /reset

### One
# name: one
# forceRef: reset
GET /one

### Two
# name: two
# forceRef: reset
GET /two
";
    let http = Arc::new(MockHttp::default());
    let report = run(
        &[("f.spec", text)],
        Selector::all().with_path("f.spec"),
        http.clone(),
        config(),
    )
    .await;

    assert!(report.is_success(), "{report:#?}");
    // the shared selection of `reset` plus one fresh run per consumer
    assert_eq!(http.calls_to("/reset"), 3);
    assert_eq!(http.calls_to("/one"), 1);
    assert_eq!(http.calls_to("/two"), 1);
}

#[tokio::test]
async fn failed_assertions_are_all_reported() {
    let text = "\
### Check
# name: check
GET /thing

?? status == 201
?? body.name == widget
?? body.count >= 3
";
    let http = Arc::new(MockHttp::default().route("/thing", 200, r#"{"name":"gadget","count":5}"#));
    let report = run(&[("c.spec", text)], Selector::all(), http, config()).await;

    let unit = &report.units[0];
    assert_eq!(unit.outcome, UnitOutcome::Failed);
    assert_eq!(unit.failure.as_ref().unwrap().kind, FailureKind::Assertion);
    let passed: Vec<bool> = unit.assertions.iter().map(|a| a.passed).collect();
    assert_eq!(passed, vec![false, false, true]);
    assert_eq!(unit.assertions[1].actual, serde_json::json!("gadget"));
    assert_eq!(unit.assertions[1].expected, "widget");
    assert!(!report.is_success());
}

#[tokio::test]
async fn dependents_of_a_failed_block_are_skipped() {
    let http = Arc::new(MockHttp::default().route("/auth", 500, "{}"));
    let cfg = ExecutorConfig {
        keep_going: true,
        ..config()
    };
    let report = run(&[("auth.spec", AUTH)], Selector::all(), http.clone(), cfg).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
    for unit in report.units.iter().filter(|u| u.label != "auth.spec#login") {
        let failure = unit.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Dependency);
        assert!(failure.message.contains("auth.spec#login"), "{}", failure.message);
    }
    assert_eq!(http.calls_to("/me"), 0);
}

const INDEPENDENT: &str = "\
### A
# name: a
GET /a

?? status == 200

### B
# name: b
GET /b

?? status == 200

### C
# name: c
GET /c

?? status == 200
";

#[tokio::test]
async fn fail_fast_stops_scheduling_new_blocks() {
    let http = Arc::new(MockHttp::default().route("/a", 500, "{}"));
    let cfg = ExecutorConfig {
        concurrency: 1,
        ..config()
    };
    let report = run(&[("i.spec", INDEPENDENT)], Selector::all(), http.clone(), cfg).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
    assert!(report.halted.is_some());
    assert!(!report.aborted);
    assert_eq!(http.requests().len(), 1);
    assert_eq!(
        report.units[1].failure.as_ref().unwrap().kind,
        FailureKind::Halted
    );
}

#[tokio::test]
async fn keep_going_runs_everything_independent() {
    let http = Arc::new(MockHttp::default().route("/a", 500, "{}"));
    let cfg = ExecutorConfig {
        concurrency: 1,
        keep_going: true,
        ..config()
    };
    let report = run(&[("i.spec", INDEPENDENT)], Selector::all(), http.clone(), cfg).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.passed, 2);
    assert!(report.halted.is_none());
    assert_eq!(http.requests().len(), 3);
}

#[tokio::test]
async fn timeout_is_its_own_failure_kind() {
    let http = Arc::new(MockHttp::default().fail("/a", HttpError::Timeout));
    let cfg = ExecutorConfig {
        keep_going: true,
        ..config()
    };
    let report = run(&[("i.spec", INDEPENDENT)], Selector::all(), http, cfg).await;

    let a = &report.units[0];
    assert_eq!(a.outcome, UnitOutcome::Failed);
    assert_eq!(a.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    assert_eq!(report.passed, 2);
}

#[tokio::test]
async fn unreachable_target_aborts_the_session() {
    let http = Arc::new(
        MockHttp::default().fail("/a", HttpError::Network("connection refused".to_string())),
    );
    let cfg = ExecutorConfig {
        concurrency: 1,
        keep_going: true,
        ..config()
    };
    let report = run(&[("i.spec", INDEPENDENT)], Selector::all(), http, cfg).await;

    assert!(report.aborted);
    assert_eq!(report.errored, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(
        report.units[0].failure.as_ref().unwrap().kind,
        FailureKind::Network
    );
}

#[tokio::test]
async fn unresolved_variable_names_variable_block_and_file() {
    let text = "### Me\n# name: me\nGET /users/{{userId}}\n";
    let http = Arc::new(MockHttp::default());
    let report = run(&[("u.spec", text)], Selector::all(), http.clone(), config()).await;

    let failure = report.units[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::UnresolvedVariable);
    assert!(failure.message.contains("userId"), "{}", failure.message);
    assert!(failure.message.contains("u.spec#me"), "{}", failure.message);
    assert!(failure.message.contains("u.spec:1"), "{}", failure.message);
    assert!(http.requests().is_empty());
}

#[tokio::test]
async fn variables_follow_config_file_session_precedence() {
    let text = "\
@region = eu
@tier = file
{{
set tier = session
}}

### Lookup
# name: lookup
GET /lookup?region={{region}}&tier={{tier}}&env={{env}}
";
    let mut cfg = config();
    cfg.variables.insert("env".to_string(), "staging".to_string());
    cfg.variables.insert("region".to_string(), "us".to_string());
    let http = Arc::new(MockHttp::default());
    let report = run(&[("p.spec", text)], Selector::all(), http.clone(), cfg).await;

    assert!(report.is_success(), "{report:#?}");
    let url = &http.requests()[0].url;
    assert!(url.ends_with("/lookup?region=eu&tier=session&env=staging"), "{url}");
}

#[derive(Default)]
struct CountingEngine {
    file_runs: AtomicUsize,
}

impl ScriptEngine for CountingEngine {
    fn run(&self, script: &Script, scope: &mut ScriptScope<'_>) -> Result<(), ScriptError> {
        if scope.phase == ScriptPhase::File {
            self.file_runs.fetch_add(1, Ordering::SeqCst);
        }
        BuiltinScriptEngine.run(script, scope)
    }
}

#[tokio::test]
async fn file_scripts_run_once_per_session() {
    let shared = "{{\nlog shared setup\n}}\n\n### Ping\n# name: ping\nGET /ping\n";
    let user = "import ./shared.spec\n\n### Pong\n# name: pong\n# ref: ping\nGET /pong\n";
    let t = tree(&[("shared.spec", shared), ("user.spec", user)]);
    let p = plan_for(&t, Selector::all());
    let sink = Arc::new(RecordingSink::default());
    let engine = Arc::new(CountingEngine::default());
    let report = Executor::new(config(), Arc::new(MockHttp::default()), sink.clone())
        .with_script_engine(engine.clone())
        .execute(t, p)
        .await
        .unwrap();

    assert!(report.is_success(), "{report:#?}");
    assert_eq!(engine.file_runs.load(Ordering::SeqCst), 1);
    let events = sink.events.lock().unwrap();
    assert!(matches!(events.first(), Some(Event::SessionStarted { units: 2, .. })));
    assert!(matches!(events.last(), Some(Event::SessionFinished { passed: 2, .. })));
}

#[tokio::test]
async fn post_script_sets_session_variables_for_later_blocks() {
    let text = "\
### Create
# name: create
POST /items

{{
set itemId = body.id
}}
?? status == 201

### Fetch
# name: fetch
# ref: create
GET /items/{{itemId}}

?? body.id == {{create.body.id}}
";
    let http = Arc::new(
        MockHttp::default()
            .route("/items", 201, r#"{"id":"it-9"}"#)
            .route("/items/it-9", 200, r#"{"id":"it-9"}"#),
    );
    let report = run(&[("s.spec", text)], Selector::all(), http.clone(), config()).await;

    assert!(report.is_success(), "{report:#?}");
    assert_eq!(http.calls_to("/items/it-9"), 1);
}

struct SlowHttp {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl HttpClient for SlowHttp {
    async fn send(
        &self,
        _req: HttpRequest,
        _timeout: Duration,
        _max_response_bytes: usize,
    ) -> Result<HttpResponse, HttpError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(HttpResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: Vec::new(),
        })
    }
}

#[tokio::test]
async fn concurrency_limit_bounds_in_flight_requests() {
    let text: String = (0..6)
        .map(|i| format!("### b{i}\n# name: b{i}\nGET /{i}\n\n"))
        .collect();
    let t = tree(&[("many.spec", text.as_str())]);
    let p = plan_for(&t, Selector::all());
    let http = Arc::new(SlowHttp {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let cfg = ExecutorConfig {
        concurrency: 2,
        ..config()
    };
    let report = Executor::new(cfg, http.clone(), Arc::new(NoOpEventSink))
        .execute(t, p)
        .await
        .unwrap();

    assert_eq!(report.passed, 6);
    assert!(http.peak.load(Ordering::SeqCst) <= 2);
    assert!(http.peak.load(Ordering::SeqCst) >= 1);
}
