pub mod assertions;
pub mod cache;
pub mod concurrency;
pub mod eval;
pub mod events;
pub mod http;
mod result;
mod scheduler;
pub mod script;
mod types;
mod worker;

pub use assertions::{evaluate_assertion, AssertionReport};
pub use concurrency::{ConcurrencyLimits, ConcurrencyPermit};
pub use events::{
    CompositeEventSink, Event, EventSink, NoOpEventSink, StdoutEventSink, TracingEventSink,
};
pub use http::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use result::{ExecutionError, Failure, FailureKind, RunReport, UnitOutcome, UnitReport};
pub use scheduler::Executor;
pub use script::{BuiltinScriptEngine, ScriptEngine, ScriptError, ScriptScope};
pub use types::ExecutorConfig;
