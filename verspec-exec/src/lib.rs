#![forbid(unsafe_code)]

//! Runtime engine for executing verspec request blocks.
//!
//! Parsing, materialization and planning live in `verspec-core`; this crate
//! takes an [`verspec_core::ExecutionPlan`] and drives it against a live service.

pub mod executor;

pub use crate::executor::{
    Executor, ExecutorConfig, FailureKind, HttpClient, RunReport, UnitOutcome, UnitReport,
};
