use std::collections::BTreeMap;
use std::sync::Arc;

use verspec_core::dsl::{Script, ScriptPhase, Statement};

use crate::executor::cache::SessionVariables;
use crate::executor::eval::{json_to_text, BlockResult, ResponseData, VarEnv};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("{phase} script at line {line}: `{statement}`: {message}")]
    Statement {
        phase: &'static str,
        line: usize,
        statement: String,
        message: String,
    },
}

/// Everything a script may read or write while it runs.
pub struct ScriptScope<'a> {
    pub phase: ScriptPhase,
    /// Variables visible to the running block; `set` writes here and to the session.
    pub vars: &'a mut BTreeMap<String, String>,
    pub session: &'a SessionVariables,
    pub exports: &'a mut BTreeMap<String, String>,
    pub refs: &'a BTreeMap<String, Arc<BlockResult>>,
    pub response: Option<&'a ResponseData>,
    pub logs: &'a mut Vec<String>,
}

/// Runs the statements of a script. Scripts only compute values; they cannot
/// issue requests of their own.
pub trait ScriptEngine: Send + Sync {
    fn run(&self, script: &Script, scope: &mut ScriptScope<'_>) -> Result<(), ScriptError>;
}

/// Interprets `set`, `export` and `log`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinScriptEngine;

impl ScriptEngine for BuiltinScriptEngine {
    fn run(&self, script: &Script, scope: &mut ScriptScope<'_>) -> Result<(), ScriptError> {
        for statement in &script.statements {
            let expr = match statement {
                Statement::Set { expr, .. } | Statement::Export { expr, .. } => expr,
                Statement::Log(expr) => expr,
            };
            let value = {
                let env = VarEnv::new(&*scope.vars, scope.refs, scope.response);
                env.eval(expr).map_err(|message| ScriptError::Statement {
                    phase: scope.phase.as_str(),
                    line: script.line,
                    statement: statement.to_string(),
                    message,
                })?
            };
            let text = json_to_text(&value);

            match statement {
                Statement::Set { name, .. } => {
                    scope.session.set(name, &text);
                    scope.vars.insert(name.clone(), text);
                }
                Statement::Export { name, .. } => {
                    scope.exports.insert(name.clone(), text);
                }
                Statement::Log(_) => {
                    tracing::info!(phase = scope.phase.as_str(), "{text}");
                    scope.logs.push(text);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verspec_core::expressions::{Expr, ValueExpr};

    fn script(statements: Vec<Statement>) -> Script {
        Script {
            statements,
            line: 1,
        }
    }

    #[test]
    fn set_export_and_log() {
        let session = SessionVariables::new();
        let mut vars = BTreeMap::new();
        vars.insert("user".to_string(), "alice".to_string());
        let mut exports = BTreeMap::new();
        let mut logs = Vec::new();
        let refs = BTreeMap::new();
        let resp = ResponseData::new(200, BTreeMap::new(), br#"{"token":"abc"}"#, 5);

        let s = script(vec![
            Statement::Set {
                name: "who".to_string(),
                expr: Expr::Template("{{user}}!".to_string()),
            },
            Statement::Export {
                name: "token".to_string(),
                expr: Expr::Value(ValueExpr::Body(Some(".token".to_string()))),
            },
            Statement::Log(Expr::Template("hi {{who}} {{status}}".to_string())),
        ]);
        let mut scope = ScriptScope {
            phase: ScriptPhase::PostResponse,
            vars: &mut vars,
            session: &session,
            exports: &mut exports,
            refs: &refs,
            response: Some(&resp),
            logs: &mut logs,
        };
        BuiltinScriptEngine.run(&s, &mut scope).unwrap();

        assert_eq!(session.get("who").as_deref(), Some("alice!"));
        assert_eq!(exports["token"], "abc");
        assert_eq!(logs, vec!["hi alice! 200"]);
    }

    #[test]
    fn unresolved_variable_names_the_statement() {
        let session = SessionVariables::new();
        let mut vars = BTreeMap::new();
        let mut exports = BTreeMap::new();
        let mut logs = Vec::new();
        let refs = BTreeMap::new();
        let s = script(vec![Statement::Set {
            name: "x".to_string(),
            expr: Expr::Template("{{missing}}".to_string()),
        }]);
        let mut scope = ScriptScope {
            phase: ScriptPhase::PreRequest,
            vars: &mut vars,
            session: &session,
            exports: &mut exports,
            refs: &refs,
            response: None,
            logs: &mut logs,
        };
        let err = BuiltinScriptEngine.run(&s, &mut scope).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("pre-request"), "{message}");
        assert!(message.contains("missing"), "{message}");
    }
}
