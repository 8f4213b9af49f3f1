//! Runs script test bodies inside a sandboxed browser page.
//!
//! Nothing is shared with the page except text: every test gets a freshly reset document,
//! the bootstrap script, its declared dependencies, and one expression built from the
//! init hook and `run` sources. The page answers with plain data, which is mapped back
//! into a [`TestOutcome`].

use crate::assert::{AssertionFailure, TestError};
use crate::backend::{Backend, TestOutcome};
use crate::error::BridgeError;
use crate::types::{RuntimeKind, ScriptSource, TestCase, TestModule};
use crate::{t, t_args};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Installs `window.__pagerun.Assert` in the page.
pub const BOOTSTRAP: &str = include_str!("../assets/bootstrap.js");
pub const BOOTSTRAP_NAME: &str = "pagerun-bootstrap.js";

/// What the page handed back from an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The completion value; `undefined` arrives as `Null`.
    Value(Value),
    /// The expression itself threw, e.g. a syntax error in a serialized body.
    Threw(String),
}

/// The remote-control capability the sandbox is driven through.
#[async_trait]
pub trait RemoteChannel: Send {
    /// Navigate to a blank document so nothing survives from the previous test.
    async fn reset(&mut self) -> Result<(), BridgeError>;
    /// Execute a script in the page's global scope.
    async fn inject_script(&mut self, name: &str, source: &str) -> Result<(), BridgeError>;
    /// Evaluate an expression, awaiting it if it yields a promise.
    async fn evaluate(&mut self, expression: &str) -> Result<Evaluation, BridgeError>;
}

pub struct SandboxBackend<C> {
    channel: C,
    source_dir: PathBuf,
}

impl<C: RemoteChannel> SandboxBackend<C> {
    /// `source_dir` anchors relative dependency paths.
    pub fn new(channel: C, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            channel,
            source_dir: source_dir.into(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    fn resolve(&self, dependency: &Path) -> PathBuf {
        if dependency.is_absolute() {
            dependency.to_path_buf()
        } else {
            self.source_dir.join(dependency)
        }
    }

    async fn inject_dependencies(&mut self, test: &TestCase) -> Result<(), BridgeError> {
        for dependency in &test.dependencies {
            let path = self.resolve(dependency);
            let source = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| BridgeError::ReadScript {
                    path: path.clone(),
                    source,
                })?;
            debug!("{}", t_args!("debug-inject", "path" => path.display()));
            self.channel
                .inject_script(&path.display().to_string(), &source)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<C: RemoteChannel> Backend for SandboxBackend<C> {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Sandboxed
    }

    async fn execute(
        &mut self,
        module: &TestModule,
        test: &TestCase,
    ) -> Result<TestOutcome, BridgeError> {
        let Some(run) = test.body.script.as_ref() else {
            return Ok(Err(TestError::generic(t_args!(
                "sandbox-no-script-body",
                "name" => &test.name
            ))));
        };
        let init = match &module.init {
            Some(hook) => match &hook.script {
                Some(script) => Some(script),
                None => return Ok(Err(TestError::generic(t!("sandbox-init-native-only")))),
            },
            None => None,
        };

        self.channel.reset().await?;
        self.channel.inject_script(BOOTSTRAP_NAME, BOOTSTRAP).await?;
        self.inject_dependencies(test).await?;

        let expression = build_expression(init, run);
        let evaluation = self.channel.evaluate(&expression).await?;
        Ok(interpret(evaluation))
    }
}

/// One self-invoking async expression: init hook first, then `run` with a fresh
/// in-page `Assert`. Resolves to nothing, a tagged failure record, or error text.
pub fn build_expression(init: Option<&ScriptSource>, run: &ScriptSource) -> String {
    let mut expr = String::from("(async () => {\n");
    expr.push_str("\tconst init = ");
    match init {
        Some(src) => {
            expr.push_str("(\n");
            expr.push_str(src.as_str());
            expr.push_str("\n);\n");
        }
        None => expr.push_str("undefined;\n"),
    }
    expr.push_str("\tconst run = (\n");
    expr.push_str(run.as_str());
    expr.push_str("\n);\n");
    expr.push_str(
        r#"	const describe = (e) => {
		const text = (e && e.message !== undefined) ? String(e.message) : String(e);
		return text.trim() ? text : "threw an empty " + Object.prototype.toString.call(e).slice(8, -1);
	};
	if (init)
	{
		try
		{
			await init();
		}
		catch (e)
		{
			return "module init hook failed: " + describe(e);
		}
	}
	try
	{
		await run(new window.__pagerun.Assert());
	}
	catch (e)
	{
		if (e && e.harnessFailure && typeof e.toJSON === "function")
			return e.toJSON();
		return describe(e) + "\n" + String((e && e.stack) || "");
	}
	return undefined;
})()"#,
    );
    expr
}

/// Map the page's answer back to an outcome. Only `undefined`/`null` is a pass.
pub fn interpret(evaluation: Evaluation) -> TestOutcome {
    let value = match evaluation {
        Evaluation::Threw(text) => return Err(TestError::generic(text)),
        Evaluation::Value(value) => value,
    };
    if let Some(failure) = AssertionFailure::from_record(&value) {
        return Err(failure.into());
    }
    match value {
        Value::Null => Ok(()),
        Value::String(text) if text.trim().is_empty() => {
            Err(TestError::generic(t!("sandbox-blank-failure")))
        }
        Value::String(text) => {
            let (message, trace) = match text.split_once('\n') {
                Some((message, trace)) => (message.to_string(), Some(trace.to_string())),
                None => (text, None),
            };
            Err(TestError::Generic { message, trace })
        }
        other => Err(TestError::generic(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert::AssertionKind;
    use crate::types::InitHook;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        answer: Option<Evaluation>,
    }

    #[async_trait]
    impl RemoteChannel for Recorder {
        async fn reset(&mut self) -> Result<(), BridgeError> {
            self.calls.push("reset".into());
            Ok(())
        }
        async fn inject_script(&mut self, name: &str, _source: &str) -> Result<(), BridgeError> {
            self.calls.push(format!("inject {name}"));
            Ok(())
        }
        async fn evaluate(&mut self, expression: &str) -> Result<Evaluation, BridgeError> {
            self.calls.push(format!("evaluate {}", expression.len()));
            Ok(self.answer.clone().unwrap_or(Evaluation::Value(Value::Null)))
        }
    }

    fn script(text: &str) -> ScriptSource {
        ScriptSource::parse("t", text).unwrap()
    }

    #[tokio::test]
    async fn protocol_order_per_test() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "window.a = 1;").unwrap();
        std::fs::write(dir.path().join("b.js"), "window.b = window.a + 1;").unwrap();
        let case = TestCase::new("deps")
            .with_script("async (assert) => assert.equals(2, window.b)")
            .unwrap()
            .with_dependency("a.js")
            .with_dependency("b.js");

        let mut backend = SandboxBackend::new(Recorder::default(), dir.path());
        let outcome = backend
            .execute(&TestModule::ungrouped(), &case)
            .await
            .unwrap();
        assert!(outcome.is_ok());

        let calls = &backend.channel().calls;
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], "reset");
        assert_eq!(calls[1], format!("inject {BOOTSTRAP_NAME}"));
        assert!(calls[2].ends_with("a.js"));
        assert!(calls[3].ends_with("b.js"));
        assert!(calls[4].starts_with("evaluate"));
    }

    #[tokio::test]
    async fn missing_dependency_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let case = TestCase::new("deps")
            .with_script("() => {}")
            .unwrap()
            .with_dependency("missing.js");
        let mut backend = SandboxBackend::new(Recorder::default(), dir.path());
        let err = backend
            .execute(&TestModule::ungrouped(), &case)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ReadScript { .. }));
    }

    #[tokio::test]
    async fn native_only_test_is_a_test_failure() {
        let case = TestCase::new("native").with_native(|_| async { Ok::<(), TestError>(()) });
        let mut backend = SandboxBackend::new(Recorder::default(), ".");
        let outcome = backend
            .execute(&TestModule::ungrouped(), &case)
            .await
            .unwrap();
        assert!(outcome.is_err());
        assert!(backend.channel().calls.is_empty());
    }

    #[test]
    fn expression_runs_init_before_run() {
        let init = script("() => { window.ready = true; }");
        let run = script("async (assert) => assert.truthy(window.ready)");
        let expr = build_expression(Some(&init), &run);
        let init_at = expr.find("window.ready = true").unwrap();
        let run_at = expr.find("assert.truthy(window.ready)").unwrap();
        assert!(init_at < run_at);
        assert!(expr.contains("await init();"));
        assert!(expr.trim_end().ends_with("})()"));

        let without = build_expression(None, &run);
        assert!(without.contains("const init = undefined;"));
    }

    #[test]
    fn trailing_line_comment_stays_contained() {
        let run = script("() => {} // done");
        let expr = build_expression(None, &run);
        assert!(expr.contains("() => {} // done\n);"));
    }

    #[test]
    fn blank_error_text_is_still_a_failure() {
        for blank in ["", "\n", "  \n\t"] {
            let err = interpret(Evaluation::Value(json!(blank))).unwrap_err();
            assert!(!err.report_text().trim().is_empty(), "{blank:?}");
        }
    }

    #[test]
    fn empty_throws_get_a_description() {
        let run = script("() => { throw ''; }");
        let expr = build_expression(None, &run);
        assert!(expr.contains(r#"text.trim() ? text : "threw an empty ""#));
    }

    #[test]
    fn failure_records_carry_plain_values() {
        assert!(BOOTSTRAP.contains("expected: plain(this.expected)"));
        assert!(BOOTSTRAP.contains("actual: plain(this.actual)"));
        let record = json!({
            "harnessFailure": true,
            "kind": "equals",
            "expected": "[object Object]",
            "actual": 1,
        });
        let err = interpret(Evaluation::Value(record)).unwrap_err();
        assert_eq!(
            err.report_text(),
            "equals assertion failed: expected [object Object], got 1"
        );
    }

    #[test]
    fn interprets_page_answers() {
        assert!(interpret(Evaluation::Value(Value::Null)).is_ok());

        let record = json!({
            "harnessFailure": true,
            "kind": "equals",
            "expected": 1,
            "actual": 2,
        });
        match interpret(Evaluation::Value(record)) {
            Err(TestError::Assertion(f)) => {
                assert_eq!(f.kind, AssertionKind::Equals);
                assert_eq!(f.to_string(), "equals assertion failed: expected 1, got 2");
            }
            other => panic!("unexpected {other:?}"),
        }

        match interpret(Evaluation::Value(json!("TypeError: x is undefined\nat run"))) {
            Err(TestError::Generic { message, trace }) => {
                assert_eq!(message, "TypeError: x is undefined");
                assert_eq!(trace.as_deref(), Some("at run"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let threw = interpret(Evaluation::Threw("SyntaxError: Unexpected token".into()));
        assert!(threw.unwrap_err().report_text().contains("SyntaxError"));
    }

    #[tokio::test]
    async fn init_script_is_shipped_with_the_test() {
        let module = TestModule::named("dom")
            .with_init(InitHook::script("dom", "() => { document.title = 'x'; }").unwrap());
        let case = TestCase::new("t").with_script("() => {}").unwrap();
        let mut backend = SandboxBackend::new(
            Recorder {
                answer: Some(Evaluation::Value(json!("module init hook failed: boom"))),
                ..Recorder::default()
            },
            ".",
        );
        let err = backend.execute(&module, &case).await.unwrap().unwrap_err();
        assert_eq!(err.report_text(), "module init hook failed: boom");
    }
}
