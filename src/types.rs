use crate::assert::{Assert, TestError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use regex::Regex;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Module name used for tests registered outside any named module.
pub const NO_MODULE: &str = "(no module)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Local,
    Sandboxed,
}

pub type NativeRun = Arc<dyn Fn(Assert) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>;
pub type NativeInit = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("script body for '{name}' is empty")]
    EmptyScript { name: String },
    #[error("script body for '{name}' is not a function expression: {snippet}")]
    NotAFunction { name: String, snippet: String },
    #[error("function-expression pattern failed to compile: {0}")]
    Pattern(regex::Error),
}

fn function_expr() -> Result<&'static Regex, RegistryError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(async\s+)?(function\b|\(|[A-Za-z_$][\w$]*\s*=>)"))
        .as_ref()
        .map_err(|e| RegistryError::Pattern(e.clone()))
}

/// Self-contained JavaScript function expression shipped into the sandbox as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource(String);

impl ScriptSource {
    /// Accepts `function`, `async function`, arrow and async arrow expressions.
    /// The body must not capture outer bindings; that part is only caught at evaluation.
    pub fn parse(owner: &str, text: impl Into<String>) -> Result<Self, RegistryError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RegistryError::EmptyScript {
                name: owner.to_string(),
            });
        }
        if !function_expr()?.is_match(trimmed) {
            return Err(RegistryError::NotAFunction {
                name: owner.to_string(),
                snippet: trimmed.chars().take(40).collect(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The `run` procedure of a test: a native face, a script face, or both.
#[derive(Clone, Default)]
pub struct TestBody {
    pub native: Option<NativeRun>,
    pub script: Option<ScriptSource>,
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestBody")
            .field("native", &self.native.is_some())
            .field("script", &self.script)
            .finish()
    }
}

/// Zero-argument hook run before every test of its module.
#[derive(Clone, Default)]
pub struct InitHook {
    pub native: Option<NativeInit>,
    pub script: Option<ScriptSource>,
}

impl InitHook {
    pub fn native<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        Self {
            native: Some(Arc::new(move || Box::pin(f()))),
            script: None,
        }
    }

    pub fn script(owner: &str, text: impl Into<String>) -> Result<Self, RegistryError> {
        Ok(Self {
            native: None,
            script: Some(ScriptSource::parse(owner, text)?),
        })
    }

    pub fn with_script(mut self, owner: &str, text: impl Into<String>) -> Result<Self, RegistryError> {
        self.script = Some(ScriptSource::parse(owner, text)?);
        Ok(self)
    }
}

impl fmt::Debug for InitHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitHook")
            .field("native", &self.native.is_some())
            .field("script", &self.script)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub dependencies: Vec<PathBuf>,
    pub body: TestBody,
    pub source_location: Option<PathBuf>,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            body: TestBody::default(),
            source_location: None,
        }
    }

    pub fn with_native<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Assert) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.body.native = Some(Arc::new(move |assert| Box::pin(f(assert))));
        self
    }

    pub fn with_script(mut self, text: impl Into<String>) -> Result<Self, RegistryError> {
        self.body.script = Some(ScriptSource::parse(&self.name, text)?);
        Ok(self)
    }

    pub fn with_dependency(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(path.into());
        self
    }

    pub fn with_source_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_location = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestModule {
    pub name: Option<String>,
    pub tests: Vec<Arc<TestCase>>,
    pub init: Option<InitHook>,
}

impl TestModule {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn ungrouped() -> Self {
        Self::default()
    }

    pub fn with_init(mut self, hook: InitHook) -> Self {
        self.init = Some(hook);
        self
    }

    pub fn test(mut self, case: TestCase) -> Self {
        self.tests.push(Arc::new(case));
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(NO_MODULE)
    }
}

/// Key of one execution's result. A fresh value per run, never just the test name.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    pub test: Arc<TestCase>,
    pub module_name: String,
    /// 1-based position over the full, unfiltered registration order.
    pub sequence: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub status: TestStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl TestResult {
    pub fn passed(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            status: TestStatus::Pass,
            start_time,
            end_time: end_time.max(start_time),
            error_message: None,
        }
    }

    pub fn failed(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            status: TestStatus::Fail,
            start_time,
            end_time: end_time.max(start_time),
            error_message: Some(error_message.into()),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == TestStatus::Pass
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_pattern_compiles() {
        assert!(function_expr().is_ok());
    }

    #[test]
    fn accepts_function_shapes() {
        for src in [
            "function () {}",
            "async function named(assert) { }",
            "(assert) => {}",
            "async (assert) => { await 1; }",
            "assert => assert.truthy(true)",
            "  () => 1  ",
        ] {
            assert!(ScriptSource::parse("t", src).is_ok(), "{src}");
        }
    }

    #[test]
    fn rejects_non_functions() {
        assert!(matches!(
            ScriptSource::parse("t", "   "),
            Err(RegistryError::EmptyScript { .. })
        ));
        assert!(matches!(
            ScriptSource::parse("t", "assert.equals(1, 1);"),
            Err(RegistryError::NotAFunction { .. })
        ));
    }

    #[test]
    fn end_time_never_precedes_start() {
        let start = Utc::now();
        let earlier = start - chrono::Duration::milliseconds(5);
        let r = TestResult::passed(start, earlier);
        assert_eq!(r.end_time, start);
        assert_eq!(r.duration(), chrono::Duration::zero());
    }

    #[test]
    fn unnamed_module_uses_sentinel() {
        assert_eq!(TestModule::ungrouped().display_name(), NO_MODULE);
        assert_eq!(TestModule::named("dom").display_name(), "dom");
    }
}
