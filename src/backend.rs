use crate::assert::{Assert, TestError};
use crate::error::BridgeError;
use crate::types::{RuntimeKind, TestCase, TestModule};
use crate::{t, t_args};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::debug;

/// Outcome of a single test body: `Ok(())` passed, `Err` is recorded as a failure.
pub type TestOutcome = Result<(), TestError>;

/// Runtime adapter the engine dispatches each test to.
///
/// The outer `Result` is reserved for failures that poison the whole run; anything a test
/// itself does wrong belongs in the inner [`TestOutcome`].
#[async_trait]
pub trait Backend: Send {
    fn kind(&self) -> RuntimeKind;

    /// Run `module`'s init hook (when present) and then `test`.
    async fn execute(
        &mut self,
        module: &TestModule,
        test: &TestCase,
    ) -> Result<TestOutcome, BridgeError>;
}

/// Runs native test bodies in this process. Tests share all process state.
#[derive(Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Local
    }

    async fn execute(
        &mut self,
        module: &TestModule,
        test: &TestCase,
    ) -> Result<TestOutcome, BridgeError> {
        let Some(run) = test.body.native.clone() else {
            return Ok(Err(TestError::generic(t_args!(
                "backend-no-native-body",
                "name" => &test.name
            ))));
        };

        if let Some(init) = module.init.as_ref().and_then(|h| h.native.clone()) {
            debug!("{}", t_args!("debug-init-hook", "module" => module.display_name()));
            if let Err(e) = contained(|| init()).await {
                return Ok(Err(init_failure(e)));
            }
        } else if module.init.as_ref().is_some_and(|h| h.script.is_some()) {
            return Ok(Err(TestError::generic(t!("backend-init-script-only"))));
        }

        Ok(contained(|| run(Assert)).await)
    }
}

/// Run a native procedure, turning a panic in it into a test failure.
async fn contained<F>(start: F) -> Result<(), TestError>
where
    F: FnOnce() -> BoxFuture<'static, Result<(), TestError>>,
{
    let future = match catch_unwind(AssertUnwindSafe(start)) {
        Ok(future) => future,
        Err(payload) => return Err(panicked(payload.as_ref())),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(panicked(payload.as_ref())),
    }
}

fn panicked(payload: &(dyn Any + Send)) -> TestError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| t!("backend-panic-opaque"));
    TestError::generic(t_args!("backend-test-panicked", "message" => message))
}

fn init_failure(err: TestError) -> TestError {
    let trace = match &err {
        TestError::Generic { trace, .. } => trace.clone(),
        TestError::Assertion(_) => None,
    };
    TestError::Generic {
        message: t_args!("backend-init-failed", "error" => err),
        trace,
    }
}
