//! Assertion primitives shared by both runtimes.
//!
//! A failed assertion is a plain tagged record rather than a panic, so the same
//! [`AssertionFailure`] value can be raised by a native test body or rebuilt from the
//! JSON record a sandboxed test hands back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Marker field that tags a JSON object as an assertion failure record.
pub const FAILURE_TAG: &str = "harnessFailure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionKind {
    Equals,
    Truthy,
    Throws,
    DeepEqual,
}

impl fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssertionKind::Equals => "equals",
            AssertionKind::Truthy => "truthy",
            AssertionKind::Throws => "throws",
            AssertionKind::DeepEqual => "deepEqual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionFailure {
    pub kind: AssertionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct TaggedRecord {
    #[serde(rename = "harnessFailure")]
    tag: bool,
    #[serde(flatten)]
    failure: AssertionFailure,
}

impl AssertionFailure {
    pub fn new(kind: AssertionKind) -> Self {
        Self {
            kind,
            expected: None,
            actual: None,
            message: None,
        }
    }

    /// Encode as the tagged record that crosses the sandbox boundary.
    pub fn to_record(&self) -> Value {
        let record = TaggedRecord {
            tag: true,
            failure: self.clone(),
        };
        serde_json::to_value(record).unwrap_or(Value::Null)
    }

    /// Rebuild a failure from a record; `None` when the value carries no failure tag.
    pub fn from_record(value: &Value) -> Option<Self> {
        let tagged = value
            .get(FAILURE_TAG)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !tagged {
            return None;
        }
        serde_json::from_value::<TaggedRecord>(value.clone())
            .ok()
            .map(|r| r.failure)
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} assertion failed", self.kind)?;
        if self.expected.is_some() || self.actual.is_some() {
            let expected = self.expected.as_ref().map(render_value);
            let actual = self.actual.as_ref().map(render_value);
            write!(
                f,
                ": expected {}, got {}",
                expected.as_deref().unwrap_or("undefined"),
                actual.as_deref().unwrap_or("undefined")
            )?;
        }
        if let Some(msg) = &self.message {
            write!(f, " ({msg})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AssertionFailure {}

/// Anything a test body or init hook can fail with.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
    #[error("{message}")]
    Generic {
        message: String,
        trace: Option<String>,
    },
}

impl TestError {
    pub fn generic(message: impl Into<String>) -> Self {
        TestError::Generic {
            message: message.into(),
            trace: None,
        }
    }

    /// Text recorded as a failed result's error message.
    pub fn report_text(&self) -> String {
        match self {
            TestError::Assertion(failure) => failure.to_string(),
            TestError::Generic {
                message,
                trace: Some(trace),
            } if !trace.trim().is_empty() => format!("{message}\n{trace}"),
            TestError::Generic { message, .. } => message.clone(),
        }
    }
}

impl From<anyhow::Error> for TestError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AssertionFailure>() {
            Ok(failure) => TestError::Assertion(failure),
            Err(err) => TestError::Generic {
                message: err.to_string(),
                trace: Some(format!("{err:?}")),
            },
        }
    }
}

/// The assertion capability handed to native test bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Assert;

impl Assert {
    pub fn equals<'m, T>(
        &self,
        expected: T,
        actual: T,
        message: impl Into<Option<&'m str>>,
    ) -> Result<(), AssertionFailure>
    where
        T: PartialEq + fmt::Debug,
    {
        if expected == actual {
            return Ok(());
        }
        Err(AssertionFailure {
            kind: AssertionKind::Equals,
            expected: Some(Value::String(format!("{expected:?}"))),
            actual: Some(Value::String(format!("{actual:?}"))),
            message: message.into().map(str::to_owned),
        })
    }

    pub fn truthy<'m>(
        &self,
        value: bool,
        message: impl Into<Option<&'m str>>,
    ) -> Result<(), AssertionFailure> {
        if value {
            return Ok(());
        }
        Err(AssertionFailure {
            message: message.into().map(str::to_owned),
            ..AssertionFailure::new(AssertionKind::Truthy)
        })
    }

    /// Passes when `procedure` returns an error or panics.
    pub fn throws<'m, F, T, E>(
        &self,
        procedure: F,
        message: impl Into<Option<&'m str>>,
    ) -> Result<(), AssertionFailure>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let threw = !matches!(catch_unwind(AssertUnwindSafe(procedure)), Ok(Ok(_)));
        if threw {
            return Ok(());
        }
        Err(AssertionFailure {
            message: message.into().map(str::to_owned),
            ..AssertionFailure::new(AssertionKind::Throws)
        })
    }

    /// Structural comparison after converting both sides to JSON values.
    pub fn deep_equal<'m, E, A>(
        &self,
        expected: &E,
        actual: &A,
        message: impl Into<Option<&'m str>>,
    ) -> Result<(), AssertionFailure>
    where
        E: serde::Serialize + ?Sized,
        A: serde::Serialize + ?Sized,
    {
        let message = message.into().map(str::to_owned);
        let to_value = |v: Result<Value, serde_json::Error>| {
            v.map_err(|e| AssertionFailure {
                message: Some(format!("value is not serializable: {e}")),
                ..AssertionFailure::new(AssertionKind::DeepEqual)
            })
        };
        let expected = to_value(serde_json::to_value(expected))?;
        let actual = to_value(serde_json::to_value(actual))?;
        if deep_equal(&expected, &actual) {
            return Ok(());
        }
        Err(AssertionFailure {
            kind: AssertionKind::DeepEqual,
            expected: Some(expected),
            actual: Some(actual),
            message,
        })
    }
}

/// Key-count-then-recurse structural equality; arrays count their indices as keys.
pub fn deep_equal(expected: &Value, actual: &Value) -> bool {
    if std::ptr::eq(expected, actual) {
        return true;
    }
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            e.len() == a.len()
                && e
                    .iter()
                    .all(|(k, ev)| a.get(k).is_some_and(|av| deep_equal(ev, av)))
        }
        (Value::Array(e), Value::Array(a)) => {
            e.len() == a.len() && e.iter().zip(a).all(|(ev, av)| deep_equal(ev, av))
        }
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => {
            false
        }
        (e, a) => e == a,
    }
}
