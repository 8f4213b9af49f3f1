use crate::engine::RunObserver;
use crate::registry::TestRegistry;
use crate::results::FinalResults;
use crate::types::{TestIdentity, TestResult};
use crate::{t, t_args};
use colored::Colorize;
use std::io::Write;

pub fn render_list(registry: &TestRegistry) -> String {
    let mut out = String::new();
    for e in registry.entries() {
        out.push_str(&format!(
            "{} {}\n",
            format!("{}:", e.sequence).yellow(),
            e.test.name
        ));
    }
    out
}

pub fn render_summary(results: &FinalResults) -> String {
    if results.any_failed() {
        t_args!("summary-some-failing",
            "passed" => results.passed().to_string().green(),
            "failed" => results.failed().to_string().red().bold()
        )
    } else {
        t_args!("summary-all-passing", "passed" => results.passed().to_string().green())
    }
}

/// Failure details shown after the `FAIL` marker; only the first line of the error text
/// goes on the status line.
pub fn render_failure(result: &TestResult) -> String {
    let text = result.error_message.as_deref().unwrap_or_default();
    let mut lines = text.lines();
    let mut out = format!(
        "{} ({})",
        t!("status-fail").red().bold(),
        lines.next().unwrap_or_default()
    );
    for line in lines {
        out.push('\n');
        out.push_str(&format!("    {}", line.dimmed()));
    }
    out
}

/// Prints `N: name...PASS` lines as tests complete.
pub struct ConsoleReporter<W> {
    out: W,
    silent: bool,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, silent: bool) -> Self {
        Self { out, silent }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RunObserver for ConsoleReporter<W> {
    fn test_started(&mut self, identity: &TestIdentity) {
        if self.silent {
            return;
        }
        let _ = write!(
            self.out,
            "{} {}...",
            format!("{}:", identity.sequence).yellow(),
            identity.test.name
        );
        let _ = self.out.flush();
    }

    fn test_finished(&mut self, _identity: &TestIdentity, result: &TestResult) {
        if self.silent {
            return;
        }
        let line = if result.is_pass() {
            t!("status-pass").green().bold().to_string()
        } else {
            render_failure(result)
        };
        let _ = writeln!(self.out, "{line}");
    }
}

pub fn print_summary(results: &FinalResults) {
    println!("{}", render_summary(results));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use crate::types::{TestCase, TestModule};
    use chrono::Utc;
    use std::sync::Arc;

    fn no_color() {
        colored::control::set_override(false);
    }

    #[test]
    fn list_numbers_every_test() {
        no_color();
        let mut b = RegistryBuilder::new();
        b.module(
            TestModule::named("a")
                .test(TestCase::new("first"))
                .test(TestCase::new("second")),
        )
        .test(TestCase::new("third"));
        assert_eq!(render_list(&b.build()), "1: first\n2: second\n3: third\n");
    }

    #[test]
    fn console_lines_for_pass_and_fail() {
        no_color();
        let identity = TestIdentity {
            test: Arc::new(TestCase::new("adds")),
            module_name: "m".into(),
            sequence: 3,
        };
        let now = Utc::now();
        let mut reporter = ConsoleReporter::new(Vec::new(), false);
        reporter.test_started(&identity);
        reporter.test_finished(&identity, &TestResult::passed(now, now));
        reporter.test_started(&identity);
        reporter.test_finished(
            &identity,
            &TestResult::failed(now, now, "TypeError: nope\n  at run"),
        );
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(
            text,
            "3: adds...PASS\n3: adds...FAIL (TypeError: nope)\n      at run\n"
        );
    }

    #[test]
    fn silent_reporter_prints_nothing() {
        let identity = TestIdentity {
            test: Arc::new(TestCase::new("quiet")),
            module_name: "m".into(),
            sequence: 1,
        };
        let mut reporter = ConsoleReporter::new(Vec::new(), true);
        reporter.test_started(&identity);
        reporter.test_finished(&identity, &TestResult::passed(Utc::now(), Utc::now()));
        assert!(reporter.into_inner().is_empty());
    }
}
