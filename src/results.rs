use crate::types::{TestIdentity, TestResult};

/// Every result of a run, in completion order.
#[derive(Debug, Clone, Default)]
pub struct FinalResults {
    entries: Vec<(TestIdentity, TestResult)>,
}

impl FinalResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, identity: TestIdentity, result: TestResult) {
        self.entries.push((identity, result));
    }

    pub fn entries(&self) -> &[(TestIdentity, TestResult)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TestIdentity, TestResult)> {
        self.entries.iter()
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn passed(&self) -> usize {
        self.entries.iter().filter(|(_, r)| r.is_pass()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn any_failed(&self) -> bool {
        self.failed() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestCase;
    use chrono::Utc;
    use std::sync::Arc;

    fn identity(name: &str, sequence: usize) -> TestIdentity {
        TestIdentity {
            test: Arc::new(TestCase::new(name)),
            module_name: "m".into(),
            sequence,
        }
    }

    #[test]
    fn tallies_and_keeps_order() {
        let now = Utc::now();
        let mut results = FinalResults::new();
        results.record(identity("same", 1), TestResult::passed(now, now));
        results.record(identity("same", 1), TestResult::failed(now, now, "boom"));
        results.record(identity("other", 2), TestResult::passed(now, now));

        assert_eq!(results.total(), 3);
        assert_eq!(results.passed(), 2);
        assert_eq!(results.failed(), 1);
        assert!(results.any_failed());
        assert_eq!(results.entries()[1].1.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn empty_run_has_no_failures() {
        let results = FinalResults::new();
        assert_eq!(results.passed() + results.failed(), 0);
        assert!(!results.any_failed());
    }
}
