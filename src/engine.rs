use crate::backend::Backend;
use crate::error::BridgeError;
use crate::registry::TestRegistry;
use crate::results::FinalResults;
use crate::t_args;
use crate::types::{TestIdentity, TestResult};
use chrono::Utc;
use tracing::{debug, error, info};

/// Progress hooks invoked around every executed test.
pub trait RunObserver {
    fn test_started(&mut self, _identity: &TestIdentity) {}
    fn test_finished(&mut self, _identity: &TestIdentity, _result: &TestResult) {}
}

impl RunObserver for () {}

/// Run every registered test, or only the one at 1-based position `only`, strictly in
/// registration order. Test failures are recorded and the run moves on; a backend
/// transport error stops the run and is returned as-is.
pub async fn run_registry<B>(
    registry: &TestRegistry,
    backend: &mut B,
    only: Option<usize>,
    observer: &mut dyn RunObserver,
) -> Result<FinalResults, BridgeError>
where
    B: Backend + ?Sized,
{
    let mut results = FinalResults::new();
    info!(
        "{}",
        t_args!("info-run-start",
            "count" => registry.len(),
            "runtime" => format!("{:?}", backend.kind())
        )
    );

    for entry in registry.entries() {
        if only.is_some_and(|n| n != entry.sequence) {
            continue;
        }

        let identity = TestIdentity {
            test: entry.test.clone(),
            module_name: entry.module.display_name().to_string(),
            sequence: entry.sequence,
        };
        observer.test_started(&identity);

        let start_time = Utc::now();
        let outcome = match backend.execute(entry.module, entry.test).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "{}",
                    t_args!("error-run-aborted",
                        "index" => entry.sequence,
                        "name" => &entry.test.name,
                        "error" => &e
                    )
                );
                return Err(e);
            }
        };
        let end_time = Utc::now();

        let result = match outcome {
            Ok(()) => TestResult::passed(start_time, end_time),
            Err(e) => TestResult::failed(start_time, end_time, e.report_text()),
        };
        debug!(
            "{}",
            t_args!("debug-test-done",
                "index" => entry.sequence,
                "name" => &entry.test.name,
                "status" => format!("{:?}", result.status)
            )
        );
        observer.test_finished(&identity, &result);
        results.record(identity, result);
    }

    info!(
        "{}",
        t_args!("info-run-finished",
            "passed" => results.passed(),
            "failed" => results.failed()
        )
    );
    Ok(results)
}
