//! TRX (Visual Studio TeamTest 2010) report export.
//!
//! Element and attribute names, the namespace and the well-known list ids must stay as
//! they are: result viewers match on them literally.

use crate::results::FinalResults;
use crate::t_args;
use crate::types::{TestIdentity, TestResult};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::fs;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

pub const TRX_NAMESPACE: &str = "http://microsoft.com/schemas/VisualStudio/TeamTest/2010";
/// "Results Not in a List": every result is filed here.
pub const UNGROUPED_LIST_ID: &str = "8c84fa94-04c1-424b-9868-57a2d4851a1d";
pub const ALL_LOADED_LIST_ID: &str = "19431567-8539-422a-85d7-44ee4e166bda";
pub const UNIT_TEST_TYPE: &str = "13cdc9d9-ddb5-4fa4-a97d-d965ccfc6d4b";
pub const SETTINGS_ID: &str = "6c4d5628-128e-4c3f-b7d2-8a4d1a0f3e52";
pub const ADAPTER_TYPE_NAME: &str = "executor://pagerun/v1";
pub const TOOL_NAME: &str = "pagerun";

/// Facts about the run that are not part of any result.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub run_user: String,
    pub computer_name: String,
    pub generated_at: DateTime<Utc>,
}

impl RunInfo {
    pub fn current() -> Self {
        let computer_name = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            run_user: whoami::username(),
            computer_name,
            generated_at: Utc::now(),
        }
    }
}

/// `HH:MM:SS.mmm` by integer division; hours keep growing past a day.
pub fn format_duration(duration: chrono::Duration) -> String {
    let ms = duration.num_milliseconds().max(0);
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        ms / 60_000 % 60,
        ms / 1_000 % 60,
        ms % 1_000
    )
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn outcome(result: &TestResult) -> &'static str {
    if result.is_pass() { "Passed" } else { "Failed" }
}

struct Row<'a> {
    identity: &'a TestIdentity,
    result: &'a TestResult,
    test_id: String,
    execution_id: String,
    storage: String,
}

struct Doc {
    writer: Writer<Vec<u8>>,
}

impl Doc {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Start(start))?;
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Empty(start))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.open(name, &[])?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner()).context("report is not valid UTF-8")
    }
}

/// Render the whole report document.
pub fn render(results: &FinalResults, info: &RunInfo) -> Result<String> {
    let rows: Vec<Row<'_>> = results
        .iter()
        .map(|(identity, result)| Row {
            identity,
            result,
            test_id: Uuid::new_v4().to_string(),
            execution_id: Uuid::new_v4().to_string(),
            storage: identity
                .test
                .source_location
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| identity.module_name.clone()),
        })
        .collect();

    let mut doc = Doc::new();
    doc.writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let run_id = Uuid::new_v4().to_string();
    let run_name = format!(
        "{TOOL_NAME} test run {}",
        info.generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    doc.open(
        "TestRun",
        &[
            ("id", run_id.as_str()),
            ("name", run_name.as_str()),
            ("runUser", info.run_user.as_str()),
            ("xmlns", TRX_NAMESPACE),
        ],
    )?;

    write_times(&mut doc, &rows, info)?;
    write_settings(&mut doc)?;
    write_results(&mut doc, &rows, info)?;
    write_definitions(&mut doc, &rows)?;
    write_entries(&mut doc, &rows)?;
    write_lists(&mut doc)?;
    write_summary(&mut doc, results)?;

    doc.close("TestRun")?;
    doc.finish()
}

fn write_times(doc: &mut Doc, rows: &[Row<'_>], info: &RunInfo) -> Result<()> {
    let mut by_start: Vec<&TestResult> = rows.iter().map(|r| r.result).collect();
    by_start.sort_by_key(|r| r.start_time);
    let start = by_start
        .first()
        .map(|r| r.start_time)
        .unwrap_or(info.generated_at);
    let finish = by_start
        .last()
        .map(|r| r.end_time)
        .unwrap_or(info.generated_at);
    let start = timestamp(&start);
    let finish = timestamp(&finish);
    doc.empty(
        "Times",
        &[
            ("creation", start.as_str()),
            ("queuing", start.as_str()),
            ("start", start.as_str()),
            ("finish", finish.as_str()),
        ],
    )
}

fn write_settings(doc: &mut Doc) -> Result<()> {
    doc.open("TestSettings", &[("name", "default"), ("id", SETTINGS_ID)])?;
    doc.open("Execution", &[])?;
    doc.empty("TestTypeSpecific", &[])?;
    doc.close("Execution")?;
    doc.empty(
        "Deployment",
        &[("enabled", "false"), ("runDeploymentRoot", TOOL_NAME)],
    )?;
    doc.close("TestSettings")
}

fn write_results(doc: &mut Doc, rows: &[Row<'_>], info: &RunInfo) -> Result<()> {
    doc.open("Results", &[])?;
    for row in rows {
        let duration = format_duration(row.result.duration());
        let start = timestamp(&row.result.start_time);
        let end = timestamp(&row.result.end_time);
        let attrs = [
            ("executionId", row.execution_id.as_str()),
            ("testId", row.test_id.as_str()),
            ("testName", row.identity.test.name.as_str()),
            ("computerName", info.computer_name.as_str()),
            ("duration", duration.as_str()),
            ("startTime", start.as_str()),
            ("endTime", end.as_str()),
            ("testType", UNIT_TEST_TYPE),
            ("outcome", outcome(row.result)),
            ("testListId", UNGROUPED_LIST_ID),
            ("relativeResultsDirectory", row.execution_id.as_str()),
        ];
        match &row.result.error_message {
            Some(message) => {
                doc.open("UnitTestResult", &attrs)?;
                doc.open("Output", &[])?;
                doc.open("ErrorInfo", &[])?;
                doc.text_element("Message", message)?;
                doc.close("ErrorInfo")?;
                doc.close("Output")?;
                doc.close("UnitTestResult")?;
            }
            None => doc.empty("UnitTestResult", &attrs)?,
        }
    }
    doc.close("Results")
}

fn write_definitions(doc: &mut Doc, rows: &[Row<'_>]) -> Result<()> {
    doc.open("TestDefinitions", &[])?;
    for row in rows {
        let name = row.identity.test.name.as_str();
        doc.open(
            "UnitTest",
            &[
                ("name", name),
                ("storage", row.storage.as_str()),
                ("id", row.test_id.as_str()),
            ],
        )?;
        doc.empty("Execution", &[("id", row.execution_id.as_str())])?;
        doc.empty(
            "TestMethod",
            &[
                ("codeBase", row.storage.as_str()),
                ("adapterTypeName", ADAPTER_TYPE_NAME),
                ("className", row.identity.module_name.as_str()),
                ("name", name),
            ],
        )?;
        doc.close("UnitTest")?;
    }
    doc.close("TestDefinitions")
}

fn write_entries(doc: &mut Doc, rows: &[Row<'_>]) -> Result<()> {
    doc.open("TestEntries", &[])?;
    for row in rows {
        doc.empty(
            "TestEntry",
            &[
                ("testId", row.test_id.as_str()),
                ("executionId", row.execution_id.as_str()),
                ("testListId", UNGROUPED_LIST_ID),
            ],
        )?;
    }
    doc.close("TestEntries")
}

fn write_lists(doc: &mut Doc) -> Result<()> {
    doc.open("TestLists", &[])?;
    doc.empty(
        "TestList",
        &[("name", "Results Not in a List"), ("id", UNGROUPED_LIST_ID)],
    )?;
    doc.empty(
        "TestList",
        &[("name", "All Loaded Results"), ("id", ALL_LOADED_LIST_ID)],
    )?;
    doc.close("TestLists")
}

fn write_summary(doc: &mut Doc, results: &FinalResults) -> Result<()> {
    let outcome = if results.any_failed() { "Failed" } else { "Passed" };
    let total = results.total().to_string();
    let passed = results.passed().to_string();
    let failed = results.failed().to_string();
    let mut counters = vec![
        ("total", total.as_str()),
        ("executed", total.as_str()),
        ("passed", passed.as_str()),
    ];
    if results.failed() > 0 {
        counters.push(("failed", failed.as_str()));
    }
    doc.open("ResultSummary", &[("outcome", outcome)])?;
    doc.empty("Counters", &counters)?;
    doc.close("ResultSummary")
}

/// Render and write the report, creating parent directories. The file is written under a
/// temporary name and renamed into place, so a failed write leaves no partial report.
pub fn write_trx(results: &FinalResults, info: &RunInfo, path: &Path) -> Result<()> {
    let xml = render(results, info)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| t_args!("trx-create-dir-failed", "path" => parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    if let Err(e) = fs::write(&tmp, xml) {
        let _ = fs::remove_file(&tmp);
        return Err(e)
            .with_context(|| t_args!("trx-write-failed", "path" => path.display()));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e)
            .with_context(|| t_args!("trx-write-failed", "path" => path.display()));
    }
    info!("{}", t_args!("info-trx-written", "path" => path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestCase;
    use chrono::TimeZone;
    use regex::Regex;
    use std::sync::Arc;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn info() -> RunInfo {
        RunInfo {
            run_user: "ci".into(),
            computer_name: "build-01".into(),
            generated_at: at(0),
        }
    }

    fn sample() -> FinalResults {
        let mut results = FinalResults::new();
        let one = Arc::new(TestCase::new("renders <b>").with_source_location("tests/dom.yaml"));
        let two = Arc::new(TestCase::new("counts"));
        results.record(
            TestIdentity {
                test: one,
                module_name: "dom".into(),
                sequence: 1,
            },
            TestResult::passed(at(100), at(350)),
        );
        results.record(
            TestIdentity {
                test: two,
                module_name: "(no module)".into(),
                sequence: 2,
            },
            TestResult::failed(at(50), at(900), "equals assertion failed: expected 1, got 2"),
        );
        results
    }

    #[test]
    fn duration_uses_integer_division() {
        let d = chrono::Duration::milliseconds(3_723_456);
        assert_eq!(format_duration(d), "01:02:03.456");
        let long = chrono::Duration::hours(25) + chrono::Duration::milliseconds(7);
        assert_eq!(format_duration(long), "25:00:00.007");
        assert_eq!(format_duration(chrono::Duration::zero()), "00:00:00.000");
    }

    #[test]
    fn summary_counts_and_outcome() {
        let xml = render(&sample(), &info()).unwrap();
        assert!(xml.contains(r#"<ResultSummary outcome="Failed">"#));
        assert!(xml.contains(r#"<Counters total="2" executed="2" passed="1" failed="1"/>"#));
        assert!(xml.contains(&format!(r#"xmlns="{TRX_NAMESPACE}""#)));
        assert!(xml.contains(r#"runUser="ci""#));
        assert!(xml.contains(r#"computerName="build-01""#));
    }

    #[test]
    fn failed_counter_omitted_when_zero() {
        let mut results = FinalResults::new();
        results.record(
            TestIdentity {
                test: Arc::new(TestCase::new("ok")),
                module_name: "m".into(),
                sequence: 1,
            },
            TestResult::passed(at(0), at(1)),
        );
        let xml = render(&results, &info()).unwrap();
        assert!(xml.contains(r#"<ResultSummary outcome="Passed">"#));
        assert!(xml.contains(r#"<Counters total="1" executed="1" passed="1"/>"#));
    }

    #[test]
    fn entries_are_cross_referenced() {
        let xml = render(&sample(), &info()).unwrap();
        let result_re =
            Regex::new(r#"<UnitTestResult executionId="([^"]+)" testId="([^"]+)""#).unwrap();
        let pairs: Vec<(String, String)> = result_re
            .captures_iter(&xml)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();
        assert_eq!(pairs.len(), 2);
        for (execution_id, test_id) in &pairs {
            assert!(xml.contains(&format!(
                r#"<TestEntry testId="{test_id}" executionId="{execution_id}" testListId="{UNGROUPED_LIST_ID}"/>"#
            )));
            assert!(xml.contains(&format!(r#"<Execution id="{execution_id}"/>"#)));
            assert!(xml.contains(&format!(r#"id="{test_id}">"#)));
        }
        assert!(xml.contains(r#"className="dom""#));
        assert!(xml.contains(r#"storage="tests/dom.yaml""#));
        assert!(xml.contains("renders &lt;b&gt;"));
        assert!(xml.contains("<Message>equals assertion failed: expected 1, got 2</Message>"));
        assert!(xml.contains(r#"duration="00:00:00.850""#));
    }

    #[test]
    fn times_follow_start_order() {
        let xml = render(&sample(), &info()).unwrap();
        // Sorted by start, the last entry is the one starting at 100ms, so finish is its
        // end even though the other entry ends later.
        let first_start = timestamp(&at(50));
        let last_end = timestamp(&at(350));
        assert!(xml.contains(&format!(
            r#"<Times creation="{first_start}" queuing="{first_start}" start="{first_start}" finish="{last_end}"/>"#
        )));
    }

    #[test]
    fn exports_differ_only_in_ids() {
        let results = sample();
        let a = render(&results, &info()).unwrap();
        let b = render(&results, &info()).unwrap();
        assert_ne!(a, b);
        let uuid = Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
            .unwrap();
        assert_eq!(uuid.replace_all(&a, "ID"), uuid.replace_all(&b, "ID"));
    }

    #[test]
    fn writes_into_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/run.trx");
        write_trx(&sample(), &info(), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(!dir.path().join("out/nested/run.trx.tmp").exists());
    }

    #[test]
    fn failed_rename_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.trx");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();
        assert!(write_trx(&sample(), &info(), &path).is_err());
        assert!(!dir.path().join("run.trx.tmp").exists());
        assert!(path.is_dir());
    }
}
