//! Structured report extraction and alignment.
//!
//! Test tools print their JSON report after arbitrary log noise. Readers here
//! locate the report, turn it into `ReportedTest` records and align those to
//! the request's cases.

use crate::sandbox::RawExecutionOutcome;
use gradebox_common::types::{TestCase, TestOutcome};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

lazy_static! {
    /// Case marker appended to generated test titles: `name (case 3)`
    static ref CASE_TITLE: Regex = Regex::new(r"\(case (\d+)\)\s*$").unwrap();
    /// Generated function and method names end in `_case_N` or `testN`
    static ref CASE_SYMBOL: Regex = Regex::new(r"(?:_case_|Case_|\.test)(\d+)\b").unwrap();
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;]*m").unwrap();
}

/// One test as the tool reported it, before alignment
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedTest {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
    pub duration_ms: Option<f64>,
    /// Zero-based index of the originating case when the harness encoded one
    pub case_index: Option<usize>,
}

impl ReportedTest {
    pub fn new(name: impl Into<String>, passed: bool) -> Self {
        let name = name.into();
        let case_index = case_ordinal_of(&name).and_then(|n| n.checked_sub(1));
        Self {
            name,
            passed,
            error: None,
            duration_ms: None,
            case_index,
        }
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error.map(|e| strip_ansi(&e));
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: Option<f64>) -> Self {
        self.duration_ms = duration_ms.filter(|d| d.is_finite() && *d >= 0.0);
        self
    }
}

/// 1-based case ordinal encoded in a generated test name, if any
pub fn case_ordinal_of(name: &str) -> Option<usize> {
    CASE_TITLE
        .captures(name)
        .or_else(|| CASE_SYMBOL.captures(name))
        .and_then(|c| c[1].parse().ok())
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Root key of a Jest or Supertest `--json` report
pub const JEST_ROOT: &str = "testResults";
/// Root key of a pytest-json-report file
pub const PYTEST_ROOT: &str = "tests";
/// Root key of a Playwright JSON report
pub const PLAYWRIGHT_ROOT: &str = "suites";

/// Last balanced `{...}` span in `text` that parses as a JSON object
/// carrying `root_key`.
///
/// The scan is string-aware, so braces inside string literals do not end a
/// span early. Spans that fail to parse, or lack the key, are skipped in
/// favor of earlier ones.
pub fn extract_json_object(text: &str, root_key: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if depth > 0 && in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    spans.iter().rev().find_map(|&(s, e)| {
        serde_json::from_str::<Value>(&text[s..e])
            .ok()
            .filter(|value| value.get(root_key).is_some())
    })
}

/// Locate a tool report in a run's output.
///
/// The report file is cat'ed to stdout. Stderr carries the tool's own
/// failure messages and whatever the submission logs, so it is only
/// searched when stdout holds no report.
pub fn extract_report(raw: &RawExecutionOutcome, root_key: &str) -> Option<Value> {
    extract_json_object(&raw.stdout, root_key)
        .or_else(|| extract_json_object(&raw.stderr, root_key))
}

/// Map reported tests onto cases.
///
/// Each record lands on the case its encoded index names, else on the case
/// at its position. Records naming no case, and second records for a case
/// already matched, are dropped. The result follows case order.
pub fn align(reported: Vec<ReportedTest>, cases: &[TestCase]) -> Vec<TestOutcome> {
    let mut by_case: BTreeMap<usize, ReportedTest> = BTreeMap::new();
    for (position, test) in reported.into_iter().enumerate() {
        let index = test.case_index.unwrap_or(position);
        if index >= cases.len() || by_case.contains_key(&index) {
            continue;
        }
        by_case.insert(index, test);
    }

    by_case
        .into_iter()
        .map(|(index, test)| {
            let case = &cases[index];
            TestOutcome {
                test_id: case.id.clone(),
                name: case.name.clone(),
                passed: test.passed,
                points: case.points,
                error: if test.passed { None } else { test.error.or_else(|| Some("Test failed".to_string())) },
                duration_ms: test.duration_ms,
            }
        })
        .collect()
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Jest `--json` report: `testResults[].assertionResults[]`
pub fn read_jest(report: &Value) -> Vec<ReportedTest> {
    let Some(files) = report.get("testResults").and_then(Value::as_array) else {
        return Vec::new();
    };
    files
        .iter()
        .filter_map(|file| file.get("assertionResults").and_then(Value::as_array))
        .flatten()
        .map(|assertion| {
            let title = assertion
                .get("title")
                .or_else(|| assertion.get("fullName"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let passed = assertion.get("status").and_then(Value::as_str) == Some("passed");
            let error = assertion
                .get("failureMessages")
                .and_then(Value::as_array)
                .filter(|messages| !messages.is_empty())
                .map(|messages| {
                    messages
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("\n")
                });
            ReportedTest::new(title, passed)
                .with_error(error)
                .with_duration_ms(as_f64(assertion.get("duration")))
        })
        .collect()
}

/// pytest-json-report: `tests[]` with per-phase details, durations in seconds
pub fn read_pytest(report: &Value) -> Vec<ReportedTest> {
    let Some(tests) = report.get("tests").and_then(Value::as_array) else {
        return Vec::new();
    };
    tests
        .iter()
        .map(|test| {
            let nodeid = test.get("nodeid").and_then(Value::as_str).unwrap_or_default();
            let passed = test.get("outcome").and_then(Value::as_str) == Some("passed");
            let error = if passed {
                None
            } else {
                ["call", "setup", "teardown"]
                    .iter()
                    .find_map(|phase| as_text(test.get(*phase).and_then(|p| p.get("longrepr"))))
                    .or_else(|| as_text(test.get("longrepr")))
            };
            let seconds = as_f64(test.get("call").and_then(|c| c.get("duration")))
                .or_else(|| as_f64(test.get("duration")));
            ReportedTest::new(nodeid, passed)
                .with_error(error)
                .with_duration_ms(seconds.map(|s| s * 1000.0))
        })
        .collect()
}

/// Playwright JSON reporter: nested `suites[]` holding `specs[]`
pub fn read_playwright(report: &Value) -> Vec<ReportedTest> {
    let mut out = Vec::new();
    if let Some(suites) = report.get("suites").and_then(Value::as_array) {
        for suite in suites {
            collect_playwright_specs(suite, &mut out);
        }
    }
    out
}

fn collect_playwright_specs(suite: &Value, out: &mut Vec<ReportedTest>) {
    if let Some(specs) = suite.get("specs").and_then(Value::as_array) {
        for spec in specs {
            let title = spec.get("title").and_then(Value::as_str).unwrap_or_default();
            let passed = spec.get("ok").and_then(Value::as_bool).unwrap_or(false);
            let result = spec
                .get("tests")
                .and_then(|t| t.get(0))
                .and_then(|t| t.get("results"))
                .and_then(|r| r.get(0));
            let error = result
                .and_then(|r| r.get("error"))
                .and_then(|e| as_text(e.get("message")));
            out.push(
                ReportedTest::new(title, passed)
                    .with_error(error)
                    .with_duration_ms(as_f64(result.and_then(|r| r.get("duration")))),
            );
        }
    }
    if let Some(children) = suite.get("suites").and_then(Value::as_array) {
        for child in children {
            collect_playwright_specs(child, out);
        }
    }
}
