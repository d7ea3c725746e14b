use super::{fragment_or_default, indent, report_script, FrameworkAdapter, HarnessSource};
use crate::report::{align, extract_report, read_pytest, PYTEST_ROOT};
use crate::sandbox::{CommandLine, RawExecutionOutcome};
use gradebox_common::types::{ExecutionHints, Framework, TestCase, TestOutcome};

const FALLBACK_ASSERTION: &str = "assert solution is not None";

pub(crate) fn pytest_script(test_file: &str) -> String {
    report_script(&format!(
        "pytest -p no:cacheprovider -q --json-report --json-report-file=/workspace/results.json /workspace/{}",
        test_file
    ))
}

/// Parse a pytest-json-report out of combined output
pub(crate) fn parse_pytest_report(raw: &RawExecutionOutcome, cases: &[TestCase]) -> Vec<TestOutcome> {
    match extract_report(raw, PYTEST_ROOT) {
        Some(report) => align(read_pytest(&report), cases),
        None => Vec::new(),
    }
}

pub struct PytestAdapter;

impl FrameworkAdapter for PytestAdapter {
    fn framework(&self) -> Framework {
        Framework::Pytest
    }

    fn submission_path(&self) -> &'static str {
        "solution.py"
    }

    fn render_harness(
        &self,
        cases: &[TestCase],
        _code: &str,
        _hints: &ExecutionHints,
    ) -> HarnessSource {
        let mut defaulted = Vec::new();
        let mut source = String::from("import pytest\nimport solution\nfrom solution import *\n");
        for (i, case) in cases.iter().enumerate() {
            let body = fragment_or_default(case, FALLBACK_ASSERTION, &mut defaulted);
            // Case names go in a comment; function names must stay identifiers
            source.push_str(&format!(
                "\n\n# {}\ndef test_case_{}():\n{}\n",
                case.name.replace('\n', " "),
                i + 1,
                indent(body, "    ")
            ));
        }
        HarnessSource {
            path: "test_solution.py".to_string(),
            source,
            defaulted,
        }
    }

    fn command(&self) -> CommandLine {
        CommandLine::shell(pytest_script("test_solution.py"))
    }

    fn parser_name(&self) -> &'static str {
        "pytest_json"
    }

    fn parse_output(&self, raw: &RawExecutionOutcome, cases: &[TestCase]) -> Vec<TestOutcome> {
        parse_pytest_report(raw, cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::case;

    #[test]
    fn test_harness_indents_fragments() {
        let cases = vec![
            case("t1", "adds", 3, Some("result = add(1, 2)\nassert result == 3")),
            case("t2", "loads", 2, Some("  ")),
        ];
        let harness = PytestAdapter.render_harness(&cases, "", &ExecutionHints::default());

        assert_eq!(harness.path, "test_solution.py");
        assert!(harness.source.starts_with("import pytest\nimport solution\nfrom solution import *\n"));
        assert!(harness
            .source
            .contains("# adds\ndef test_case_1():\n    result = add(1, 2)\n    assert result == 3\n"));
        assert!(harness
            .source
            .contains("def test_case_2():\n    assert solution is not None\n"));
        assert_eq!(harness.defaulted, vec!["t2".to_string()]);
    }

    #[test]
    fn test_parse_report_after_pytest_noise() {
        let cases = vec![case("t1", "adds", 3, None), case("t2", "loads", 2, None)];
        let raw = RawExecutionOutcome {
            stdout: concat!(
                ".F\n1 failed, 1 passed in 0.03s\n",
                "{\"created\": 1.0, \"tests\": [",
                "{\"nodeid\": \"test_solution.py::test_case_1\", \"outcome\": \"passed\", \"call\": {\"duration\": 0.5}},",
                "{\"nodeid\": \"test_solution.py::test_case_2\", \"outcome\": \"failed\", \"call\": {\"duration\": 0.25, \"longrepr\": \"assert None is not None\"}}",
                "]}"
            )
            .to_string(),
            exit_code: Some(1),
            ..Default::default()
        };

        let outcomes = PytestAdapter.parse_output(&raw, &cases);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].duration_ms, Some(500.0));
        assert!(!outcomes[1].passed);
        assert_eq!(outcomes[1].error.as_deref(), Some("assert None is not None"));
    }

    #[test]
    fn test_command_disables_cache() {
        let script = &PytestAdapter.command().args[1];
        assert!(script.contains("-p no:cacheprovider"));
        assert!(script.contains("--json-report-file=/workspace/results.json"));
    }
}
