/// Scoring Aggregator - Framework-Agnostic Verdict Assembly
///
/// **Core Responsibility:**
/// Fold aligned per-case outcomes and the raw process result into one
/// `ExecutionVerdict`.
///
/// **Critical Properties:**
/// - Knows nothing about Docker, harnesses or report formats
/// - Pure function: (outcomes, cases, raw outcome) → verdict
///
/// **Scoring Rules:**
/// - total_points = sum of points of the cases that produced an outcome
/// - points_earned = sum of points of passed outcomes
/// - success = process exit code 0, independent of partial passes
/// - Cases with no parsed outcome are not scored; a parse warning says so

use crate::adapters::ExecutionModel;
use crate::sandbox::RawExecutionOutcome;
use gradebox_common::types::{
    ApiMetrics, Diagnostics, ExecutionVerdict, FailureKind, Framework, TestCase, TestOutcome,
};

/// Latency and pass counts over API-style outcomes
pub fn api_metrics(outcomes: &[TestOutcome]) -> ApiMetrics {
    let timings: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| o.duration_ms)
        .filter(|d| *d > 0.0)
        .collect();
    let average_response_time_ms = if timings.is_empty() {
        0.0
    } else {
        timings.iter().sum::<f64>() / timings.len() as f64
    };
    ApiMetrics {
        average_response_time_ms,
        total_requests: outcomes.len() as u32,
        successful_requests: outcomes.iter().filter(|o| o.passed).count() as u32,
    }
}

fn classify(
    outcomes: &[TestOutcome],
    cases: &[TestCase],
    tests_passed: usize,
    exit_ok: bool,
) -> (Option<FailureKind>, Option<String>) {
    if outcomes.is_empty() && !cases.is_empty() {
        return (
            Some(FailureKind::ParseError),
            Some("No test results parsed from runner output".to_string()),
        );
    }

    let warning = (outcomes.len() < cases.len()).then(|| {
        format!(
            "Parsed {} of {} test results; unmatched cases are not scored",
            outcomes.len(),
            cases.len()
        )
    });

    let failure = if tests_passed < outcomes.len() {
        Some(FailureKind::AssertionFailure)
    } else if !exit_ok {
        Some(FailureKind::RuntimeError)
    } else if warning.is_some() {
        Some(FailureKind::ParseError)
    } else {
        None
    };
    (failure, warning)
}

/// Assemble the verdict for a run that produced output
pub fn aggregate(
    outcomes: Vec<TestOutcome>,
    cases: &[TestCase],
    raw: &RawExecutionOutcome,
    framework: Framework,
    parser: &str,
    model: ExecutionModel,
) -> ExecutionVerdict {
    let tests_run = outcomes.len();
    let tests_passed = outcomes.iter().filter(|o| o.passed).count();
    // Points are caller-supplied; saturate instead of overflowing
    let total_points = outcomes.iter().map(|o| o.points).fold(0u32, u32::saturating_add);
    let points_earned = outcomes
        .iter()
        .filter(|o| o.passed)
        .map(|o| o.points)
        .fold(0u32, u32::saturating_add);
    let exit_ok = raw.exit_code == Some(0);

    let (failure, parse_warning) = classify(&outcomes, cases, tests_passed, exit_ok);
    let api_metrics = match model {
        ExecutionModel::Service => Some(api_metrics(&outcomes)),
        ExecutionModel::Library => None,
    };

    ExecutionVerdict {
        success: exit_ok,
        tests_run: tests_run as u32,
        tests_passed: tests_passed as u32,
        total_points,
        points_earned,
        results: outcomes,
        output: raw.combined(),
        execution_time_ms: raw.duration.as_millis() as u64,
        api_metrics,
        diagnostics: Diagnostics {
            framework: framework.as_str().to_string(),
            parser: parser.to_string(),
            parse_warning,
            failure,
            default_assertions: Vec::new(),
            output_truncated: raw.truncated,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::case;
    use std::time::Duration;

    fn outcome(id: &str, passed: bool, points: u32, duration_ms: Option<f64>) -> TestOutcome {
        TestOutcome {
            test_id: id.to_string(),
            name: id.to_string(),
            passed,
            points,
            error: (!passed).then(|| "failed".to_string()),
            duration_ms,
        }
    }

    fn raw(exit_code: Option<i64>) -> RawExecutionOutcome {
        RawExecutionOutcome {
            stdout: "out".into(),
            exit_code,
            duration: Duration::from_millis(1500),
            ..Default::default()
        }
    }

    #[test]
    fn test_huge_point_values_saturate() {
        let cases = vec![
            case("a", "a", u32::MAX, None),
            case("b", "b", u32::MAX, None),
            case("c", "c", 1, None),
        ];
        let outcomes = vec![
            outcome("a", true, u32::MAX, None),
            outcome("b", true, u32::MAX, None),
            outcome("c", false, 1, None),
        ];
        let verdict = aggregate(outcomes, &cases, &raw(Some(1)), Framework::Jest, "jest_json", ExecutionModel::Library);

        assert_eq!(verdict.total_points, u32::MAX);
        assert_eq!(verdict.points_earned, u32::MAX);
        assert_eq!(verdict.tests_passed, 2);
    }

    #[test]
    fn test_partial_pass_scores_passed_points_only() {
        let cases = vec![case("a", "a", 30, None), case("b", "b", 70, None)];
        let outcomes = vec![outcome("a", true, 30, None), outcome("b", false, 70, None)];
        let verdict = aggregate(outcomes, &cases, &raw(Some(1)), Framework::Jest, "jest_json", ExecutionModel::Library);

        assert!(!verdict.success);
        assert_eq!(verdict.tests_run, 2);
        assert_eq!(verdict.tests_passed, 1);
        assert_eq!(verdict.total_points, 100);
        assert_eq!(verdict.points_earned, 30);
        assert_eq!(verdict.execution_time_ms, 1500);
        assert_eq!(verdict.failure(), Some(FailureKind::AssertionFailure));
        assert_eq!(verdict.diagnostics.parse_warning, None);
        assert!(verdict.api_metrics.is_none());
    }

    #[test]
    fn test_all_pass_exit_zero() {
        let cases = vec![case("a", "a", 10, None)];
        let verdict = aggregate(
            vec![outcome("a", true, 10, None)],
            &cases,
            &raw(Some(0)),
            Framework::Pytest,
            "pytest_json",
            ExecutionModel::Library,
        );
        assert!(verdict.success);
        assert_eq!(verdict.failure(), None);
        assert_eq!(verdict.points_earned, verdict.total_points);
    }

    #[test]
    fn test_nothing_parsed_is_parse_error() {
        let cases = vec![case("a", "a", 10, None)];
        let verdict = aggregate(Vec::new(), &cases, &raw(Some(1)), Framework::Jest, "jest_json", ExecutionModel::Library);

        assert_eq!(verdict.tests_run, 0);
        assert_eq!(verdict.total_points, 0);
        assert_eq!(verdict.failure(), Some(FailureKind::ParseError));
        assert!(verdict.diagnostics.parse_warning.is_some());
    }

    #[test]
    fn test_dropped_cases_warn_and_are_not_scored() {
        let cases = vec![case("a", "a", 10, None), case("b", "b", 90, None)];
        let verdict = aggregate(
            vec![outcome("a", true, 10, None)],
            &cases,
            &raw(Some(0)),
            Framework::Jest,
            "jest_json",
            ExecutionModel::Library,
        );
        assert_eq!(verdict.total_points, 10);
        assert_eq!(verdict.failure(), Some(FailureKind::ParseError));
        assert_eq!(
            verdict.diagnostics.parse_warning.as_deref(),
            Some("Parsed 1 of 2 test results; unmatched cases are not scored")
        );
    }

    #[test]
    fn test_empty_case_list_success_from_exit_code() {
        let ok = aggregate(Vec::new(), &[], &raw(Some(0)), Framework::Jest, "jest_json", ExecutionModel::Library);
        assert!(ok.success);
        assert_eq!((ok.tests_run, ok.total_points, ok.points_earned), (0, 0, 0));
        assert_eq!(ok.failure(), None);

        let crashed = aggregate(Vec::new(), &[], &raw(Some(2)), Framework::Jest, "jest_json", ExecutionModel::Library);
        assert!(!crashed.success);
        assert_eq!(crashed.failure(), Some(FailureKind::RuntimeError));
    }

    #[test]
    fn test_service_model_reports_api_metrics() {
        let cases = vec![case("a", "a", 5, None), case("b", "b", 5, None), case("c", "c", 5, None)];
        let outcomes = vec![
            outcome("a", true, 5, Some(10.0)),
            outcome("b", true, 5, Some(30.0)),
            outcome("c", false, 5, None),
        ];
        let verdict = aggregate(outcomes, &cases, &raw(Some(1)), Framework::Supertest, "jest_json", ExecutionModel::Service);
        let metrics = verdict.api_metrics.unwrap();

        assert_eq!(metrics.average_response_time_ms, 20.0);
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
    }

    #[test]
    fn test_metrics_without_timings() {
        let metrics = api_metrics(&[outcome("a", false, 1, Some(0.0))]);
        assert_eq!(metrics.average_response_time_ms, 0.0);
        assert_eq!(metrics.successful_requests, 0);
    }

    #[test]
    fn test_truncation_is_surfaced() {
        let mut truncated = raw(Some(0));
        truncated.truncated = true;
        let verdict = aggregate(Vec::new(), &[], &truncated, Framework::Dotnet, "dotnet_console", ExecutionModel::Library);
        assert!(verdict.diagnostics.output_truncated);
    }
}
