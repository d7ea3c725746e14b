use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Default wall-clock budget for one execution
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Source language of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
    Java,
    CSharp,
}

impl Language {
    /// Parse a declared language, accepting the common aliases
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "javascript" | "js" | "node" | "nodejs" => Some(Language::JavaScript),
            "python" | "py" | "python3" => Some(Language::Python),
            "java" => Some(Language::Java),
            "csharp" | "c#" | "cs" | "dotnet" => Some(Language::CSharp),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::JavaScript => write!(f, "javascript"),
            Language::Python => write!(f, "python"),
            Language::Java => write!(f, "java"),
            Language::CSharp => write!(f, "csharp"),
        }
    }
}

/// How a framework exercises the submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkStyle {
    /// Submission plus a generated assertion module
    UnitTest,
    /// Submission imported by a generated browser automation spec
    BrowserUi,
    /// Submission is a runnable service driven by generated requests
    HttpApi,
    /// Submission compiled under a generated build-tool project
    CompiledUnitTest,
}

/// Closed set of supported test frameworks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framework {
    #[serde(rename = "jest")]
    Jest,
    #[serde(rename = "pytest")]
    Pytest,
    #[serde(rename = "playwright")]
    Playwright,
    #[serde(rename = "supertest")]
    Supertest,
    #[serde(rename = "pytest-requests")]
    PytestRequests,
    #[serde(rename = "junit")]
    Junit,
    #[serde(rename = "dotnet")]
    Dotnet,
}

impl Framework {
    pub const ALL: [Framework; 7] = [
        Framework::Jest,
        Framework::Pytest,
        Framework::Playwright,
        Framework::Supertest,
        Framework::PytestRequests,
        Framework::Junit,
        Framework::Dotnet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Jest => "jest",
            Framework::Pytest => "pytest",
            Framework::Playwright => "playwright",
            Framework::Supertest => "supertest",
            Framework::PytestRequests => "pytest-requests",
            Framework::Junit => "junit",
            Framework::Dotnet => "dotnet",
        }
    }

    /// Exact, case-insensitive identifier lookup. Unknown identifiers never
    /// fall through to a default framework.
    pub fn from_str(s: &str) -> Option<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|f| f.as_str() == wanted)
    }

    pub fn language(&self) -> Language {
        match self {
            Framework::Jest | Framework::Playwright | Framework::Supertest => Language::JavaScript,
            Framework::Pytest | Framework::PytestRequests => Language::Python,
            Framework::Junit => Language::Java,
            Framework::Dotnet => Language::CSharp,
        }
    }

    pub fn style(&self) -> FrameworkStyle {
        match self {
            Framework::Jest | Framework::Pytest => FrameworkStyle::UnitTest,
            Framework::Playwright => FrameworkStyle::BrowserUi,
            Framework::Supertest | Framework::PytestRequests => FrameworkStyle::HttpApi,
            Framework::Junit | Framework::Dotnet => FrameworkStyle::CompiledUnitTest,
        }
    }

    /// Built-in image table, one image per (language, framework) pair
    pub fn default_image(&self) -> &'static str {
        match self {
            Framework::Jest | Framework::Supertest => "gradebox/executor-node:latest",
            Framework::Pytest | Framework::PytestRequests => "gradebox/executor-python:latest",
            Framework::Playwright => "gradebox/executor-playwright:latest",
            Framework::Junit => "gradebox/executor-java:latest",
            Framework::Dotnet => "gradebox/executor-dotnet:latest",
        }
    }

    /// Comma separated list used in "unsupported framework" diagnostics
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative request/expectation shape for API-style tests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRequestSpec {
    #[serde(default)]
    pub method: Option<String>,
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub expected_status: Option<u16>,
    #[serde(default)]
    pub expected_body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub points: u32,
    /// Assertion fragment embedded verbatim into the generated harness
    #[serde(default)]
    pub test_code: Option<String>,
    #[serde(default)]
    pub request: Option<ApiRequestSpec>,
    /// Whether the learner sees this case. Carried, never interpreted.
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl TestCase {
    /// The caller-supplied assertion fragment, if it carries any code
    pub fn assertion(&self) -> Option<&str> {
        self.test_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointHint {
    pub method: String,
    pub path: String,
}

/// Framework-specific execution hints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHints {
    #[serde(default)]
    pub endpoints: Vec<EndpointHint>,
    /// Name of the application object exported by an API submission
    #[serde(default)]
    pub app_symbol: Option<String>,
}

impl ExecutionHints {
    /// Method declared for `path`, if an endpoint definition covers it
    pub fn method_for(&self, path: &str) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|e| e.path == path)
            .map(|e| e.method.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language: String,
    pub framework: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub hints: ExecutionHints,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ExecutionRequest {
    pub fn new(
        source_code: impl Into<String>,
        language: impl Into<String>,
        framework: impl Into<String>,
        test_cases: Vec<TestCase>,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            language: language.into(),
            framework: framework.into(),
            test_cases,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            hints: ExecutionHints::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sum of the declared point values
    pub fn declared_points(&self) -> u32 {
        self.test_cases.iter().map(|tc| tc.points).fold(0u32, u32::saturating_add)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_id: String,
    pub name: String,
    pub passed: bool,
    pub points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Rejected,
    UnsupportedFramework,
    CompilationError,
    Timeout,
    RuntimeError,
    ParseError,
    AssertionFailure,
    Infrastructure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub framework: String,
    pub parser: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Ids of cases graded by the weak fallback assertion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_assertions: Vec<String>,
    #[serde(default)]
    pub output_truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMetrics {
    pub average_response_time_ms: f64,
    pub total_requests: u32,
    pub successful_requests: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionVerdict {
    pub success: bool,
    pub tests_run: u32,
    pub tests_passed: u32,
    pub total_points: u32,
    pub points_earned: u32,
    pub results: Vec<TestOutcome>,
    pub output: String,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_metrics: Option<ApiMetrics>,
    pub diagnostics: Diagnostics,
}

impl ExecutionVerdict {
    /// Terminal verdict with zero counts, used by every early-exit path
    pub fn terminal(
        framework: &str,
        failure: FailureKind,
        output: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            tests_run: 0,
            tests_passed: 0,
            total_points: 0,
            points_earned: 0,
            results: Vec::new(),
            output: output.into(),
            execution_time_ms,
            api_metrics: None,
            diagnostics: Diagnostics {
                framework: framework.to_string(),
                parser: "none".to_string(),
                failure: Some(failure),
                ..Default::default()
            },
        }
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.diagnostics.failure
    }
}

/// Queue envelope around a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub request: ExecutionRequest,
}

impl Job {
    pub fn new(request: ExecutionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            request,
        }
    }
}

/// Queue envelope around a verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVerdict {
    pub job_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub verdict: ExecutionVerdict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_identifiers_round_trip() {
        for framework in Framework::ALL {
            assert_eq!(Framework::from_str(framework.as_str()), Some(framework));
        }
        assert_eq!(Framework::from_str(" JEST "), Some(Framework::Jest));
        assert_eq!(Framework::from_str("mocha"), None);
        assert_eq!(Framework::from_str(""), None);
    }

    #[test]
    fn test_framework_serde_names_match_identifiers() {
        for framework in Framework::ALL {
            let json = serde_json::to_string(&framework).unwrap();
            assert_eq!(json, format!("\"{}\"", framework.as_str()));
        }
    }

    #[test]
    fn test_framework_styles() {
        assert_eq!(Framework::Supertest.style(), FrameworkStyle::HttpApi);
        assert_eq!(Framework::PytestRequests.style(), FrameworkStyle::HttpApi);
        assert_eq!(Framework::Dotnet.style(), FrameworkStyle::CompiledUnitTest);
        assert_eq!(Framework::Playwright.style(), FrameworkStyle::BrowserUi);
        assert_eq!(Framework::Junit.language(), Language::Java);
    }

    #[test]
    fn test_language_aliases() {
        assert_eq!(Language::from_str("JS"), Some(Language::JavaScript));
        assert_eq!(Language::from_str("c#"), Some(Language::CSharp));
        assert_eq!(Language::from_str("cobol"), None);
    }

    #[test]
    fn test_request_defaults() {
        let json = r#"{
            "source_code": "def f(): pass",
            "language": "python",
            "framework": "pytest",
            "test_cases": [{"id": "t1", "name": "works", "points": 5}]
        }"#;
        let request: ExecutionRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(request.hints, ExecutionHints::default());
        assert!(request.test_cases[0].visible);
        assert_eq!(request.test_cases[0].assertion(), None);
        assert_eq!(request.declared_points(), 5);
    }

    #[test]
    fn test_declared_points_saturate() {
        let json = format!(
            r#"{{"source_code": "x", "language": "python", "framework": "pytest",
                "test_cases": [{{"id": "a", "name": "a", "points": {max}}}, {{"id": "b", "name": "b", "points": {max}}}]}}"#,
            max = u32::MAX
        );
        let request: ExecutionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.declared_points(), u32::MAX);
    }

    #[test]
    fn test_blank_assertion_is_absent() {
        let case = TestCase {
            id: "t1".into(),
            name: "blank".into(),
            description: String::new(),
            points: 1,
            test_code: Some("   \n".into()),
            request: None,
            visible: false,
        };
        assert_eq!(case.assertion(), None);
    }

    #[test]
    fn test_hint_method_lookup() {
        let hints = ExecutionHints {
            endpoints: vec![EndpointHint {
                method: "POST".into(),
                path: "/items".into(),
            }],
            app_symbol: None,
        };
        assert_eq!(hints.method_for("/items"), Some("POST"));
        assert_eq!(hints.method_for("/other"), None);
    }

    #[test]
    fn test_terminal_verdict_has_zero_counts() {
        let verdict = ExecutionVerdict::terminal("jest", FailureKind::Timeout, "Execution timeout", 12);
        assert!(!verdict.success);
        assert_eq!(verdict.tests_run, 0);
        assert_eq!(verdict.points_earned, 0);
        assert_eq!(verdict.failure(), Some(FailureKind::Timeout));
    }
}
