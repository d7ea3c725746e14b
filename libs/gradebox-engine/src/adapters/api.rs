//! HTTP-API adapters. The submission is staged as the application module and
//! cases are either caller fragments or requests generated from an
//! `ApiRequestSpec`. Both reuse the unit-test tools for reporting.

use super::jest::{jest_script, package_json, JEST_CONFIG};
use super::normalize::normalize_commonjs;
use super::pytest::{parse_pytest_report, pytest_script};
use super::{case_title, indent, quoted, ExecutionModel, FrameworkAdapter, HarnessSource};
use crate::report::{align, extract_report, read_jest, JEST_ROOT};
use crate::sandbox::{CommandLine, RawExecutionOutcome};
use crate::workspace::StagedFile;
use gradebox_common::types::{ApiRequestSpec, ExecutionHints, Framework, TestCase, TestOutcome};

const HTTP_METHODS: [&str; 7] = ["get", "post", "put", "patch", "delete", "head", "options"];
const DEFAULT_STATUS: u16 = 200;

/// Resolved, validated method for a request; `Err` carries the raw value
fn method_for(request: &ApiRequestSpec, hints: &ExecutionHints) -> Result<String, String> {
    let declared = request
        .method
        .as_deref()
        .or_else(|| hints.method_for(&request.path))
        .unwrap_or("get");
    let method = declared.trim().to_lowercase();
    if HTTP_METHODS.contains(&method.as_str()) {
        Ok(method)
    } else {
        Err(declared.to_string())
    }
}

fn headers_json(request: &ApiRequestSpec) -> serde_json::Value {
    request
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

enum CaseBody<'a> {
    Fragment(&'a str),
    Request(&'a ApiRequestSpec),
    Fallback,
}

fn case_body(case: &TestCase) -> CaseBody<'_> {
    match (case.assertion(), case.request.as_ref()) {
        (Some(code), _) => CaseBody::Fragment(code),
        (None, Some(request)) => CaseBody::Request(request),
        (None, None) => CaseBody::Fallback,
    }
}

pub struct SupertestAdapter;

impl SupertestAdapter {
    fn request_block(request: &ApiRequestSpec, hints: &ExecutionHints) -> String {
        let method = match method_for(request, hints) {
            Ok(method) => method,
            Err(raw) => {
                return format!(
                    "throw new Error({});",
                    quoted(&format!("unsupported HTTP method: {}", raw))
                )
            }
        };
        let mut call = format!("const response = await request(app).{}({})", method, quoted(&request.path));
        if !request.headers.is_empty() {
            call.push_str(&format!(".set({})", headers_json(request)));
        }
        if let Some(body) = &request.body {
            call.push_str(&format!(".send({})", body));
        }
        call.push(';');

        let mut lines = vec![
            call,
            format!(
                "expect(response.status).toBe({});",
                request.expected_status.unwrap_or(DEFAULT_STATUS)
            ),
        ];
        if let Some(expected) = &request.expected_body {
            lines.push(format!("expect(response.body).toMatchObject({});", expected));
        }
        lines.join("\n")
    }
}

impl FrameworkAdapter for SupertestAdapter {
    fn framework(&self) -> Framework {
        Framework::Supertest
    }

    fn submission_path(&self) -> &'static str {
        "app.js"
    }

    fn prepare_submission(&self, code: &str) -> String {
        normalize_commonjs(code)
    }

    fn render_harness(
        &self,
        cases: &[TestCase],
        _code: &str,
        hints: &ExecutionHints,
    ) -> HarnessSource {
        let resolve = match hints.app_symbol.as_deref() {
            Some(symbol) => format!(
                "appModule[{}] || appModule.app || appModule.default || appModule",
                quoted(symbol)
            ),
            None => "appModule.app || appModule.default || appModule".to_string(),
        };
        let mut source = format!(
            "const request = require('supertest');\nconst appModule = require('./app');\nconst app = {};\n",
            resolve
        );
        let mut defaulted = Vec::new();
        for (i, case) in cases.iter().enumerate() {
            let body = match case_body(case) {
                CaseBody::Fragment(code) => code.to_string(),
                CaseBody::Request(request) => Self::request_block(request, hints),
                CaseBody::Fallback => {
                    defaulted.push(case.id.clone());
                    "expect(app).toBeDefined();".to_string()
                }
            };
            source.push_str(&format!(
                "\ntest({}, async () => {{\n{}\n}});\n",
                quoted(&case_title(case, i)),
                indent(&body, "  ")
            ));
        }
        HarnessSource {
            path: "api.test.js".to_string(),
            source,
            defaulted,
        }
    }

    fn manifests(&self) -> Vec<StagedFile> {
        vec![
            StagedFile::new("jest.config.js", JEST_CONFIG),
            StagedFile::new("package.json", package_json("gradebox-supertest-runner")),
        ]
    }

    fn command(&self) -> CommandLine {
        CommandLine::shell(jest_script("api.test.js"))
    }

    fn execution_model(&self) -> ExecutionModel {
        ExecutionModel::Service
    }

    fn parser_name(&self) -> &'static str {
        "jest_json"
    }

    fn parse_output(&self, raw: &RawExecutionOutcome, cases: &[TestCase]) -> Vec<TestOutcome> {
        match extract_report(raw, JEST_ROOT) {
            Some(report) => align(read_jest(&report), cases),
            None => Vec::new(),
        }
    }
}

const PYTHON_PRELUDE: &str = r#"import json

import pytest

import app as app_module


def _resolve_app(preferred):
    for name in (preferred, "app", "application"):
        if name and hasattr(app_module, name):
            return getattr(app_module, name)
    return app_module


def _make_client(target):
    # Flask exposes test_client(); anything else is treated as ASGI
    if hasattr(target, "test_client"):
        return target.test_client()
    from fastapi.testclient import TestClient
    return TestClient(target)


def _send(method, path, body=None, headers=None):
    kwargs = {"headers": headers or {}}
    if body is not None:
        kwargs["json"] = body
    if hasattr(client, "open"):
        return client.open(path, method=method, **kwargs)
    return client.request(method, path, **kwargs)


def _json(response):
    getter = getattr(response, "get_json", None)
    if getter is not None:
        return getter(silent=True)
    return response.json()


def _matches(expected, actual):
    if isinstance(expected, dict):
        return isinstance(actual, dict) and all(
            key in actual and _matches(value, actual[key]) for key, value in expected.items()
        )
    if isinstance(expected, list):
        return (
            isinstance(actual, list)
            and len(expected) == len(actual)
            and all(_matches(e, a) for e, a in zip(expected, actual))
        )
    return expected == actual
"#;

pub struct PytestRequestsAdapter;

impl PytestRequestsAdapter {
    /// JSON values go through `json.loads` so Python never parses request data as code
    fn json_literal(value: &serde_json::Value) -> String {
        format!("json.loads({})", quoted(&value.to_string()))
    }

    fn request_block(request: &ApiRequestSpec, hints: &ExecutionHints) -> String {
        let method = match method_for(request, hints) {
            Ok(method) => method,
            Err(raw) => {
                return format!(
                    "pytest.fail({})",
                    quoted(&format!("unsupported HTTP method: {}", raw))
                )
            }
        };
        let body = request
            .body
            .as_ref()
            .map(Self::json_literal)
            .unwrap_or_else(|| "None".to_string());
        let headers = if request.headers.is_empty() {
            "None".to_string()
        } else {
            Self::json_literal(&headers_json(request))
        };

        let mut lines = vec![
            format!(
                "response = _send({}, {}, {}, {})",
                quoted(&method.to_uppercase()),
                quoted(&request.path),
                body,
                headers
            ),
            format!(
                "assert response.status_code == {}",
                request.expected_status.unwrap_or(DEFAULT_STATUS)
            ),
        ];
        if let Some(expected) = &request.expected_body {
            lines.push(format!("expected = {}", Self::json_literal(expected)));
            lines.push("actual = _json(response)".to_string());
            lines.push("assert _matches(expected, actual), actual".to_string());
        }
        lines.join("\n")
    }
}

impl FrameworkAdapter for PytestRequestsAdapter {
    fn framework(&self) -> Framework {
        Framework::PytestRequests
    }

    fn submission_path(&self) -> &'static str {
        "app.py"
    }

    fn render_harness(
        &self,
        cases: &[TestCase],
        _code: &str,
        hints: &ExecutionHints,
    ) -> HarnessSource {
        let preferred = hints
            .app_symbol
            .as_deref()
            .map(quoted)
            .unwrap_or_else(|| "None".to_string());
        let mut source = String::from(PYTHON_PRELUDE);
        source.push_str(&format!(
            "\n\napplication = _resolve_app({})\nclient = _make_client(application)\n",
            preferred
        ));

        let mut defaulted = Vec::new();
        for (i, case) in cases.iter().enumerate() {
            let body = match case_body(case) {
                CaseBody::Fragment(code) => code.to_string(),
                CaseBody::Request(request) => Self::request_block(request, hints),
                CaseBody::Fallback => {
                    defaulted.push(case.id.clone());
                    "assert application is not None".to_string()
                }
            };
            source.push_str(&format!(
                "\n\n# {}\ndef test_case_{}():\n{}\n",
                case.name.replace('\n', " "),
                i + 1,
                indent(&body, "    ")
            ));
        }
        HarnessSource {
            path: "test_api.py".to_string(),
            source,
            defaulted,
        }
    }

    fn command(&self) -> CommandLine {
        CommandLine::shell(pytest_script("test_api.py"))
    }

    fn execution_model(&self) -> ExecutionModel {
        ExecutionModel::Service
    }

    fn parser_name(&self) -> &'static str {
        "pytest_json"
    }

    fn parse_output(&self, raw: &RawExecutionOutcome, cases: &[TestCase]) -> Vec<TestOutcome> {
        parse_pytest_report(raw, cases)
    }
}
