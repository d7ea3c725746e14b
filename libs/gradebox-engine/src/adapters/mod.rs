/// Framework Adapters - Per-Framework Knowledge in One Place
///
/// **Core Responsibility:**
/// Turn a submission and its cases into a staged workspace plus a fixed
/// sandbox command, and turn the tool's raw output back into outcomes.
///
/// **Boundary:**
/// - Adapters know file layouts, harness templates, report formats
/// - Adapters do NOT run containers or compute scores
/// - Rendering is pure: same inputs, byte-identical files

pub mod api;
pub mod dotnet;
pub mod jest;
pub mod junit;
pub mod normalize;
pub mod playwright;
pub mod pytest;

use crate::sandbox::{
    CommandLine, NetworkPolicy, RawExecutionOutcome, ResourceLimits, SandboxInvocation,
    CONTAINER_WORKSPACE,
};
use crate::workspace::StagedFile;
use gradebox_common::types::{ExecutionHints, Framework, Language, TestCase, TestOutcome};
use std::path::Path;

/// Generated test module plus the cases that fell back to the weak default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSource {
    pub path: String,
    pub source: String,
    /// Ids of cases rendered with the fallback assertion
    pub defaulted: Vec<String>,
}

/// How the submission is exercised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    /// Imported as a module by the harness
    Library,
    /// Treated as an application and driven by generated requests
    Service,
}

pub trait FrameworkAdapter: Send + Sync {
    fn framework(&self) -> Framework;

    fn language(&self) -> Language {
        self.framework().language()
    }

    /// Path the submission is staged under, relative to the workspace
    fn submission_path(&self) -> &'static str;

    /// Normalize legacy submission shapes before staging
    fn prepare_submission(&self, code: &str) -> String {
        code.to_string()
    }

    fn render_harness(&self, cases: &[TestCase], code: &str, hints: &ExecutionHints)
        -> HarnessSource;

    /// Build files the framework needs besides submission and harness
    fn manifests(&self) -> Vec<StagedFile> {
        Vec::new()
    }

    /// Fixed script run in the container. Never carries request data.
    fn command(&self) -> CommandLine;

    fn env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Dependency restore run before the test step in the same workspace.
    /// It is the only step granted network access, and it never executes
    /// submission code.
    fn restore_command(&self) -> Option<CommandLine> {
        None
    }

    fn execution_model(&self) -> ExecutionModel {
        ExecutionModel::Library
    }

    /// Label recorded in verdict diagnostics
    fn parser_name(&self) -> &'static str;

    fn parse_output(&self, raw: &RawExecutionOutcome, cases: &[TestCase]) -> Vec<TestOutcome>;

    /// Whether the output carries toolchain compile-failure markers
    fn build_failed(&self, _raw: &RawExecutionOutcome) -> bool {
        false
    }

    /// Test step: runs the submission, always without network
    fn build_invocation(
        &self,
        workspace: &Path,
        image: &str,
        limits: ResourceLimits,
    ) -> SandboxInvocation {
        SandboxInvocation {
            image: image.to_string(),
            workspace: workspace.to_path_buf(),
            mount_path: CONTAINER_WORKSPACE.to_string(),
            working_dir: CONTAINER_WORKSPACE.to_string(),
            limits,
            network: NetworkPolicy::Isolated,
            env: self.env(),
            command: self.command(),
        }
    }

    fn build_restore_invocation(
        &self,
        workspace: &Path,
        image: &str,
        limits: ResourceLimits,
    ) -> Option<SandboxInvocation> {
        let command = self.restore_command()?;
        Some(SandboxInvocation {
            network: NetworkPolicy::Permitted,
            command,
            ..self.build_invocation(workspace, image, limits)
        })
    }

    /// Everything written into the workspace, in staging order
    fn stage_files(
        &self,
        code: &str,
        cases: &[TestCase],
        hints: &ExecutionHints,
    ) -> (Vec<StagedFile>, Vec<String>) {
        let submission = self.prepare_submission(code);
        let harness = self.render_harness(cases, &submission, hints);
        let mut files = vec![
            StagedFile::new(self.submission_path(), submission),
            StagedFile::new(harness.path, harness.source),
        ];
        files.extend(self.manifests());
        (files, harness.defaulted)
    }
}

/// Exhaustive framework to adapter mapping
pub fn adapter_for(framework: Framework) -> &'static dyn FrameworkAdapter {
    match framework {
        Framework::Jest => &jest::JestAdapter,
        Framework::Pytest => &pytest::PytestAdapter,
        Framework::Playwright => &playwright::PlaywrightAdapter,
        Framework::Supertest => &api::SupertestAdapter,
        Framework::PytestRequests => &api::PytestRequestsAdapter,
        Framework::Junit => &junit::JunitAdapter,
        Framework::Dotnet => &dotnet::DotnetAdapter,
    }
}

/// Title carrying the 1-based case ordinal parsers key on
pub(crate) fn case_title(case: &TestCase, index: usize) -> String {
    format!("{} (case {})", case.name, index + 1)
}

/// Quoted string literal valid in both JavaScript and Python source
pub(crate) fn quoted(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

pub(crate) fn indent(code: &str, prefix: &str) -> String {
    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The case's fragment, or `fallback` with the case id recorded
pub(crate) fn fragment_or_default<'a>(
    case: &'a TestCase,
    fallback: &'a str,
    defaulted: &mut Vec<String>,
) -> &'a str {
    match case.assertion() {
        Some(code) => code,
        None => {
            defaulted.push(case.id.clone());
            fallback
        }
    }
}

/// Report-file script shared by the JSON-reporting tools
pub(crate) fn report_script(tool: &str) -> String {
    format!(
        "{}; CODE=$?; [ -f /workspace/results.json ] && cat /workspace/results.json; exit $CODE",
        tool
    )
}

#[cfg(test)]
pub(crate) mod fixtures {
    use gradebox_common::types::{ApiRequestSpec, TestCase};

    pub fn case(id: &str, name: &str, points: u32, code: Option<&str>) -> TestCase {
        TestCase {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            points,
            test_code: code.map(str::to_string),
            request: None,
            visible: true,
        }
    }

    pub fn api_case(id: &str, request: ApiRequestSpec) -> TestCase {
        TestCase {
            request: Some(request),
            ..case(id, id, 5, None)
        }
    }
}
