use super::normalize::normalize_commonjs;
use super::{
    case_title, fragment_or_default, indent, quoted, report_script, FrameworkAdapter,
    HarnessSource,
};
use crate::report::{align, extract_report, read_jest, JEST_ROOT};
use crate::sandbox::{CommandLine, RawExecutionOutcome};
use crate::workspace::StagedFile;
use gradebox_common::types::{ExecutionHints, Framework, TestCase, TestOutcome};

const FALLBACK_ASSERTION: &str = "expect(solution).toBeDefined();";

pub(crate) const JEST_CONFIG: &str =
    "module.exports = { rootDir: '/workspace', testEnvironment: 'node' };\n";

pub(crate) fn package_json(name: &str) -> String {
    format!(
        "{{\n  \"name\": \"{}\",\n  \"version\": \"1.0.0\",\n  \"private\": true\n}}\n",
        name
    )
}

pub(crate) fn jest_script(test_file: &str) -> String {
    report_script(&format!(
        "jest --config /workspace/jest.config.js --ci --runInBand --json --outputFile=/workspace/results.json /workspace/{}",
        test_file
    ))
}

pub struct JestAdapter;

impl FrameworkAdapter for JestAdapter {
    fn framework(&self) -> Framework {
        Framework::Jest
    }

    fn submission_path(&self) -> &'static str {
        "solution.js"
    }

    fn prepare_submission(&self, code: &str) -> String {
        normalize_commonjs(code)
    }

    fn render_harness(
        &self,
        cases: &[TestCase],
        _code: &str,
        _hints: &ExecutionHints,
    ) -> HarnessSource {
        let mut defaulted = Vec::new();
        let mut source = String::from("const solution = require('./solution');\n");
        for (i, case) in cases.iter().enumerate() {
            let body = fragment_or_default(case, FALLBACK_ASSERTION, &mut defaulted);
            source.push_str(&format!(
                "\ntest({}, async () => {{\n{}\n}});\n",
                quoted(&case_title(case, i)),
                indent(body, "  ")
            ));
        }
        HarnessSource {
            path: "question.test.js".to_string(),
            source,
            defaulted,
        }
    }

    fn manifests(&self) -> Vec<StagedFile> {
        vec![
            StagedFile::new("jest.config.js", JEST_CONFIG),
            StagedFile::new("package.json", package_json("gradebox-jest-runner")),
        ]
    }

    fn command(&self) -> CommandLine {
        CommandLine::shell(jest_script("question.test.js"))
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
