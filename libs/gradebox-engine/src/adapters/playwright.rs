use super::jest::package_json;
use super::normalize::{normalize_commonjs, normalize_playwright_fragment};
use super::{
    case_title, fragment_or_default, indent, quoted, report_script, FrameworkAdapter,
    HarnessSource,
};
use crate::report::{align, extract_report, read_playwright, PLAYWRIGHT_ROOT};
use crate::sandbox::{CommandLine, RawExecutionOutcome};
use crate::workspace::StagedFile;
use gradebox_common::types::{ExecutionHints, Framework, TestCase, TestOutcome};

const FALLBACK_ASSERTION: &str = "expect(solution).toBeDefined();";

const PLAYWRIGHT_CONFIG: &str = r#"module.exports = {
  testDir: '.',
  testMatch: 'test.spec.js',
  timeout: 30000,
  use: {
    headless: true,
    viewport: { width: 1280, height: 720 },
    ignoreHTTPSErrors: true,
  },
  reporter: [['json', { outputFile: '/workspace/results.json' }]],
};
"#;

pub struct PlaywrightAdapter;

impl FrameworkAdapter for PlaywrightAdapter {
    fn framework(&self) -> Framework {
        Framework::Playwright
    }

    fn submission_path(&self) -> &'static str {
        "implementation.js"
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
        let mut source = String::from(
            "const { test, expect } = require('@playwright/test');\nconst solutionModule = require('./implementation.js');\n",
        );
        for (i, case) in cases.iter().enumerate() {
            let body = normalize_playwright_fragment(fragment_or_default(
                case,
                FALLBACK_ASSERTION,
                &mut defaulted,
            ));
            source.push_str(&format!(
                "\ntest({}, async ({{ page }}) => {{\n  const solution = solutionModule;\n  {{\n{}\n  }}\n}});\n",
                quoted(&case_title(case, i)),
                indent(&body, "    ")
            ));
        }
        HarnessSource {
            path: "test.spec.js".to_string(),
            source,
            defaulted,
        }
    }

    fn manifests(&self) -> Vec<StagedFile> {
        vec![
            StagedFile::new("playwright.config.js", PLAYWRIGHT_CONFIG),
            StagedFile::new("package.json", package_json("gradebox-playwright-runner")),
        ]
    }

    fn command(&self) -> CommandLine {
        // Browsers and @playwright/test are baked into the image; no install step
        CommandLine::shell(report_script(
            "playwright test --config /workspace/playwright.config.js",
        ))
    }

    fn parser_name(&self) -> &'static str {
        "playwright_json"
    }

    fn parse_output(&self, raw: &RawExecutionOutcome, cases: &[TestCase]) -> Vec<TestOutcome> {
        match extract_report(raw, PLAYWRIGHT_ROOT) {
            Some(report) => align(read_playwright(&report), cases),
            None => Vec::new(),
        }
    }
}
