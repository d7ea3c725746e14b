use super::normalize::{normalize_java_class, normalize_java_fragment};
use super::{case_title, fragment_or_default, indent, quoted, FrameworkAdapter, HarnessSource};
use crate::report::{align, ReportedTest};
use crate::sandbox::{CommandLine, RawExecutionOutcome};
use crate::workspace::StagedFile;
use gradebox_common::types::{ExecutionHints, Framework, TestCase, TestOutcome};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

const FALLBACK_ASSERTION: &str = "assertDoesNotThrow(() -> Class.forName(\"Solution\"));";

/// Local repository inside the workspace, shared by the restore and test steps
const MAVEN_FLAGS: &str =
    "-B -Dstyle.color=never -Dmaven.repo.local=/workspace/.m2/repository";

const POM_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="http://maven.apache.org/POM/4.0.0 http://maven.apache.org/xsd/maven-4.0.0.xsd">
    <modelVersion>4.0.0</modelVersion>

    <groupId>dev.gradebox</groupId>
    <artifactId>submission</artifactId>
    <version>1.0.0</version>

    <properties>
        <maven.compiler.source>17</maven.compiler.source>
        <maven.compiler.target>17</maven.compiler.target>
        <project.build.sourceEncoding>UTF-8</project.build.sourceEncoding>
    </properties>

    <dependencies>
        <dependency>
            <groupId>org.junit.jupiter</groupId>
            <artifactId>junit-jupiter</artifactId>
            <version>5.10.0</version>
            <scope>test</scope>
        </dependency>
        <dependency>
            <groupId>org.mockito</groupId>
            <artifactId>mockito-core</artifactId>
            <version>5.5.0</version>
            <scope>test</scope>
        </dependency>
    </dependencies>

    <build>
        <plugins>
            <plugin>
                <groupId>org.apache.maven.plugins</groupId>
                <artifactId>maven-surefire-plugin</artifactId>
                <version>3.1.2</version>
                <dependencies>
                    <dependency>
                        <groupId>org.apache.maven.surefire</groupId>
                        <artifactId>surefire-junit-platform</artifactId>
                        <version>3.1.2</version>
                    </dependency>
                </dependencies>
            </plugin>
        </plugins>
    </build>
</project>
"#;

lazy_static! {
    static ref SUREFIRE_SUMMARY: Regex =
        Regex::new(r"Tests run:\s*(\d+),\s*Failures:\s*(\d+),\s*Errors:\s*(\d+),\s*Skipped:\s*(\d+)").unwrap();
    static ref FAILED_METHOD: Regex =
        Regex::new(r"(?m)SolutionTest\.test(\d+)(?::\d+)?(.*)$").unwrap();
    /// javac locations on Maven error lines; warnings carry the same shape
    static ref JAVAC_ERROR_LOCATION: Regex =
        Regex::new(r"(?m)^\[ERROR\].*\.java:\[\d+,\d+\]").unwrap();
}

/// Maven Surefire console output: the last summary line gives the run
/// count, `SolutionTest.testN` references mark failures.
fn read_surefire(output: &str, case_count: usize) -> Option<Vec<ReportedTest>> {
    let summary = SUREFIRE_SUMMARY.captures_iter(output).last()?;
    let tests_run: usize = summary[1].parse().ok()?;

    let mut failures: BTreeMap<usize, String> = BTreeMap::new();
    for capture in FAILED_METHOD.captures_iter(output) {
        let Ok(ordinal) = capture[1].parse::<usize>() else {
            continue;
        };
        let detail = capture[2]
            .trim()
            .trim_start_matches(|c: char| c == '-' || c == ' ')
            .to_string();
        let entry = failures.entry(ordinal).or_default();
        // Prefer the assertion message over the "Time elapsed" banner
        if entry.is_empty() || (entry.contains("Time elapsed") && !detail.contains("Time elapsed")) {
            *entry = detail;
        }
    }

    let reported = (1..=case_count)
        .map(|ordinal| {
            let name = format!("SolutionTest.test{}", ordinal);
            if ordinal > tests_run {
                ReportedTest::new(name, false).with_error(Some("Test not executed".to_string()))
            } else if let Some(detail) = failures.get(&ordinal) {
                let error = if detail.is_empty() {
                    format!("SolutionTest.test{} failed", ordinal)
                } else {
                    detail.clone()
                };
                ReportedTest::new(name, false).with_error(Some(error))
            } else {
                ReportedTest::new(name, true)
            }
        })
        .collect();
    Some(reported)
}

pub struct JunitAdapter;

impl FrameworkAdapter for JunitAdapter {
    fn framework(&self) -> Framework {
        Framework::Junit
    }

    fn submission_path(&self) -> &'static str {
        "src/main/java/Solution.java"
    }

    fn prepare_submission(&self, code: &str) -> String {
        normalize_java_class(code)
    }

    fn render_harness(
        &self,
        cases: &[TestCase],
        _code: &str,
        _hints: &ExecutionHints,
    ) -> HarnessSource {
        let mut defaulted = Vec::new();
        let mut source = String::from(
            "import org.junit.jupiter.api.DisplayName;\nimport org.junit.jupiter.api.Test;\nimport static org.junit.jupiter.api.Assertions.*;\n\npublic class SolutionTest {\n",
        );
        for (i, case) in cases.iter().enumerate() {
            let body =
                normalize_java_fragment(fragment_or_default(case, FALLBACK_ASSERTION, &mut defaulted));
            source.push_str(&format!(
                "\n    @Test\n    @DisplayName({})\n    public void test{}() throws Exception {{\n{}\n    }}\n",
                quoted(&case_title(case, i)),
                i + 1,
                indent(&body, "        ")
            ));
        }
        source.push_str("}\n");
        HarnessSource {
            path: "src/test/java/SolutionTest.java".to_string(),
            source,
            defaulted,
        }
    }

    fn manifests(&self) -> Vec<StagedFile> {
        vec![StagedFile::new("pom.xml", POM_XML)]
    }

    fn restore_command(&self) -> Option<CommandLine> {
        Some(CommandLine::shell(format!("mvn {} dependency:go-offline", MAVEN_FLAGS)))
    }

    fn command(&self) -> CommandLine {
        CommandLine::shell(format!("mvn -o {} test", MAVEN_FLAGS))
    }

    fn parser_name(&self) -> &'static str {
        "maven_surefire_summary"
    }

    fn parse_output(&self, raw: &RawExecutionOutcome, cases: &[TestCase]) -> Vec<TestOutcome> {
        match read_surefire(&raw.combined(), cases.len()) {
            Some(reported) => align(reported, cases),
            None => Vec::new(),
        }
    }

    fn build_failed(&self, raw: &RawExecutionOutcome) -> bool {
        let output = raw.combined();
        output.contains("COMPILATION ERROR") || JAVAC_ERROR_LOCATION.is_match(&output)
    }
}
