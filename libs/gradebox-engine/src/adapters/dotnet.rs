use super::{case_title, fragment_or_default, indent, quoted, FrameworkAdapter, HarnessSource};
use crate::report::{align, ReportedTest};
use crate::sandbox::{CommandLine, RawExecutionOutcome};
use crate::workspace::StagedFile;
use gradebox_common::types::{ExecutionHints, Framework, TestCase, TestOutcome};
use lazy_static::lazy_static;
use regex::Regex;

const FALLBACK_ASSERTION: &str = "Assert.NotNull(System.Reflection.Assembly.Load(\"Solution\"));";

const SOLUTION_CSPROJ: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>net8.0</TargetFramework>
    <OutputType>Library</OutputType>
    <AssemblyName>Solution</AssemblyName>
    <ImplicitUsings>enable</ImplicitUsings>
    <Nullable>disable</Nullable>
  </PropertyGroup>
</Project>
"#;

const TESTS_CSPROJ: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>net8.0</TargetFramework>
    <ImplicitUsings>enable</ImplicitUsings>
    <Nullable>disable</Nullable>
    <IsPackable>false</IsPackable>
    <IsTestProject>true</IsTestProject>
  </PropertyGroup>
  <ItemGroup>
    <PackageReference Include="Microsoft.NET.Test.Sdk" Version="17.8.0" />
    <PackageReference Include="xunit" Version="2.6.2" />
    <PackageReference Include="xunit.runner.visualstudio" Version="2.5.4" />
  </ItemGroup>
  <ItemGroup>
    <ProjectReference Include="../Solution/Solution.csproj" />
  </ItemGroup>
</Project>
"#;

lazy_static! {
    static ref RESULT_LINE: Regex =
        Regex::new(r"^\s*(Passed|Failed)\s+(.+?)\s+\[(?:<\s*)?(\d+(?:\.\d+)?)\s*(ms|s)\]").unwrap();
    static ref CSHARP_ERROR: Regex = Regex::new(r"error CS\d{4}").unwrap();
}

/// Console logger output: one `Passed|Failed <name> [N ms]` line per test,
/// failures followed by an `Error Message:` block.
fn read_console_log(output: &str) -> Vec<ReportedTest> {
    let mut reported: Vec<ReportedTest> = Vec::new();
    let mut message: Vec<String> = Vec::new();
    let mut collecting = false;

    let flush = |reported: &mut Vec<ReportedTest>, message: &mut Vec<String>| {
        if let Some(last) = reported.last_mut() {
            if !last.passed && !message.is_empty() {
                last.error = Some(message.join("\n"));
            }
        }
        message.clear();
    };

    for line in output.lines() {
        if let Some(capture) = RESULT_LINE.captures(line) {
            flush(&mut reported, &mut message);
            collecting = false;
            let passed = &capture[1] == "Passed";
            let amount: f64 = capture[3].parse().unwrap_or(0.0);
            let millis = if &capture[4] == "s" { amount * 1000.0 } else { amount };
            let test = ReportedTest::new(capture[2].trim(), passed).with_duration_ms(Some(millis));
            reported.push(if passed {
                test
            } else {
                test.with_error(Some("dotnet test assertion failed".to_string()))
            });
            continue;
        }
        match line.trim() {
            "Error Message:" => collecting = true,
            "Stack Trace:" | "Standard Output Messages:" => collecting = false,
            text if collecting && !text.is_empty() => message.push(text.to_string()),
            _ => {}
        }
    }
    flush(&mut reported, &mut message);
    reported
}

pub struct DotnetAdapter;

impl FrameworkAdapter for DotnetAdapter {
    fn framework(&self) -> Framework {
        Framework::Dotnet
    }

    fn submission_path(&self) -> &'static str {
        "Solution/Solution.cs"
    }

    fn render_harness(
        &self,
        cases: &[TestCase],
        _code: &str,
        _hints: &ExecutionHints,
    ) -> HarnessSource {
        let mut defaulted = Vec::new();
        let mut source = String::from("using System;\nusing Xunit;\n\npublic class SolutionTests\n{\n");
        for (i, case) in cases.iter().enumerate() {
            let body = fragment_or_default(case, FALLBACK_ASSERTION, &mut defaulted);
            source.push_str(&format!(
                "    [Fact(DisplayName = {})]\n    public void Case_{}()\n    {{\n{}\n    }}\n\n",
                quoted(&case_title(case, i)),
                i + 1,
                indent(body, "        ")
            ));
        }
        source.push_str("}\n");
        HarnessSource {
            path: "Tests/SolutionTests.cs".to_string(),
            source,
            defaulted,
        }
    }

    fn manifests(&self) -> Vec<StagedFile> {
        vec![
            StagedFile::new("Solution/Solution.csproj", SOLUTION_CSPROJ),
            StagedFile::new("Tests/Tests.csproj", TESTS_CSPROJ),
        ]
    }

    fn restore_command(&self) -> Option<CommandLine> {
        Some(CommandLine::shell("dotnet restore Tests/Tests.csproj"))
    }

    fn command(&self) -> CommandLine {
        CommandLine::shell(
            "dotnet test Tests/Tests.csproj --no-restore --logger 'console;verbosity=normal'",
        )
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![
            ("DOTNET_CLI_HOME".to_string(), "/tmp".to_string()),
            ("DOTNET_NOLOGO".to_string(), "1".to_string()),
            ("DOTNET_CLI_TELEMETRY_OPTOUT".to_string(), "1".to_string()),
            // Packages restored by the restore step must be visible to the test step
            ("NUGET_PACKAGES".to_string(), "/workspace/.nuget/packages".to_string()),
        ]
    }

    fn parser_name(&self) -> &'static str {
        "dotnet_console"
    }

    fn parse_output(&self, raw: &RawExecutionOutcome, cases: &[TestCase]) -> Vec<TestOutcome> {
        align(read_console_log(&raw.combined()), cases)
    }

    fn build_failed(&self, raw: &RawExecutionOutcome) -> bool {
        CSHARP_ERROR.is_match(&raw.combined())
    }
}
