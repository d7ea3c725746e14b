/// Code Screener - Static Rejection Before Execution
///
/// Runs before any workspace or container is allocated. Rejects empty and
/// oversized submissions, and submissions matching a per-language deny-list.
///
/// This is defense-in-depth only. Every accepted submission still runs inside
/// the sandbox with the same isolation as a clean one.

use gradebox_common::types::Language;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Upper bound on submission size, bounds build and parse cost
pub const MAX_SOURCE_BYTES: usize = 100_000;

/// Category of a forbidden construct, reported instead of regex internals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternClass {
    ProcessSpawning,
    FilesystemAccess,
    NetworkAccess,
    DynamicEvaluation,
    Reflection,
    InterpreterEscape,
    EnvironmentAccess,
}

impl fmt::Display for PatternClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PatternClass::ProcessSpawning => "process spawning",
            PatternClass::FilesystemAccess => "filesystem access",
            PatternClass::NetworkAccess => "network access",
            PatternClass::DynamicEvaluation => "dynamic evaluation",
            PatternClass::Reflection => "reflection",
            PatternClass::InterpreterEscape => "interpreter escape",
            PatternClass::EnvironmentAccess => "environment access",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Code cannot be empty")]
    Empty,
    #[error("Code exceeds maximum size ({limit} bytes, got {size})")]
    TooLarge { size: usize, limit: usize },
    #[error("Code contains a forbidden construct ({class}) for {language}")]
    Forbidden { class: PatternClass, language: Language },
}

impl Rejection {
    pub fn pattern_class(&self) -> Option<PatternClass> {
        match self {
            Rejection::Forbidden { class, .. } => Some(*class),
            _ => None,
        }
    }
}

struct DenyRule {
    pattern: Regex,
    class: PatternClass,
}

fn rules(specs: &[(&str, PatternClass)]) -> Vec<DenyRule> {
    specs
        .iter()
        .map(|(pattern, class)| DenyRule {
            // Patterns are compile-time constants covered by the tests below
            pattern: Regex::new(pattern).expect("deny-list pattern must compile"),
            class: *class,
        })
        .collect()
}

lazy_static! {
    static ref JAVASCRIPT_RULES: Vec<DenyRule> = rules(&[
        (r#"require\s*\(\s*['"](node:)?child_process['"]\s*\)"#, PatternClass::ProcessSpawning),
        (r#"from\s+['"](node:)?child_process['"]"#, PatternClass::ProcessSpawning),
        (r#"require\s*\(\s*['"](node:)?fs(/promises)?['"]\s*\)"#, PatternClass::FilesystemAccess),
        (r#"from\s+['"](node:)?fs(/promises)?['"]"#, PatternClass::FilesystemAccess),
        (r#"require\s*\(\s*['"](node:)?(net|dgram|tls)['"]\s*\)"#, PatternClass::NetworkAccess),
        (r"\beval\s*\(", PatternClass::DynamicEvaluation),
        (r"\bFunction\s*\(", PatternClass::DynamicEvaluation),
        (r"\bprocess\.exit\b", PatternClass::InterpreterEscape),
        (r"\bprocess\.binding\b", PatternClass::InterpreterEscape),
        (r"\bprocess\.env\b", PatternClass::EnvironmentAccess),
    ]);

    static ref PYTHON_RULES: Vec<DenyRule> = rules(&[
        (r"\bimport\s+subprocess\b", PatternClass::ProcessSpawning),
        (r"\bfrom\s+subprocess\s+import\b", PatternClass::ProcessSpawning),
        (r"\bimport\s+os\b", PatternClass::FilesystemAccess),
        (r"\bfrom\s+os(\.path)?\s+import\b", PatternClass::FilesystemAccess),
        (r"\bimport\s+shutil\b", PatternClass::FilesystemAccess),
        (r"\bimport\s+socket\b", PatternClass::NetworkAccess),
        (r"\bfrom\s+socket\s+import\b", PatternClass::NetworkAccess),
        (r"\beval\s*\(", PatternClass::DynamicEvaluation),
        (r"\bexec\s*\(", PatternClass::DynamicEvaluation),
        (r"__import__", PatternClass::Reflection),
        (r"\bimportlib\b", PatternClass::Reflection),
        (r"\bimport\s+sys\b", PatternClass::InterpreterEscape),
        (r"\bfrom\s+sys\s+import\b", PatternClass::InterpreterEscape),
        (r"\bimport\s+ctypes\b", PatternClass::InterpreterEscape),
    ]);

    static ref JAVA_RULES: Vec<DenyRule> = rules(&[
        (r"Runtime\.getRuntime\s*\(\s*\)", PatternClass::ProcessSpawning),
        (r"\bProcessBuilder\b", PatternClass::ProcessSpawning),
        (r"\bjava\.io\.File\b", PatternClass::FilesystemAccess),
        (r"\bjava\.nio\.file\b", PatternClass::FilesystemAccess),
        (r"\bjava\.net\.", PatternClass::NetworkAccess),
        (r"\bjavax\.net\.", PatternClass::NetworkAccess),
        (r"\bjava\.lang\.reflect\b", PatternClass::Reflection),
        (r"\bClass\.forName\s*\(", PatternClass::Reflection),
        (r"\bjavax\.script\b", PatternClass::DynamicEvaluation),
        (r"\bSystem\.exit\s*\(", PatternClass::InterpreterEscape),
        (r"\bSystem\.getenv\s*\(", PatternClass::EnvironmentAccess),
    ]);

    static ref CSHARP_RULES: Vec<DenyRule> = rules(&[
        (r"\bSystem\.Diagnostics\.Process\b", PatternClass::ProcessSpawning),
        (r"\bProcess\.Start\s*\(", PatternClass::ProcessSpawning),
        (r"\bSystem\.IO\b", PatternClass::FilesystemAccess),
        (r"\b(File|Directory)\.\w+\s*\(", PatternClass::FilesystemAccess),
        (r"\bSystem\.Net\b", PatternClass::NetworkAccess),
        (r"\bSystem\.Reflection\b", PatternClass::Reflection),
        (r"\bAssembly\.Load\w*\s*\(", PatternClass::Reflection),
        (r"\bEnvironment\.Exit\s*\(", PatternClass::InterpreterEscape),
        (r"\bEnvironment\.GetEnvironmentVariables?\s*\(", PatternClass::EnvironmentAccess),
    ]);
}

fn rules_for(language: Language) -> &'static [DenyRule] {
    match language {
        Language::JavaScript => &JAVASCRIPT_RULES[..],
        Language::Python => &PYTHON_RULES[..],
        Language::Java => &JAVA_RULES[..],
        Language::CSharp => &CSHARP_RULES[..],
    }
}

/// Screen a submission. Pure: the same input always yields the same answer.
pub fn screen(source: &str, language: Language) -> Result<(), Rejection> {
    if source.trim().is_empty() {
        return Err(Rejection::Empty);
    }

    if source.len() > MAX_SOURCE_BYTES {
        return Err(Rejection::TooLarge {
            size: source.len(),
            limit: MAX_SOURCE_BYTES,
        });
    }

    match rules_for(language).iter().find(|rule| rule.pattern.is_match(source)) {
        Some(rule) => Err(Rejection::Forbidden {
            class: rule.class,
            language,
        }),
        None => Ok(()),
    }
}

/// Normalize line endings and surrounding whitespace
pub fn sanitize(source: &str) -> String {
    source.replace("\r\n", "\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_of(source: &str, language: Language) -> Option<PatternClass> {
        screen(source, language).err().and_then(|r| r.pattern_class())
    }

    #[test]
    fn test_all_rules_compile() {
        for language in [Language::JavaScript, Language::Python, Language::Java, Language::CSharp] {
            assert!(!rules_for(language).is_empty());
        }
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert_eq!(screen("", Language::Python), Err(Rejection::Empty));
        assert_eq!(screen("  \n\t ", Language::Java), Err(Rejection::Empty));
    }

    #[test]
    fn test_rejects_oversized() {
        let source = "x".repeat(MAX_SOURCE_BYTES + 1);
        assert!(matches!(
            screen(&source, Language::JavaScript),
            Err(Rejection::TooLarge { size, limit }) if size == MAX_SOURCE_BYTES + 1 && limit == MAX_SOURCE_BYTES
        ));
        let source = "x".repeat(MAX_SOURCE_BYTES);
        assert!(screen(&source, Language::JavaScript).is_ok());
    }

    #[test]
    fn test_javascript_deny_list() {
        let js = Language::JavaScript;
        assert_eq!(class_of("const cp = require('child_process');", js), Some(PatternClass::ProcessSpawning));
        assert_eq!(class_of("const fs = require(\"fs\");", js), Some(PatternClass::FilesystemAccess));
        assert_eq!(class_of("import { readFile } from 'node:fs/promises';", js), Some(PatternClass::FilesystemAccess));
        assert_eq!(class_of("return eval('1 + 1');", js), Some(PatternClass::DynamicEvaluation));
        assert_eq!(class_of("const f = new Function('return 1');", js), Some(PatternClass::DynamicEvaluation));
        assert_eq!(class_of("process.exit(0);", js), Some(PatternClass::InterpreterEscape));
        assert_eq!(class_of("const key = process.env.SECRET;", js), Some(PatternClass::EnvironmentAccess));
    }

    #[test]
    fn test_python_deny_list() {
        let py = Language::Python;
        assert_eq!(class_of("import subprocess\nsubprocess.run(['ls'])", py), Some(PatternClass::ProcessSpawning));
        assert_eq!(class_of("import os\n", py), Some(PatternClass::FilesystemAccess));
        assert_eq!(class_of("x = eval(input())", py), Some(PatternClass::DynamicEvaluation));
        assert_eq!(class_of("m = __import__('os')", py), Some(PatternClass::Reflection));
        assert_eq!(class_of("import sys\nsys.exit(1)", py), Some(PatternClass::InterpreterEscape));
        assert_eq!(class_of("import socket", py), Some(PatternClass::NetworkAccess));
    }

    #[test]
    fn test_java_and_csharp_deny_lists() {
        assert_eq!(
            class_of("Runtime.getRuntime().exec(\"ls\");", Language::Java),
            Some(PatternClass::ProcessSpawning)
        );
        assert_eq!(class_of("import java.net.Socket;", Language::Java), Some(PatternClass::NetworkAccess));
        assert_eq!(class_of("System.exit(0);", Language::Java), Some(PatternClass::InterpreterEscape));
        assert_eq!(
            class_of("using System.Diagnostics.Process;", Language::CSharp),
            Some(PatternClass::ProcessSpawning)
        );
        assert_eq!(
            class_of("var s = File.ReadAllText(\"/etc/passwd\");", Language::CSharp),
            Some(PatternClass::FilesystemAccess)
        );
    }

    #[test]
    fn test_benign_code_passes() {
        assert!(screen("function sum(a, b) { return a + b; }", Language::JavaScript).is_ok());
        assert!(screen("import osmosis\ndef evaluate(x):\n    return x", Language::Python).is_ok());
        assert!(screen("public class Solution { int add(int a, int b) { return a + b; } }", Language::Java).is_ok());
        assert!(screen("public class Solution { public int Add(int a, int b) => a + b; }", Language::CSharp).is_ok());
    }

    #[test]
    fn test_rejection_names_class_not_regex() {
        let err = screen("eval('x')", Language::JavaScript).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("dynamic evaluation"));
        assert!(!message.contains("\\s*"));
    }

    #[test]
    fn test_screening_is_idempotent() {
        let source = "import subprocess";
        assert_eq!(screen(source, Language::Python), screen(source, Language::Python));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  a\r\nb\r\n  "), "a\nb");
        assert_eq!(sanitize(&sanitize(" x\r\n")), sanitize(" x\r\n"));
    }
}
