// Source rewrites applied before staging. Every rewrite is idempotent.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ESM_EXPORT: Regex = Regex::new(r"(?m)^\s*export\s").unwrap();
    static ref TOP_LEVEL_DECL: Regex = Regex::new(
        r"(?m)^(?:async\s+function\s*\*?\s*|function\s*\*?\s*|class\s+|(?:const|let|var)\s+)([A-Za-z_$][\w$]*)"
    )
    .unwrap();
    static ref JAVA_MAIN_CLASS: Regex = Regex::new(r"\bpublic\s+class\s+Main\b").unwrap();
    static ref JAVA_SOLUTION_CLASS: Regex = Regex::new(r"\bpublic\s+class\s+Solution\b").unwrap();
    static ref JAVA_MAIN_REF: Regex = Regex::new(r"\bMain\.").unwrap();
    static ref LEGACY_SOLUTION_REQUIRE: Regex =
        Regex::new(r#"require\(['"]\./solution(?:\.js)?['"]\)"#).unwrap();
}

/// Whether a JavaScript module already declares its exports
pub fn has_exports(code: &str) -> bool {
    code.contains("module.exports") || code.contains("exports.") || ESM_EXPORT.is_match(code)
}

/// Names declared at column zero: functions, classes and bindings
pub fn top_level_names(code: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in TOP_LEVEL_DECL.captures_iter(code) {
        let name = capture[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Append a CommonJS export list to scripts written without one
pub fn normalize_commonjs(code: &str) -> String {
    if has_exports(code) {
        return code.to_string();
    }
    let names = top_level_names(code);
    if names.is_empty() {
        return code.to_string();
    }
    format!(
        "{}\n\nmodule.exports = {{ {} }};\n",
        code.trim_end(),
        names.join(", ")
    )
}

/// Rename a `public class Main` submission to the staged `Solution` class
pub fn normalize_java_class(code: &str) -> String {
    if JAVA_SOLUTION_CLASS.is_match(code) {
        return code.to_string();
    }
    JAVA_MAIN_CLASS.replace(code, "public class Solution").into_owned()
}

/// Point `Main.` references in a test fragment at `Solution`
pub fn normalize_java_fragment(fragment: &str) -> String {
    JAVA_MAIN_REF.replace_all(fragment, "Solution.").into_owned()
}

/// Route legacy `./solution` imports to the staged implementation module.
/// Bindings the import declares are kept.
pub fn normalize_playwright_fragment(fragment: &str) -> String {
    LEGACY_SOLUTION_REQUIRE
        .replace_all(fragment, "require('./implementation.js')")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commonjs_exports_synthesized() {
        let code = "function add(a, b) { return a + b; }\n\nasync function fetchIt() {}\nclass Stack {}\nconst PI = 3.14;\n  const nested = 1;\n";
        let normalized = normalize_commonjs(code);
        assert!(normalized.ends_with("module.exports = { add, fetchIt, Stack, PI };\n"));
        assert!(!normalized.contains("nested }"));
    }

    #[test]
    fn test_commonjs_idempotent() {
        let once = normalize_commonjs("function f() {}\nfunction g() {}");
        assert_eq!(normalize_commonjs(&once), once);
    }

    #[test]
    fn test_existing_exports_untouched() {
        for code in [
            "function f() {}\nmodule.exports = f;",
            "exports.f = function () {};",
            "export function f() {}",
            "const x = 1;\nexport default x;",
        ] {
            assert_eq!(normalize_commonjs(code), code);
        }
    }

    #[test]
    fn test_no_declarations_untouched() {
        assert_eq!(normalize_commonjs("console.log('hi');"), "console.log('hi');");
    }

    #[test]
    fn test_java_main_renamed_once() {
        let code = "public class Main {\n  public static int add(int a, int b) { return a + b; }\n}";
        let normalized = normalize_java_class(code);
        assert!(normalized.starts_with("public class Solution {"));
        assert_eq!(normalize_java_class(&normalized), normalized);
    }

    #[test]
    fn test_java_solution_left_alone() {
        let code = "public class Solution {}\nclass Main {}";
        assert_eq!(normalize_java_class(code), code);
    }

    #[test]
    fn test_java_fragment_references() {
        assert_eq!(
            normalize_java_fragment("assertEquals(3, Main.add(1, 2));"),
            "assertEquals(3, Solution.add(1, 2));"
        );
        assert_eq!(normalize_java_fragment("MainFrame.x"), "MainFrame.x");
    }

    #[test]
    fn test_playwright_legacy_imports() {
        let fragment = "const { sum } = require('./solution');\nexpect(sum(1, 2)).toBe(3);";
        assert_eq!(
            normalize_playwright_fragment(fragment),
            "const { sum } = require('./implementation.js');\nexpect(sum(1, 2)).toBe(3);"
        );
        let normalized = normalize_playwright_fragment(fragment);
        assert_eq!(normalize_playwright_fragment(&normalized), normalized);
        assert_eq!(
            normalize_playwright_fragment("const m = require(\"./solution\");"),
            "const m = require('./implementation.js');"
        );
    }
}
