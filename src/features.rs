//! Feature extraction for a single submission.

use std::collections::BTreeSet;
use std::str;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::ExtractionError;
use crate::patterns::{ConstructTag, ErrorTag, LanguageFamily, PatternSet};
use crate::record_types::{FeatureRecord, SubmissionRecord};
use crate::source::{self, FunctionSpan};

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("invalid regex"));
    };
}

pattern!(PY_IMPORT, r"(?m)(?:^|;)[ \t]*(?P<kw>import)[ \t]+(?P<name>[^;\n]+)");
pattern!(PY_FROM, r"(?m)(?:^|;)[ \t]*(?P<kw>from)[ \t]+(?P<name>[A-Za-z_][\w.]*)[ \t]+import\b");
pattern!(C_INCLUDE, r#"(?m)^[ \t]*(?P<kw>#)[ \t]*include[ \t]*[<"](?P<name>[^>"\n]+)[>"]"#);
pattern!(JAVA_IMPORT,
         r"(?m)^[ \t]*(?P<kw>import)[ \t]+(?:static[ \t]+)?(?P<name>[A-Za-z_][\w.]*(?:\.\*)?)[ \t]*;");
pattern!(JS_REQUIRE, r#"(?P<kw>\brequire)\s*\(\s*['"](?P<name>[^'"\n]+)['"]\s*\)"#);
pattern!(JS_IMPORT, r#"(?m)^[ \t]*(?P<kw>import)\b[^'"\n]*?['"](?P<name>[^'"\n]+)['"]"#);
pattern!(PY_MODULE, r"^[A-Za-z_][\w.]*$");

pattern!(BARE_EXCEPT, r"(?m)^[ \t]*except[ \t]*:");
pattern!(USELESS_PASS, r"(?m)^[ \t]*pass[ \t]*;?[ \t]*$");
pattern!(PRINT_CALL, r"(?m)(?:^|[^\w.])print[ \t]*\(");
pattern!(DIV_BY_ZERO, r"(?m)/[ \t]*0+(?:\.0*)?(?:[^\w.]|$)");
pattern!(RETURN_STMT, r"^return\b");
pattern!(EXCEPT_CLAUSE, r"^except\b.*:(?P<inline>.*)$");
pattern!(NO_OP, r"^(?:pass|\.\.\.)[ \t;]*$");

// A `[` that starts an expression rather than subscripting one.
pattern!(LIST_OPEN,
         r#"(?m)(?:(?:^|[^\w)\]}\s"'`])[ \t]*|\b(?:return|in|of|yield|and|or|not|else|assert|await)[ \t]+)\["#);
pattern!(JS_OBJECT_OPEN, r"(?:[=(,:\[?&|]|\breturn)\s*\{");
pattern!(JS_PATTERN_TAIL, r"^\s*(?:\)\s*(?:=>|\{)|=[^=>])");
pattern!(COMPREHENSION, r"\bfor\b");

/// Derives the feature record of one submission.
///
/// Fails only if the source is not valid UTF-8; anything else about the text is
/// tolerated, at worst yielding fewer tags.
pub fn extract(record: &SubmissionRecord,
               patterns: &PatternSet)
               -> Result<FeatureRecord, ExtractionError> {
    let text = str::from_utf8(&record.source).map_err(|e| {
        ExtractionError::Undecodable {
            submission_id: record.submission_id.clone(),
            offset: e.valid_up_to(),
        }
    })?;

    let family = LanguageFamily::from_label(&record.language);
    let code = source::mask_statements(text, family);
    let functions = source::functions(&code, family);

    let mut constructs: BTreeSet<ConstructTag> =
        patterns.matching(family, &code).into_iter().collect();
    if !functions.is_empty() {
        constructs.insert(ConstructTag::FunctionDefinition);
    }
    if functions.iter().any(source::is_recursive) {
        constructs.insert(ConstructTag::Recursion);
    }
    if family == LanguageFamily::Python && has_python_else(&code) {
        constructs.insert(ConstructTag::ElseBranch);
    }
    constructs.extend(literals(&code, family));

    Ok(FeatureRecord {
        problem_id: record.problem_id.clone(),
        language: record.language.clone(),
        line_count: source::line_count(text),
        constructs,
        imports: imports(text, &code, family),
        errors: errors(&code, &functions, family),
    })
}

/// Collects the `name` groups of matches whose keyword is real code, i.e. not inside
/// a comment or string.
fn code_matches<'t>(re: &Regex, text: &'t str, code: &str) -> Vec<&'t str> {
    re.captures_iter(text)
        .filter(|caps: &Captures<'_>| {
            caps.name("kw")
                .map(|kw| code.as_bytes().get(kw.start()) == text.as_bytes().get(kw.start()))
                .unwrap_or(false)
        })
        .filter_map(|caps| caps.name("name").map(|m| m.as_str().trim()))
        .collect()
}

fn valid_token(name: &str) -> bool {
    !name.is_empty() && !name.contains(char::is_whitespace)
}

/// First word of a statement line, if it starts with one.
fn keyword(line: &str) -> &str {
    let t = line.trim_start();
    let end = t.find(|c: char| !(c.is_alphanumeric() || c == '_')).unwrap_or(t.len());
    &t[..end]
}

/// Whether an `if` statement has an `elif` or `else` part. An `else` attached to a
/// loop or `try` does not count. Expects one statement per line.
fn has_python_else(code: &str) -> bool {
    // Leading keyword of the last statement seen at each indentation.
    let mut heads: Vec<(usize, &str)> = Vec::new();
    for line in code.lines().filter(|l| !l.trim().is_empty()) {
        let indent = source::indentation(line);
        while heads.last().is_some_and(|&(i, _)| i > indent) {
            heads.pop();
        }
        let word = keyword(line);
        let follows_if = matches!(heads.last(), Some(&(i, "if")) if i == indent);
        if word == "elif" || (word == "else" && line.trim_start()[4..].trim_start().starts_with(':')
                              && follows_if) {
            return true;
        }
        if heads.last().is_some_and(|&(i, _)| i == indent) {
            heads.pop();
        }
        heads.push((indent, word));
    }
    false
}

/// The text between the bracket at byte `open` and its partner, with anything nested
/// inside blanked, and the offset just past the partner. Unbalanced input runs to the
/// end of the source.
fn top_level(code: &str, open: usize) -> (String, usize) {
    let mut depth = 0usize;
    let mut inner = String::new();
    for (i, c) in code[open..].char_indices() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                if depth > 1 {
                    inner.push(' ');
                }
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (inner, open + i + 1);
                }
                inner.push(' ');
            }
            _ if depth == 1 => inner.push(c),
            _ => inner.push(' '),
        }
    }
    (inner, code.len())
}

/// Literal collection tags. Comprehensions are not literals.
pub fn literals(code: &str, family: LanguageFamily) -> BTreeSet<ConstructTag> {
    let mut found = BTreeSet::new();
    if !matches!(family, LanguageFamily::Python | LanguageFamily::JavaScript) {
        return found;
    }

    for m in LIST_OPEN.find_iter(code) {
        if !COMPREHENSION.is_match(&top_level(code, m.end() - 1).0) {
            found.insert(ConstructTag::ListLiteral);
            break;
        }
    }

    if family == LanguageFamily::JavaScript {
        // Destructuring patterns in parameters and assignments are not literals.
        let is_literal = |m: regex::Match<'_>| {
            let (_, end) = top_level(code, m.end() - 1);
            !JS_PATTERN_TAIL.is_match(&code[end..])
        };
        if JS_OBJECT_OPEN.find_iter(code).any(is_literal) {
            found.insert(ConstructTag::DictLiteral);
        }
        return found;
    }

    for (open, _) in code.match_indices('{') {
        let (inner, _) = top_level(code, open);
        if COMPREHENSION.is_match(&inner) {
            continue;
        }
        if inner.trim().is_empty() || inner.contains(':') || inner.contains("**") {
            found.insert(ConstructTag::DictLiteral);
        } else {
            found.insert(ConstructTag::SetLiteral);
        }
    }
    found
}

/// Module names referenced through the language's import mechanism, deduplicated.
pub fn imports(text: &str, code: &str, family: LanguageFamily) -> BTreeSet<String> {
    let mut found = BTreeSet::new();

    match family {
        LanguageFamily::Python => {
            // `import a.b as c, d` names every module in the list.
            for list in code_matches(&PY_IMPORT, code, code) {
                for item in list.split(',') {
                    let item = item.trim_matches(|c: char| c.is_whitespace() || c == '(' || c == ')'
                                                           || c == '\\');
                    if let Some(module) = item.split_whitespace().next() {
                        if PY_MODULE.is_match(module) {
                            found.insert(module.to_string());
                        }
                    }
                }
            }
            for module in code_matches(&PY_FROM, code, code) {
                found.insert(module.to_string());
            }
        }
        LanguageFamily::C | LanguageFamily::Cpp => {
            found.extend(code_matches(&C_INCLUDE, text, code).into_iter()
                                                              .filter(|n| valid_token(n))
                                                              .map(String::from));
        }
        LanguageFamily::Java => {
            found.extend(code_matches(&JAVA_IMPORT, text, code).into_iter().map(String::from));
        }
        LanguageFamily::JavaScript => {
            for re in [&*JS_REQUIRE, &*JS_IMPORT] {
                found.extend(code_matches(re, text, code).into_iter()
                                                          .filter(|n| valid_token(n))
                                                          .map(String::from));
            }
        }
        LanguageFamily::Other => (),
    }
    found
}

/// Suspicious-code tags. Python gets the full set; brace languages only the literal
/// division by zero.
pub fn errors(code: &str,
              functions: &[FunctionSpan<'_>],
              family: LanguageFamily)
              -> BTreeSet<ErrorTag> {
    let mut found = BTreeSet::new();
    if family == LanguageFamily::Other {
        return found;
    }

    if DIV_BY_ZERO.is_match(code) {
        found.insert(ErrorTag::DivisionByZero);
    }
    if family != LanguageFamily::Python {
        return found;
    }

    if BARE_EXCEPT.is_match(code) {
        found.insert(ErrorTag::BareExcept);
    }
    if has_empty_except(code) {
        found.insert(ErrorTag::EmptyExcept);
    }
    if USELESS_PASS.is_match(code) {
        found.insert(ErrorTag::UselessPass);
    }
    if PRINT_CALL.is_match(code) {
        found.insert(ErrorTag::PrintDebug);
    }
    if functions.iter().any(has_unreachable_statement) {
        found.insert(ErrorTag::UnreachableCode);
    }
    found
}

/// An `except` clause whose body does nothing but `pass` or `...`.
fn has_empty_except(code: &str) -> bool {
    let lines: Vec<&str> = code.lines().filter(|l| !l.trim().is_empty()).collect();
    for (n, line) in lines.iter().enumerate() {
        let Some(caps) = EXCEPT_CLAUSE.captures(line.trim()) else {
            continue;
        };
        let inline = caps.name("inline").map_or("", |m| m.as_str().trim());
        if !inline.is_empty() {
            if NO_OP.is_match(inline) {
                return true;
            }
            continue;
        }
        let indent = source::indentation(line);
        let mut body = lines[n + 1..].iter().take_while(|l| source::indentation(l) > indent).peekable();
        if body.peek().is_some() && body.all(|l| NO_OP.is_match(l.trim())) {
            return true;
        }
    }
    false
}

/// A top-level statement of a Python function body that follows a top-level `return`.
fn has_unreachable_statement(span: &FunctionSpan<'_>) -> bool {
    let mut lines = span.body.lines().filter(|l| !l.trim().is_empty());
    let body_indent = match lines.next() {
        None => return false,
        Some(first) => {
            if RETURN_STMT.is_match(first.trim_start()) {
                return lines.any(|l| source::indentation(l) == source::indentation(first));
            }
            source::indentation(first)
        }
    };

    let mut returned = false;
    for line in lines {
        if source::indentation(line) != body_indent {
            continue;
        }
        if returned {
            return true;
        }
        returned = RETURN_STMT.is_match(line.trim_start());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(lang: &str, src: &str) -> FeatureRecord {
        let rec = SubmissionRecord::new("p00001", lang, "s1", src);
        extract(&rec, &PatternSet::builtin()).unwrap()
    }

    fn tags(f: &FeatureRecord) -> Vec<&'static str> {
        f.constructs.iter().map(|t| t.as_str()).collect()
    }

    #[test]
    fn test_ids_are_copied_verbatim() {
        let rec = SubmissionRecord::new("p00018", "Python3", "s777", "print(1)\n");
        let f = extract(&rec, &PatternSet::builtin()).unwrap();
        assert_eq!(f.problem_id, "p00018");
        assert_eq!(f.language, "Python3");
        assert_eq!(f.line_count, 1);
    }

    #[test]
    fn test_undecodable() {
        let rec = SubmissionRecord::new("p00018", "python", "s9", vec![b'a', 0xff, 0xfe]);
        match extract(&rec, &PatternSet::builtin()) {
            Err(ExtractionError::Undecodable { submission_id, offset }) => {
                assert_eq!(submission_id, "s9");
                assert_eq!(offset, 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_empty_submission() {
        let f = features("python", "");
        assert_eq!(f.line_count, 0);
        assert!(f.constructs.is_empty());
        assert!(f.imports.is_empty());
    }

    #[test]
    fn test_presence_not_occurrence() {
        let src = "for i in range(3):\n    pass\nfor j in range(4):\n    if j:\n        x = j\n";
        let f = features("python", src);
        assert_eq!(tags(&f), vec!["loop", "conditional"]);
    }

    #[test]
    fn test_python_features() {
        let src = r#"#! /usr/bin/env python3
import sys, math as m
from collections import deque
import sys
# import numpy
s = "import os"

def dfs(v):
    try:
        return dfs(v - 1) if v else 0
    except:
        pass

class Solver:
    pass

while True:
    break
"#;
        let f = features("Python3", src);
        assert_eq!(tags(&f),
                   vec!["loop", "function-definition", "recursion", "exception-handling",
                        "class-definition"]);
        let imports: Vec<&str> = f.imports.iter().map(String::as_str).collect();
        assert_eq!(imports, vec!["collections", "math", "sys"]);
        assert!(f.errors.contains(&ErrorTag::BareExcept));
        assert!(f.errors.contains(&ErrorTag::UselessPass));
        assert!(!f.errors.contains(&ErrorTag::PrintDebug));
    }

    #[test]
    fn test_semicolon_imports() {
        let f = features("python", "import sys; input = sys.stdin.readline\nx = 1; import heapq\n");
        let imports: Vec<&str> = f.imports.iter().map(String::as_str).collect();
        assert_eq!(imports, vec!["heapq", "sys"]);
    }

    #[test]
    fn test_c_features() {
        let src = r#"#include <stdio.h>
#include "local.h"
/* #include <math.h> */
int main(void) {
    int n;
    for (n = 0; n < 3; n++) {
        if (n == 2) printf("if (x)\n");
    }
    return 0;
}
"#;
        let f = features("C", src);
        assert_eq!(tags(&f), vec!["loop", "conditional", "function-definition"]);
        let imports: Vec<&str> = f.imports.iter().map(String::as_str).collect();
        assert_eq!(imports, vec!["local.h", "stdio.h"]);
        assert!(f.errors.is_empty());
    }

    #[test]
    fn test_java_and_js_imports() {
        let java = "import java.util.*;\nimport static java.lang.Math.max;\n// import java.io.File;\npublic class Main {}\n";
        let f = features("Java", java);
        let imports: Vec<&str> = f.imports.iter().map(String::as_str).collect();
        assert_eq!(imports, vec!["java.lang.Math.max", "java.util.*"]);
        assert_eq!(tags(&f), vec!["class-definition"]);

        let js = "const fs = require('fs');\nimport { a } from \"lib\";\n// require('nope')\n";
        let f = features("JavaScript", js);
        let imports: Vec<&str> = f.imports.iter().map(String::as_str).collect();
        assert_eq!(imports, vec!["fs", "lib"]);
    }

    #[test]
    fn test_unknown_language_counts_lines_only() {
        let f = features("Haskell", "import Data.List\nmain = print 1\n");
        assert_eq!(f.line_count, 2);
        assert!(f.constructs.is_empty());
        assert!(f.imports.is_empty());
        assert!(f.errors.is_empty());
    }

    #[test]
    fn test_python_error_patterns() {
        let src = "def f(x):\n    return x / 0\n    print(x)\n\ndef g():\n    if 1:\n        return 2\n    return 3\n";
        let f = features("python", src);
        let errors: Vec<&str> = f.errors.iter().map(|e| e.as_str()).collect();
        assert_eq!(errors, vec!["print-debug", "division-by-zero", "unreachable-code"]);

        let f = features("python", "x = 1 / 0.5\ny = 4 // 2\n");
        assert!(f.errors.is_empty());
    }

    #[test]
    fn test_continuation_lines_are_not_statements() {
        let f = features("python", "y = (a\n     if b else c[1:2])\n");
        assert!(f.constructs.is_empty());

        let f = features("python", "def f(a):\n    return (a +\n    1)\n");
        assert_eq!(tags(&f), vec!["function-definition"]);
        assert!(f.errors.is_empty());

        let f = features("python", "def f(a):\n    return (a +\n            1)\n    print(a)\n");
        assert!(f.errors.contains(&ErrorTag::UnreachableCode));
    }

    #[test]
    fn test_python_else_branches() {
        let f = features("python", "if x:\n    a = 1\nelse:\n    a = 2\n");
        assert_eq!(tags(&f), vec!["conditional", "else-branch"]);
        let f = features("python", "if x:\n    a = 1\nelif y:\n    a = 2\n");
        assert!(f.constructs.contains(&ConstructTag::ElseBranch));

        let loop_else = "for i in r:\n    if i:\n        break\nelse:\n    print(0)\n";
        assert_eq!(tags(&features("python", loop_else)), vec!["loop", "conditional"]);
        let try_else = "try:\n    x = 1\nexcept ValueError:\n    raise\nelse:\n    x = 2\n";
        assert_eq!(tags(&features("python", try_else)), vec!["exception-handling"]);
        assert!(features("python", "a = 1 if b else 2\n").constructs.is_empty());
    }

    #[test]
    fn test_python_literals() {
        let f = features("python", "a = [1, 2]\nb = {}\nc = {1, 2}\n");
        assert_eq!(tags(&f), vec!["list-literal", "dict-literal", "set-literal"]);

        let f = features("python", "d = {'k': [i for i in x]}\n");
        assert_eq!(tags(&f), vec!["dict-literal"]);

        let f = features("python", "x = a[0] + f(b)[1:2]\ny = [i * i for i in x]\nz = {k for k in x}\ns = 'abc'[0]\n");
        assert!(f.constructs.is_empty());

        let f = features("python", "if x in [1, 2]:\n    y = {**a, 'b': 1}\n");
        assert_eq!(tags(&f), vec!["conditional", "list-literal", "dict-literal"]);
    }

    #[test]
    fn test_js_literals() {
        let f = features("JavaScript", "const a = [1, 2];\nconst o = { k: 1 };\n");
        assert_eq!(tags(&f), vec!["list-literal", "dict-literal"]);

        let f = features("JavaScript", "const [a, b] = xs;\nconst f = ({ k }) => k;\nlet v = xs[0];\n");
        assert_eq!(tags(&f), vec!["function-definition"]);
    }

    #[test]
    fn test_empty_except() {
        let src = "try:\n    x = 1\nexcept ValueError:\n    pass\n";
        assert!(features("python", src).errors.contains(&ErrorTag::EmptyExcept));
        let inline = "try:\n    x = 1\nexcept (A, B): ...\n";
        assert!(features("python", inline).errors.contains(&ErrorTag::EmptyExcept));

        let handled = "try:\n    x = 1\nexcept ValueError:\n    pass\n    x = 0\n";
        assert!(!features("python", handled).errors.contains(&ErrorTag::EmptyExcept));
    }

    #[test]
    fn test_brace_division_by_zero() {
        let f = features("C++", "int main() { int a = 1 / 0; // x / 0\n}\n");
        let errors: Vec<&str> = f.errors.iter().map(|e| e.as_str()).collect();
        assert_eq!(errors, vec!["division-by-zero"]);
    }
}
