//! Lightweight source scanning: masking of comments and string literals, and
//! discovery of function definitions with their bodies.
//!
//! Nothing here parses; the scanners only know enough lexical structure to keep
//! pattern matching away from text that is not code.

use std::sync::LazyLock;

use regex::Regex;

use crate::patterns::LanguageFamily;

struct Syntax {
    hash_comments: bool,
    slash_comments: bool,
    triple_quotes: bool,
    backticks: bool,
    /// Newlines inside brackets or triple-quoted strings, or after a backslash, do
    /// not end a statement.
    implicit_joining: bool,
}

fn syntax(family: LanguageFamily) -> Syntax {
    match family {
        LanguageFamily::Python => Syntax {
            hash_comments: true,
            slash_comments: false,
            triple_quotes: true,
            backticks: false,
            implicit_joining: true,
        },
        LanguageFamily::JavaScript => Syntax {
            hash_comments: false,
            slash_comments: true,
            triple_quotes: false,
            backticks: true,
            implicit_joining: false,
        },
        LanguageFamily::C | LanguageFamily::Cpp | LanguageFamily::Java => Syntax {
            hash_comments: false,
            slash_comments: true,
            triple_quotes: false,
            backticks: false,
            implicit_joining: false,
        },
        LanguageFamily::Other => Syntax {
            hash_comments: false,
            slash_comments: false,
            triple_quotes: false,
            backticks: false,
            implicit_joining: false,
        },
    }
}

enum State {
    Code,
    LineComment,
    BlockComment,
    Str { quote: u8, triple: bool },
}

/// Returns `src` with comments blanked entirely and string literal contents blanked
/// (delimiters kept). Every blanked byte becomes a space except newlines, so byte
/// offsets and line structure are identical to the input.
pub fn mask(src: &str, family: LanguageFamily) -> String {
    scan(src, family, false)
}

/// Like [`mask`], but in languages with implicit line joining (Python) every newline
/// that does not end a statement is blanked too, along with a continuing backslash.
/// Each logical line then sits on one physical line. Byte offsets are unchanged.
pub fn mask_statements(src: &str, family: LanguageFamily) -> String {
    scan(src, family, syntax(family).implicit_joining)
}

fn scan(src: &str, family: LanguageFamily, join: bool) -> String {
    let syn = syntax(family);
    let b = src.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut state = State::Code;
    let mut depth = 0usize;
    let mut i = 0;

    let blank = |c: u8| if c == b'\n' { b'\n' } else { b' ' };
    let line_end = |depth: usize| if join && depth > 0 { b' ' } else { b'\n' };

    while i < b.len() {
        let c = b[i];
        let next = b.get(i + 1).copied();
        match state {
            State::Code => {
                if syn.hash_comments && c == b'#' {
                    state = State::LineComment;
                    out.push(b' ');
                } else if syn.slash_comments && c == b'/' && next == Some(b'/') {
                    state = State::LineComment;
                    out.extend_from_slice(b"  ");
                    i += 1;
                } else if syn.slash_comments && c == b'/' && next == Some(b'*') {
                    state = State::BlockComment;
                    out.extend_from_slice(b"  ");
                    i += 1;
                } else if join && c == b'\\' && next == Some(b'\n') {
                    out.extend_from_slice(b"  ");
                    i += 1;
                } else if c == b'\n' {
                    out.push(line_end(depth));
                } else if c == b'"' || c == b'\'' || (syn.backticks && c == b'`') {
                    let triple = syn.triple_quotes && next == Some(c) && b.get(i + 2) == Some(&c);
                    if triple {
                        out.extend_from_slice(&[c, c, c]);
                        i += 2;
                    } else {
                        out.push(c);
                    }
                    state = State::Str { quote: c, triple };
                } else {
                    match c {
                        b'(' | b'[' | b'{' => depth += 1,
                        b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                        _ => (),
                    }
                    out.push(c);
                }
            }
            State::LineComment => {
                if c == b'\n' {
                    state = State::Code;
                    out.push(line_end(depth));
                } else {
                    out.push(b' ');
                }
            }
            State::BlockComment => {
                if c == b'*' && next == Some(b'/') {
                    state = State::Code;
                    out.extend_from_slice(b"  ");
                    i += 1;
                } else {
                    out.push(blank(c));
                }
            }
            State::Str { quote, triple } => {
                if c == b'\\' {
                    out.push(b' ');
                    if let Some(n) = next {
                        out.push(if join { b' ' } else { blank(n) });
                        i += 1;
                    }
                } else if c == quote && !triple {
                    out.push(c);
                    state = State::Code;
                } else if c == quote && next == Some(quote) && b.get(i + 2) == Some(&quote) {
                    out.extend_from_slice(&[c, c, c]);
                    i += 2;
                    state = State::Code;
                } else if c == b'\n' && !triple && quote != b'`' {
                    // Unterminated literal; resynchronise at the line end.
                    out.push(line_end(depth));
                    state = State::Code;
                } else if join && c == b'\n' {
                    out.push(b' ');
                } else {
                    out.push(blank(c));
                }
            }
        }
        i += 1;
    }

    // Only whole multi-byte sequences are ever blanked, so this is lossless.
    String::from_utf8_lossy(&out).into_owned()
}

/// Number of lines that are non-empty after stripping trailing whitespace.
pub fn line_count(src: &str) -> u64 {
    src.lines().filter(|l| !l.trim_end().is_empty()).count() as u64
}

/// Width of the leading whitespace of a line; a tab counts as one column.
pub fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// A function definition found in masked source.
#[derive(Debug, PartialEq, Eq)]
pub struct FunctionSpan<'a> {
    pub name: &'a str,
    /// Body text, excluding the signature line (Python) or the braces.
    pub body: &'a str,
}

static PY_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t]*)(?:async[ \t]+)?def[ \t]+([A-Za-z_]\w*)[ \t]*\(")
        .expect("invalid regex")
});

static C_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(r"(?m)^[ \t]*(?P<prefix>(?:[A-Za-z_][\w:<>,]*[ \t*&]+)+)",
                       r"(?P<name>[A-Za-z_]\w*)[ \t]*\([^;{}()]*\)\s*",
                       r"(?:const\s*)?(?:noexcept\s*)?(?:throws\s+[\w.,\s]+?)?\{"))
        .expect("invalid regex")
});

static JS_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(r"(?:\bfunction\s*\*?\s*(?P<fname>[A-Za-z_$][\w$]*)\s*\([^()]*\)\s*\{",
                       r"|\b(?:const|let|var)\s+(?P<aname>[A-Za-z_$][\w$]*)\s*=\s*",
                       r"(?:function\b[^{]*|\([^()]*\)\s*=>|[A-Za-z_$][\w$]*\s*=>)\s*\{)"))
        .expect("invalid regex")
});

/// Words that can precede `name(...) {` without it being a definition.
const NOT_A_TYPE: &[&str] = &["return", "new", "else", "throw", "case", "goto", "delete", "do"];
/// Names that look like calls but are control flow.
const NOT_A_NAME: &[&str] = &["if", "for", "while", "switch", "catch", "return", "sizeof",
                               "synchronized", "with"];

/// Finds the function definitions in masked source.
pub fn functions<'a>(code: &'a str, family: LanguageFamily) -> Vec<FunctionSpan<'a>> {
    match family {
        LanguageFamily::Python => python_functions(code),
        LanguageFamily::JavaScript => {
            JS_DEF.captures_iter(code)
                .filter_map(|caps| {
                    let name = caps.name("fname").or_else(|| caps.name("aname"))?;
                    let open = caps.get(0)?.end() - 1;
                    Some(FunctionSpan { name: name.as_str(), body: brace_body(code, open)? })
                })
                .collect()
        }
        LanguageFamily::C | LanguageFamily::Cpp | LanguageFamily::Java => {
            C_DEF.captures_iter(code)
                .filter_map(|caps| {
                    let prefix = caps.name("prefix")?.as_str();
                    let name = caps.name("name")?.as_str();
                    if NOT_A_NAME.contains(&name)
                        || prefix.split(|c: char| !(c.is_alphanumeric() || c == '_'))
                                 .any(|w| NOT_A_TYPE.contains(&w)) {
                        return None;
                    }
                    let open = caps.get(0)?.end() - 1;
                    Some(FunctionSpan { name, body: brace_body(code, open)? })
                })
                .collect()
        }
        LanguageFamily::Other => Vec::new(),
    }
}

/// Text strictly between the brace at byte `open` and its matching closing brace.
/// Unbalanced input runs to the end of the source.
fn brace_body(code: &str, open: usize) -> Option<&str> {
    if code.as_bytes().get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    for (i, c) in code.bytes().enumerate().skip(open) {
        match c {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return code.get(open + 1..i);
                }
            }
            _ => (),
        }
    }
    code.get(open + 1..)
}

fn python_functions(code: &str) -> Vec<FunctionSpan<'_>> {
    let mut spans = Vec::new();

    for caps in PY_DEF.captures_iter(code) {
        let (Some(whole), Some(indent), Some(name)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let def_indent = indent.as_str().len();

        // The body starts on the line after the signature and ends before the first
        // non-blank line indented no deeper than the `def`.
        let body_start = match code[whole.end()..].find('\n') {
            None => code.len(),
            Some(n) => whole.end() + n + 1,
        };
        let mut body_end = code.len();
        let mut offset = body_start;
        for line in code[body_start..].split_inclusive('\n') {
            if !line.trim().is_empty() && indentation(line) <= def_indent {
                body_end = offset;
                break;
            }
            offset += line.len();
        }
        spans.push(FunctionSpan { name: name.as_str(), body: &code[body_start..body_end] });
    }
    spans
}

/// Whether the body calls the function by its own name. Calls through another object
/// (`x.name(`, `p->name(`) do not count; `self.`/`this.` calls do.
pub fn is_recursive(span: &FunctionSpan<'_>) -> bool {
    let pattern = format!(r"(?:^|[^\w.$>])(?:(?:self|this)\.)?{}\s*\(", regex::escape(span.name));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(span.body),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_python() {
        let src = "import sys # for loop\ns = \"for x in y:\"\nt = '''\nwhile 1:\n'''\n";
        let masked = mask(src, LanguageFamily::Python);
        assert_eq!(masked.len(), src.len());
        assert_eq!(masked.lines().count(), src.lines().count());
        assert!(!masked.contains("for"));
        assert!(!masked.contains("while"));
        assert!(masked.starts_with("import sys "));
        assert!(masked.contains(&format!("s = \"{}\"", " ".repeat("for x in y:".len()))));
    }

    #[test]
    fn test_mask_c() {
        let src = "/* if (x) */ int a; // while (1)\nchar *s = \"for(;;)\\\"\"; char c = '{';\n";
        let masked = mask(src, LanguageFamily::C);
        assert_eq!(masked.len(), src.len());
        assert!(!masked.contains("if"));
        assert!(!masked.contains("while"));
        assert!(!masked.contains("for"));
        assert!(!masked.contains('{'));
        assert!(masked.contains("int a;"));
    }

    #[test]
    fn test_mask_keeps_utf8() {
        let src = "# é comment\nx = 'ü'\ny = 1\n";
        let masked = mask(src, LanguageFamily::Python);
        assert_eq!(masked.len(), src.len());
        assert!(masked.ends_with("y = 1\n"));
    }

    #[test]
    fn test_mask_statements_joins_continuations() {
        let src = "y = (a\n     if b else c[1:2])\nt = '''\nx\n'''\nz = 1 + \\\n    2\nw = 3\n";
        let joined = mask_statements(src, LanguageFamily::Python);
        assert_eq!(joined.len(), src.len());
        let lines: Vec<&str> = joined.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("y = (a ") && lines[0].ends_with("c[1:2])"));
        assert!(lines[2].starts_with("z = 1 +") && lines[2].ends_with("2"));
        assert_eq!(lines[3], "w = 3");

        let c = "int a = f(1,\n          2);\n";
        assert_eq!(mask_statements(c, LanguageFamily::C), mask(c, LanguageFamily::C));
    }

    #[test]
    fn test_line_count() {
        assert_eq!(line_count(""), 0);
        assert_eq!(line_count("\n\n   \n"), 0);
        assert_eq!(line_count("a\n\nb  \r\n\tc\n"), 3);
        assert_eq!(line_count("no trailing newline"), 1);
    }

    #[test]
    fn test_python_functions() {
        let code = "def fact(n):\n    if n < 2:\n        return 1\n    return n * fact(n - 1)\n\nprint(fact(5))\n";
        let fs = functions(code, LanguageFamily::Python);
        assert_eq!(fs.len(), 1);
        assert_eq!(fs[0].name, "fact");
        assert!(!fs[0].body.contains("print"));
        assert!(is_recursive(&fs[0]));
    }

    #[test]
    fn test_c_functions() {
        let code = "int gcd(int a, int b)\n{\n    if (b == 0) return a;\n    return gcd(b, a % b);\n}\n\nint main(void) {\n    if (x) {\n        y();\n    } else if (z) {\n    }\n    return gcd(4, 6);\n}\n";
        let fs = functions(code, LanguageFamily::C);
        let names: Vec<&str> = fs.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["gcd", "main"]);
        assert!(is_recursive(&fs[0]));
        assert!(!is_recursive(&fs[1]));
    }

    #[test]
    fn test_java_methods() {
        let code = "public class Main {\n    static long fib(int n) throws Exception {\n        return n < 2 ? n : fib(n - 1) + fib(n - 2);\n    }\n    public static void main(String[] args) {\n        System.out.println(fib(10));\n    }\n}\n";
        let fs = functions(code, LanguageFamily::Java);
        let names: Vec<&str> = fs.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["fib", "main"]);
        assert!(is_recursive(&fs[0]));
        assert!(!is_recursive(&fs[1]));
    }

    #[test]
    fn test_js_functions() {
        let code = "function walk(n) { if (n) { walk(n.next); } }\nconst sq = (x) => { return x * x; };\n";
        let fs = functions(code, LanguageFamily::JavaScript);
        let names: Vec<&str> = fs.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["walk", "sq"]);
        assert!(is_recursive(&fs[0]));
        assert!(!is_recursive(&fs[1]));
    }

    #[test]
    fn test_method_call_on_other_object_is_not_recursion() {
        let code = "def solve(a):\n    return a.solve(1)\n";
        let fs = functions(code, LanguageFamily::Python);
        assert!(!is_recursive(&fs[0]));

        let code = "def solve(self, a):\n    return self.solve(a - 1)\n";
        let fs = functions(code, LanguageFamily::Python);
        assert!(is_recursive(&fs[0]));
    }
}
