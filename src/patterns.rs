//! Tag vocabularies and the per-language patterns that trigger construct tags.
//!
//! The vocabularies are fixed. The regular expressions behind each construct tag are
//! held in a [`PatternSet`], which starts from built-in rules and can be extended from
//! the job configuration file. All rules run on masked source (comments and string
//! contents blanked, see [`crate::source`]), in multi-line mode.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Coarse language classification used to pick patterns. The language label of a
/// submission is kept verbatim elsewhere; this is only for dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LanguageFamily {
    Python,
    C,
    Cpp,
    Java,
    JavaScript,
    Other,
}

impl LanguageFamily {
    /// Classifies a free-form language label such as `Python3`, `C++14`, `GNU C` or
    /// `JavaScript`.
    pub fn from_label(label: &str) -> LanguageFamily {
        let l = label.trim().to_ascii_lowercase();
        let l = l.strip_prefix("gnu ").unwrap_or(&l);

        if l.starts_with("python") || l.starts_with("pypy") || l == "py" {
            LanguageFamily::Python
        } else if l.starts_with("c++") || l.starts_with("cpp") || l.starts_with("g++")
            || l == "cc" || l == "cxx" {
            LanguageFamily::Cpp
        } else if l.starts_with("javascript") || l == "js" || l.starts_with("node") {
            LanguageFamily::JavaScript
        } else if l.starts_with("java") {
            LanguageFamily::Java
        } else if l == "c" || l.starts_with("c89") || l.starts_with("c99")
            || l.starts_with("c11") || l.starts_with("c17") || l == "gcc" || l == "clang" {
            LanguageFamily::C
        } else {
            LanguageFamily::Other
        }
    }

    /// Strict name used in configuration files.
    pub fn from_name(name: &str) -> Result<LanguageFamily, ConfigError> {
        match name {
            "python" => Ok(LanguageFamily::Python),
            "c" => Ok(LanguageFamily::C),
            "cpp" => Ok(LanguageFamily::Cpp),
            "java" => Ok(LanguageFamily::Java),
            "javascript" => Ok(LanguageFamily::JavaScript),
            other => Err(ConfigError::UnsupportedLanguage(other.to_string())),
        }
    }

    /// Languages whose blocks are delimited by braces.
    pub fn uses_braces(self) -> bool {
        matches!(self,
                 LanguageFamily::C | LanguageFamily::Cpp | LanguageFamily::Java
                 | LanguageFamily::JavaScript)
    }
}

/// Structural categories detected in a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstructTag {
    Loop,
    Conditional,
    FunctionDefinition,
    Recursion,
    ExceptionHandling,
    ClassDefinition,
    ElseBranch,
    ListLiteral,
    DictLiteral,
    SetLiteral,
}

impl ConstructTag {
    pub const ALL: [ConstructTag; 10] = [ConstructTag::Loop,
                                         ConstructTag::Conditional,
                                         ConstructTag::FunctionDefinition,
                                         ConstructTag::Recursion,
                                         ConstructTag::ExceptionHandling,
                                         ConstructTag::ClassDefinition,
                                         ConstructTag::ElseBranch,
                                         ConstructTag::ListLiteral,
                                         ConstructTag::DictLiteral,
                                         ConstructTag::SetLiteral];

    pub fn as_str(self) -> &'static str {
        match self {
            ConstructTag::Loop => "loop",
            ConstructTag::Conditional => "conditional",
            ConstructTag::FunctionDefinition => "function-definition",
            ConstructTag::Recursion => "recursion",
            ConstructTag::ExceptionHandling => "exception-handling",
            ConstructTag::ClassDefinition => "class-definition",
            ConstructTag::ElseBranch => "else-branch",
            ConstructTag::ListLiteral => "list-literal",
            ConstructTag::DictLiteral => "dict-literal",
            ConstructTag::SetLiteral => "set-literal",
        }
    }
}

impl FromStr for ConstructTag {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<ConstructTag, ConfigError> {
        ConstructTag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownConstruct(s.to_string()))
    }
}

impl fmt::Display for ConstructTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suspicious-code categories (error-frequency job).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorTag {
    BareExcept,
    EmptyExcept,
    UselessPass,
    PrintDebug,
    DivisionByZero,
    UnreachableCode,
}

impl ErrorTag {
    pub const ALL: [ErrorTag; 6] = [ErrorTag::BareExcept,
                                    ErrorTag::EmptyExcept,
                                    ErrorTag::UselessPass,
                                    ErrorTag::PrintDebug,
                                    ErrorTag::DivisionByZero,
                                    ErrorTag::UnreachableCode];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorTag::BareExcept => "bare-except",
            ErrorTag::EmptyExcept => "empty-except",
            ErrorTag::UselessPass => "useless-pass",
            ErrorTag::PrintDebug => "print-debug",
            ErrorTag::DivisionByZero => "division-by-zero",
            ErrorTag::UnreachableCode => "unreachable-code",
        }
    }
}

impl FromStr for ErrorTag {
    type Err = String;
    fn from_str(s: &str) -> Result<ErrorTag, String> {
        ErrorTag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown error tag `{}`", s))
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pattern entry as written in the configuration file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PatternConfig {
    pub language: String,
    pub construct: String,
    pub regex: String,
}

#[derive(Clone, Debug)]
struct ConstructRule {
    family: LanguageFamily,
    tag: ConstructTag,
    regex: Regex,
}

use self::LanguageFamily::{C, Cpp, Java, JavaScript, Python};

const BRACES: &[LanguageFamily] = &[C, Cpp, Java, JavaScript];

/// Built-in rules. Function definitions and recursion are additionally derived from
/// the function spans found in the source; Python `else` branches and the literal
/// tags from the statement and bracket structure.
const BUILTIN_RULES: &[(&[LanguageFamily], ConstructTag, &str)] = &[
    (&[Python], ConstructTag::Loop, r"^[ \t]*(?:async[ \t]+)?for\b.*\bin\b.*:"),
    (&[Python], ConstructTag::Loop, r"^[ \t]*while\b.*:"),
    (&[Python], ConstructTag::Conditional, r"^[ \t]*(?:if|elif)\b.*:"),
    (&[Python], ConstructTag::ExceptionHandling, r"^[ \t]*try[ \t]*:"),
    (&[Python], ConstructTag::ClassDefinition, r"^[ \t]*class[ \t]+[A-Za-z_]\w*[ \t]*[:(]"),
    (BRACES, ConstructTag::Loop, r"\b(?:for|while)\s*\("),
    (BRACES, ConstructTag::Loop, r"\bdo\s*\{"),
    (BRACES, ConstructTag::ElseBranch, r"(?:^|[;}])\s*else\b"),
    (BRACES, ConstructTag::Conditional, r"\b(?:if|switch)\s*\("),
    (&[Cpp, Java, JavaScript], ConstructTag::ExceptionHandling, r"\btry\s*\{"),
    (&[Cpp], ConstructTag::ClassDefinition, r"\b(?:class|struct)\s+[A-Za-z_]\w*\s*(?::[^;{]*)?\{"),
    (&[Java], ConstructTag::ClassDefinition, r"\b(?:class|interface|enum)\s+[A-Za-z_]\w*[^;{]*\{"),
    (&[JavaScript], ConstructTag::ClassDefinition, r"\bclass\s+[A-Za-z_$][\w$]*\s*(?:extends\s+[\w$.]+\s*)?\{"),
    (&[JavaScript], ConstructTag::FunctionDefinition, r"\bfunction\b|=>"),
];

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .map_err(|e| ConfigError::BadPattern { pattern: pattern.to_string(), source: e })
}

static BUILTIN: LazyLock<Arc<PatternSet>> = LazyLock::new(|| {
    let mut rules = Vec::new();
    for (families, tag, pattern) in BUILTIN_RULES {
        let regex = Regex::new(&format!("(?m){}", pattern)).expect("invalid built-in pattern");
        for family in *families {
            rules.push(ConstructRule { family: *family, tag: *tag, regex: regex.clone() });
        }
    }
    Arc::new(PatternSet { rules })
});

/// The construct rules in effect for a job.
#[derive(Clone, Debug)]
pub struct PatternSet {
    rules: Vec<ConstructRule>,
}

impl PatternSet {
    /// Shared instance holding only the built-in rules.
    pub fn builtin() -> Arc<PatternSet> {
        BUILTIN.clone()
    }

    /// Built-in rules plus the given configured ones.
    pub fn with_extra(extra: &[PatternConfig]) -> Result<PatternSet, ConfigError> {
        let mut set = (*PatternSet::builtin()).clone();
        for p in extra {
            let family = LanguageFamily::from_name(&p.language)?;
            let tag: ConstructTag = p.construct.parse()?;
            let regex = compile(&p.regex)?;
            debug!(language = %p.language, construct = %tag, "adding configured construct pattern");
            set.rules.push(ConstructRule { family, tag, regex });
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Tags whose rules match the masked source. Tags in vocabulary order.
    pub fn matching(&self, family: LanguageFamily, code: &str) -> Vec<ConstructTag> {
        let mut tags: Vec<ConstructTag> = self.rules
            .iter()
            .filter(|r| r.family == family && r.regex.is_match(code))
            .map(|r| r.tag)
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }
}
