//! Include/exclude glob filters over repository-relative paths.
//!
//! A [`Filters`] value is what the configuration carries; [`Filters::matcher`]
//! compiles it once into a [`Matcher`] that both the overlay (which files to
//! copy onto the working tree) and the deletion pass (which files to remove)
//! use, so the two never disagree about what a pattern means.
//!
//! # Pattern syntax
//!
//! | Token | Meaning |
//! |-------|---------|
//! | `**` | any run of characters, including `/` |
//! | `*` | any run of characters within one path segment |
//! | `?` | exactly one character other than `/` |
//! | `[abc]`, `[a-z]`, `[!abc]` | character class (negated with `!` or `^`) |
//! | `{a,b}` | alternation; each branch is itself a pattern |
//! | `\x` | literal `x` |
//!
//! Patterns are matched against the whole slash-separated relative path and
//! are case-sensitive. Note that `**` is not restricted to whole segments:
//! `**.txt` matches `a/b/c.txt` and `a/b**` matches `a/b.txt`. Paths (not
//! patterns) have `\` normalized to `/` before matching.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Which files to include, and which of those to exclude again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Filters {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// Filters that select every file.
    pub fn everything() -> Self {
        Self::new(["**"], Vec::<String>::new())
    }

    /// Compile the patterns. Fails on the first malformed pattern.
    pub fn matcher(&self) -> Result<Matcher, ConfigError> {
        let compile = |patterns: &[String]| -> Result<Vec<Glob>, ConfigError> {
            patterns.iter().map(|p| Glob::new(p)).collect()
        };
        Ok(Matcher {
            include: compile(&self.include)?,
            exclude: compile(&self.exclude)?,
        })
    }
}

/// Compiled form of [`Filters`].
#[derive(Debug, Clone)]
pub struct Matcher {
    include: Vec<Glob>,
    exclude: Vec<Glob>,
}

impl Matcher {
    /// `true` when at least one include pattern and no exclude pattern
    /// matches `path`. An empty include list matches nothing.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.replace('\\', "/");
        self.include.iter().any(|g| g.is_match(&path))
            && !self.exclude.iter().any(|g| g.is_match(&path))
    }
}

/// A single compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let source = translate(pattern).map_err(|detail| invalid_pattern(pattern, detail))?;
        let regex = Regex::new(&source).map_err(|e| invalid_pattern(pattern, e.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn invalid_pattern(pattern: &str, detail: impl Into<String>) -> ConfigError {
    ConfigError::invalid("filters", format!("bad glob '{}': {}", pattern, detail.into()))
}

/// Translate a glob into an anchored regular expression.
fn translate(glob: &str) -> Result<String, String> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^(?s:");
    let mut braces = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                while chars.get(i + 1) == Some(&'*') {
                    i += 1;
                }
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => i = class(&chars, i, &mut out)?,
            '{' => {
                braces += 1;
                out.push_str("(?:");
            }
            '}' if braces > 0 => {
                braces -= 1;
                out.push(')');
            }
            ',' if braces > 0 => out.push('|'),
            '\\' => {
                i += 1;
                let c = chars.get(i).ok_or("trailing escape")?;
                push_literal(&mut out, *c);
            }
            c => push_literal(&mut out, c),
        }
        i += 1;
    }
    if braces > 0 {
        return Err("unclosed '{'".into());
    }
    out.push_str(")$");
    Ok(out)
}

/// Translate the character class starting at `chars[start] == '['`; returns
/// the index of the closing `]`.
fn class(chars: &[char], start: usize, out: &mut String) -> Result<usize, String> {
    let mut i = start + 1;
    out.push('[');
    if matches!(chars.get(i), Some('!') | Some('^')) {
        out.push('^');
        i += 1;
    }
    let first = i;
    while i < chars.len() {
        let c = chars[i];
        if c == ']' && i > first {
            out.push(']');
            return Ok(i);
        }
        let is_range = c == '-' && i > first && chars.get(i + 1).is_some_and(|n| *n != ']');
        if is_range {
            out.push('-');
        } else {
            push_literal(out, c);
        }
        i += 1;
    }
    Err("unclosed '['".into())
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex_lite::escape(c.encode_utf8(&mut buf)));
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILES: &[&str] = &[
        "a/b/c.txt",
        "a/d.txt",
        "a/b/d.md",
        "a/b/d.txt",
        "a.txt",
        "b.md",
    ];

    fn select(filters: &Filters, files: &[&str]) -> Vec<String> {
        let matcher = filters.matcher().unwrap();
        files
            .iter()
            .filter(|f| matcher.matches(f))
            .map(|f| f.to_string())
            .collect()
    }

    #[test]
    fn test_include_and_exclude() {
        let filters = Filters::new(["a/b/**"], ["**.txt"]);
        assert_eq!(
            select(&filters, &["a/b/c.txt", "a/b/c.md", "a/c.txt"]),
            vec!["a/b/c.md"]
        );
    }

    #[test]
    fn test_all_md_files() {
        let filters = Filters::new(["**/*.md", "*.md"], Vec::<String>::new());
        assert_eq!(select(&filters, FILES), vec!["a/b/d.md", "b.md"]);
    }

    #[test]
    fn test_root_level_only() {
        let filters = Filters::new(["*.md"], Vec::<String>::new());
        assert_eq!(select(&filters, FILES), vec!["b.md"]);
    }

    #[test]
    fn test_double_star_inside_segment() {
        let filters = Filters::new(["**.txt"], ["a/b**", "a.txt"]);
        assert_eq!(select(&filters, FILES), vec!["a/d.txt"]);
    }

    #[test]
    fn test_empty_include_matches_nothing() {
        let filters = Filters::new(Vec::<String>::new(), ["**.md"]);
        assert!(select(&filters, FILES).is_empty());
    }

    #[test]
    fn test_everything() {
        assert_eq!(select(&Filters::everything(), FILES).len(), FILES.len());
    }

    #[test]
    fn test_whole_path_anchoring() {
        let filters = Filters::new(["b/*.go"], Vec::<String>::new());
        let matcher = filters.matcher().unwrap();
        assert!(matcher.matches("b/main.go"));
        assert!(!matcher.matches("a/b/main.go"));
        assert!(!matcher.matches("b/main.gox"));
    }

    #[test]
    fn test_question_mark_and_classes() {
        let filters = Filters::new(
            [".github/workflows/knative-*.y?ml", "docs/[a-c]*.md", "x/[!0-9]"],
            Vec::<String>::new(),
        );
        let matcher = filters.matcher().unwrap();
        assert!(matcher.matches(".github/workflows/knative-go-test.yaml"));
        assert!(matcher.matches(".github/workflows/knative-verify.yaml"));
        assert!(!matcher.matches(".github/workflows/knative-verify.yml"));
        assert!(!matcher.matches(".github/workflows/other.yaml"));
        assert!(!matcher.matches(".github/workflows/knative-a/b.yaml"));
        assert!(matcher.matches("docs/about.md"));
        assert!(!matcher.matches("docs/zebra.md"));
        assert!(matcher.matches("x/a"));
        assert!(!matcher.matches("x/7"));
    }

    #[test]
    fn test_alternation() {
        let filters = Filters::new(["**/*.{yaml,yml}"], Vec::<String>::new());
        let matcher = filters.matcher().unwrap();
        assert!(matcher.matches("config/core/deploy.yaml"));
        assert!(matcher.matches("config/core/deploy.yml"));
        assert!(!matcher.matches("config/core/deploy.json"));
    }

    #[test]
    fn test_case_sensitive_and_literal_dots() {
        let filters = Filters::new(["*.MD"], Vec::<String>::new());
        let matcher = filters.matcher().unwrap();
        assert!(matcher.matches("README.MD"));
        assert!(!matcher.matches("README.md"));
        assert!(!Glob::new("a.b").unwrap().is_match("axb"));
    }

    #[test]
    fn test_backslash_paths_are_normalized() {
        let filters = Filters::new(["a/b/**"], Vec::<String>::new());
        assert!(filters.matcher().unwrap().matches("a\\b\\c.txt"));
    }

    #[test]
    fn test_malformed_patterns() {
        for bad in ["a/[bc", "{a,b", "a\\"] {
            let err = Filters::new([bad], Vec::<String>::new()).matcher().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "filters"),
                "pattern {bad:?} gave {err:?}"
            );
        }
    }
}
