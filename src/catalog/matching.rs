//! Path-query matching: literal string equality unless the query string
//! contains a regex metacharacter and compiles as a valid pattern.

use regex::Regex;

/// The exact metacharacter set from the original engine's `is_regex`
/// check: if any of these substrings appear in the query, it is treated
/// as a candidate regular expression rather than literal text.
const REGEX_MARKERS: &[&str] = &[
    "[", "]", "{", "}", "^", "|", "\\s", "\\S", "\\d", "\\D", "\\w", "\\W", "(", ")", "?", "*",
    "+", "$", "\\b", "\\B",
];

/// Whether `input` contains a regex metacharacter.
pub fn is_regex(input: &str) -> bool {
    REGEX_MARKERS.iter().any(|marker| input.contains(marker))
}

/// A compiled path query: either literal equality or a regex match.
pub enum PathQuery {
    Literal(String),
    Pattern(Regex),
}

impl PathQuery {
    /// Build a query from user input. If the input contains a regex
    /// metacharacter and compiles as a valid pattern, it is compiled as a
    /// regex; otherwise (including when a would-be pattern fails to
    /// compile) it falls back to literal equality.
    pub fn parse(input: &str) -> Self {
        if is_regex(input) {
            if let Ok(re) = Regex::new(input) {
                return PathQuery::Pattern(re);
            }
        }
        PathQuery::Literal(input.to_string())
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            PathQuery::Literal(s) => s == candidate,
            PathQuery::Pattern(re) => re.is_match(candidate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_is_literal() {
        let q = PathQuery::parse("/data/foo.nc");
        assert!(q.matches("/data/foo.nc"));
        assert!(!q.matches("/data/bar.nc"));
    }

    #[test]
    fn alternation_pattern_matches_both_branches() {
        // S4: query `^/data/(foo|bar)\.nc$` matches two catalog files.
        let q = PathQuery::parse(r"^/data/(foo|bar)\.nc$");
        assert!(q.matches("/data/foo.nc"));
        assert!(q.matches("/data/bar.nc"));
        assert!(!q.matches("/data/baz.nc"));
    }

    #[test]
    fn identical_string_without_metacharacters_matches_literally_only() {
        // S4: the same literal string with metacharacters stripped out
        // matches via equality only, not as a loose substring search.
        let literal = "/data/foonc";
        let q = PathQuery::parse(literal);
        assert!(q.matches(literal));
        assert!(!q.matches("/data/barnc"));
    }

    #[test]
    fn invalid_pattern_falls_back_to_literal() {
        let q = PathQuery::parse("/data/[unterminated");
        assert!(q.matches("/data/[unterminated"));
    }
}
