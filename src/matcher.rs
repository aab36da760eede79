//! Segment matching
//!
//! Every locator segment is matched the same way: `*` matches everything,
//! anything else is a regular expression searched (not anchored) in each
//! candidate, so `inst` matches `instance`.

use regex::Regex;

/// A compiled segment pattern
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: String,
    regex: Regex,
}

impl Matcher {
    pub fn new(pattern: &str) -> Self {
        let source = if pattern == "*" { ".*" } else { pattern };
        let regex = Regex::new(source).unwrap_or_else(|e| {
            tracing::debug!(
                "pattern '{}' is not a valid regex ({}), matching literally",
                pattern,
                e
            );
            Regex::new(&regex::escape(pattern)).expect("escaped pattern is a valid regex")
        });

        Self {
            pattern: pattern.to_string(),
            regex,
        }
    }

    /// The pattern as written in the locator
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    /// Filter `choices` down to the matching ones, preserving their order
    pub fn matches<I, S>(&self, choices: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        choices
            .into_iter()
            .filter(|c| self.is_match(c.as_ref()))
            .map(|c| c.as_ref().to_string())
            .collect()
    }
}

/// Choices starting with `prefix`, for interactive completion
pub fn complete<I, S>(choices: I, prefix: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    choices
        .into_iter()
        .filter(|c| c.as_ref().starts_with(prefix))
        .map(|c| c.as_ref().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHOICES: [&str; 4] = ["foo", "bar", "fie", "baz"];

    #[test]
    fn test_explicit() {
        assert_eq!(Matcher::new("fie").matches(CHOICES), vec!["fie"]);
    }

    #[test]
    fn test_regex_pattern() {
        assert_eq!(Matcher::new("ba.*").matches(CHOICES), vec!["bar", "baz"]);
        assert_eq!(Matcher::new("f.*").matches(CHOICES), vec!["foo", "fie"]);
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(Matcher::new("*").matches(CHOICES), CHOICES.to_vec());
    }

    #[test]
    fn test_no_match() {
        assert!(Matcher::new("nomatch").matches(CHOICES).is_empty());
    }

    #[test]
    fn test_substring_search() {
        let m = Matcher::new("inst");
        assert!(m.is_match("instance"));
        assert!(m.is_match("dbinstance"));
        assert!(!m.is_match("volume"));
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        assert_eq!(Matcher::new("").matches(["", "us-east-1"]).len(), 2);
    }

    #[test]
    fn test_invalid_regex_is_literal() {
        let m = Matcher::new("log(group");
        assert!(m.is_match("log(group"));
        assert!(!m.is_match("loggroup"));
        assert_eq!(m.pattern(), "log(group");
    }

    #[test]
    fn test_complete() {
        assert_eq!(complete(CHOICES, "b"), vec!["bar", "baz"]);
        assert!(complete(CHOICES, "x").is_empty());
    }
}
