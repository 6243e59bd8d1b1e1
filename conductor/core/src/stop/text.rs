//! Text-matching stop conditions.

use std::ops::Range;

use regex::{Regex, RegexBuilder};

use super::StopCondition;

/// Which text a matcher looks at
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchScope {
    /// Everything generated so far
    #[default]
    FullText,
    /// Only the newest delta (falls back to the full text when there is none)
    LatestDelta,
}

impl MatchScope {
    fn select<'a>(self, full_text: &'a str, delta: Option<&'a str>) -> &'a str {
        match (self, delta) {
            (Self::LatestDelta, Some(delta)) => delta,
            _ => full_text,
        }
    }
}

/// Stops when a substring appears
#[derive(Clone, Debug)]
pub struct SubstringStop {
    needle: String,
    case_sensitive: bool,
    scope: MatchScope,
}

impl SubstringStop {
    /// Case-sensitive match against the full text
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
            case_sensitive: true,
            scope: MatchScope::FullText,
        }
    }

    /// Toggle case sensitivity
    #[must_use]
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        if !case_sensitive {
            self.needle = self.needle.to_lowercase();
        }
        self
    }

    /// Choose what text to search
    #[must_use]
    pub fn with_scope(mut self, scope: MatchScope) -> Self {
        self.scope = scope;
        self
    }
}

impl StopCondition for SubstringStop {
    fn evaluate(&mut self, full_text: &str, delta: Option<&str>) -> bool {
        if self.needle.is_empty() {
            return false;
        }
        let haystack = self.scope.select(full_text, delta);
        if self.case_sensitive {
            haystack.contains(&self.needle)
        } else {
            haystack.to_lowercase().contains(&self.needle)
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "substring"
    }
}

/// Stops when a regular expression matches
#[derive(Clone, Debug)]
pub struct RegexStop {
    pattern: Regex,
    scope: MatchScope,
}

impl RegexStop {
    /// Compile a case-sensitive pattern matched against the full text
    ///
    /// # Errors
    ///
    /// Returns the compile error for an invalid pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Self::with_options(pattern, true, MatchScope::FullText)
    }

    /// Compile with explicit case sensitivity and scope
    ///
    /// # Errors
    ///
    /// Returns the compile error for an invalid pattern.
    pub fn with_options(
        pattern: &str,
        case_sensitive: bool,
        scope: MatchScope,
    ) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(Self { pattern, scope })
    }

    /// Byte span of the first match, for truncating output at the match
    #[must_use]
    pub fn first_match(&self, text: &str) -> Option<Range<usize>> {
        self.pattern.find(text).map(|m| m.range())
    }
}

impl StopCondition for RegexStop {
    fn evaluate(&mut self, full_text: &str, delta: Option<&str>) -> bool {
        self.pattern.is_match(self.scope.select(full_text, delta))
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "regex"
    }
}
