//! Budget stop conditions: approximate token count and wall-clock time.

use std::time::{Duration, Instant};

use super::StopCondition;

/// Characters per estimated token
const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens as characters / 4, rounded up
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}

/// Estimate the tokens added by one streamed delta
///
/// A delta rarely ends on a token boundary, so every non-empty delta carries
/// one partial token on top of its whole ones: `chars / 4 + 1`. This never
/// counts less than [`estimate_tokens`] of the same delta.
#[must_use]
pub fn estimate_delta_tokens(delta: &str) -> u64 {
    match delta.chars().count() {
        0 => 0,
        chars => (chars / CHARS_PER_TOKEN + 1) as u64,
    }
}

/// How the token estimate is maintained
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TokenCountMode {
    /// Add the estimate of each delta to a running total
    #[default]
    Incremental,
    /// Re-estimate the full text on every evaluation
    Recompute,
}

/// Stops once the estimated token count reaches a budget
#[derive(Clone, Debug)]
pub struct TokenCountStop {
    max_tokens: u64,
    mode: TokenCountMode,
    counted: u64,
}

impl TokenCountStop {
    /// Incremental counter with the given budget
    #[must_use]
    pub fn new(max_tokens: u64) -> Self {
        Self {
            max_tokens,
            mode: TokenCountMode::Incremental,
            counted: 0,
        }
    }

    /// Choose the counting mode
    #[must_use]
    pub fn with_mode(mut self, mode: TokenCountMode) -> Self {
        self.mode = mode;
        self
    }

    /// Tokens counted so far
    #[must_use]
    pub fn counted(&self) -> u64 {
        self.counted
    }
}

impl StopCondition for TokenCountStop {
    fn evaluate(&mut self, full_text: &str, delta: Option<&str>) -> bool {
        match (self.mode, delta) {
            (TokenCountMode::Incremental, Some(delta)) => {
                self.counted += estimate_delta_tokens(delta);
            }
            _ => {
                self.counted = self.counted.max(estimate_tokens(full_text));
            }
        }
        self.counted >= self.max_tokens
    }

    fn reset(&mut self) {
        self.counted = 0;
    }

    fn name(&self) -> &'static str {
        "token_count"
    }
}

/// Stops once a wall-clock limit has passed
///
/// The clock starts on the first evaluation, not at construction.
#[derive(Clone, Debug)]
pub struct TimeoutStop {
    limit: Duration,
    started: Option<Instant>,
}

impl TimeoutStop {
    /// Create with the given limit
    #[must_use]
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: None,
        }
    }
}

impl StopCondition for TimeoutStop {
    fn evaluate(&mut self, _full_text: &str, _delta: Option<&str>) -> bool {
        let started = *self.started.get_or_insert_with(Instant::now);
        started.elapsed() >= self.limit
    }

    fn reset(&mut self) {
        self.started = None;
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // Counted in characters, not bytes
        assert_eq!(estimate_tokens("ééééé"), 2);
    }

    #[test]
    fn test_incremental_budget() {
        let mut stop = TokenCountStop::new(5);
        let mut text = String::new();
        let mut triggered_at = None;
        for (call, delta) in ["abcd", "efgh", "ijkl", "mnop"].iter().enumerate() {
            text.push_str(delta);
            if stop.evaluate(&text, Some(delta)) {
                triggered_at = Some(call + 1);
                break;
            }
        }
        // Four 4-character deltas against a budget of 5 must stop by call 4
        assert!(triggered_at.is_some_and(|call| call <= 4), "{triggered_at:?}");
        assert_eq!(triggered_at, Some(3));

        stop.reset();
        assert_eq!(stop.counted(), 0);
        assert!(!stop.evaluate("abcd", Some("abcd")));
    }

    #[test]
    fn test_delta_estimate_never_below_rounded_up() {
        assert_eq!(estimate_delta_tokens(""), 0);
        assert_eq!(estimate_delta_tokens("a"), 1);
        assert_eq!(estimate_delta_tokens("abcd"), 2);
        assert_eq!(estimate_delta_tokens("abcdefg"), 2);
        for text in ["a", "abc", "abcd", "abcde", "ééééé", "abcdefgh"] {
            assert!(estimate_delta_tokens(text) >= estimate_tokens(text), "{text}");
        }
    }

    #[test]
    fn test_incremental_rounds_each_delta() {
        // Five 1-char deltas count one token each
        let mut stop = TokenCountStop::new(5);
        let mut text = String::new();
        let results: Vec<bool> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|d| {
                text.push_str(d);
                stop.evaluate(&text, Some(d))
            })
            .collect();
        assert_eq!(results, vec![false, false, false, false, true]);
    }

    #[test]
    fn test_recompute_mode() {
        let mut stop = TokenCountStop::new(3).with_mode(TokenCountMode::Recompute);
        assert!(!stop.evaluate("12345678", Some("5678")));
        assert!(stop.evaluate("123456789", Some("9")));
    }

    #[test]
    fn test_timeout_origin_is_lazy() {
        let mut stop = TimeoutStop::new(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(30));
        // Clock starts here, not at construction
        assert!(!stop.evaluate("", None));
        std::thread::sleep(Duration::from_millis(30));
        assert!(stop.evaluate("", None));

        stop.reset();
        assert!(!stop.evaluate("", None));
    }
}
