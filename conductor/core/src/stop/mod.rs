//! Stop-Condition Engine
//!
//! Stateful predicates that can end a stream early based on accumulated
//! output. Each condition is owned by exactly one request; its counters only
//! move forward until [`StopCondition::reset`] restores the initial state.
//!
//! # Built-ins
//!
//! | Condition                 | Triggers when                                            |
//! |---------------------------|----------------------------------------------------------|
//! | [`SubstringStop`]         | a substring appears (case-sensitive or not)              |
//! | [`RegexStop`]             | a pattern matches                                        |
//! | [`TokenCountStop`]        | estimated tokens (~chars / 4 each delta) reach a budget  |
//! | [`TimeoutStop`]           | wall-clock time since the first evaluation runs out      |
//! | [`ConsecutivePatternStop`]| a substring has occurred a configured number of times    |
//! | [`RepetitionStop`]        | the newest chunk repeats or closely resembles recent ones|
//!
//! [`AnyOf`] and [`AllOf`] combine children in declaration order and
//! short-circuit, but always reset every child.
//!
//! # Usage
//!
//! ```
//! use conductor_stream::stop::StopConditionBuilder;
//!
//! let mut condition = StopConditionBuilder::new()
//!     .substring("</answer>")
//!     .max_tokens(512)
//!     .build();
//!
//! assert!(!condition.evaluate("<answer>42", Some("42")));
//! assert!(condition.evaluate("<answer>42</answer>", Some("</answer>")));
//! ```

mod budget;
mod repetition;
mod stream;
mod text;

use std::time::Duration;

pub use budget::{estimate_delta_tokens, estimate_tokens, TimeoutStop, TokenCountMode, TokenCountStop};
pub use repetition::{char_jaccard, ConsecutivePatternStop, RepetitionStop, DEFAULT_SIMILARITY};
pub use stream::with_stop_condition;
pub use text::{MatchScope, RegexStop, SubstringStop};

/// A stateful predicate over generated output
pub trait StopCondition: Send {
    /// Decide whether generation should stop
    ///
    /// `full_text` is everything generated so far, including `delta`.
    fn evaluate(&mut self, full_text: &str, delta: Option<&str>) -> bool;

    /// Restore the initial state
    fn reset(&mut self);

    /// Short name for logging
    fn name(&self) -> &'static str;
}

impl<C: StopCondition + ?Sized> StopCondition for Box<C> {
    fn evaluate(&mut self, full_text: &str, delta: Option<&str>) -> bool {
        (**self).evaluate(full_text, delta)
    }

    fn reset(&mut self) {
        (**self).reset();
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Condition that never triggers
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverStop;

impl StopCondition for NeverStop {
    fn evaluate(&mut self, _full_text: &str, _delta: Option<&str>) -> bool {
        false
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "never"
    }
}

/// Triggers when any child triggers
pub struct AnyOf {
    children: Vec<Box<dyn StopCondition>>,
}

impl AnyOf {
    /// Combine children, evaluated in the given order
    #[must_use]
    pub fn new(children: Vec<Box<dyn StopCondition>>) -> Self {
        Self { children }
    }
}

impl StopCondition for AnyOf {
    fn evaluate(&mut self, full_text: &str, delta: Option<&str>) -> bool {
        for child in &mut self.children {
            if child.evaluate(full_text, delta) {
                tracing::debug!(condition = child.name(), "Stop condition triggered");
                return true;
            }
        }
        false
    }

    fn reset(&mut self) {
        self.children.iter_mut().for_each(|c| c.reset());
    }

    fn name(&self) -> &'static str {
        "any_of"
    }
}

/// Triggers when every child triggers
pub struct AllOf {
    children: Vec<Box<dyn StopCondition>>,
}

impl AllOf {
    /// Combine children, evaluated in the given order
    #[must_use]
    pub fn new(children: Vec<Box<dyn StopCondition>>) -> Self {
        Self { children }
    }
}

impl StopCondition for AllOf {
    fn evaluate(&mut self, full_text: &str, delta: Option<&str>) -> bool {
        if self.children.is_empty() {
            return false;
        }
        for child in &mut self.children {
            if !child.evaluate(full_text, delta) {
                return false;
            }
        }
        true
    }

    fn reset(&mut self) {
        self.children.iter_mut().for_each(|c| c.reset());
    }

    fn name(&self) -> &'static str {
        "all_of"
    }
}

/// Accumulates conditions and collapses them into one
///
/// No children builds [`NeverStop`], one child builds that child, more build
/// an [`AnyOf`].
#[derive(Default)]
pub struct StopConditionBuilder {
    children: Vec<Box<dyn StopCondition>>,
}

impl StopConditionBuilder {
    /// Start with no conditions
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add any condition
    #[must_use]
    pub fn with(mut self, condition: impl StopCondition + 'static) -> Self {
        self.children.push(Box::new(condition));
        self
    }

    /// Stop on a case-sensitive substring anywhere in the output
    #[must_use]
    pub fn substring(self, needle: impl Into<String>) -> Self {
        self.with(SubstringStop::new(needle))
    }

    /// Stop on a regex match anywhere in the output
    ///
    /// # Errors
    ///
    /// Returns the compile error for an invalid pattern.
    pub fn regex(self, pattern: &str) -> Result<Self, regex::Error> {
        Ok(self.with(RegexStop::new(pattern)?))
    }

    /// Stop once the estimated token count reaches `max_tokens`
    #[must_use]
    pub fn max_tokens(self, max_tokens: u64) -> Self {
        self.with(TokenCountStop::new(max_tokens))
    }

    /// Stop once `limit` has elapsed since the first evaluation
    #[must_use]
    pub fn timeout(self, limit: Duration) -> Self {
        self.with(TimeoutStop::new(limit))
    }

    /// Stop when chunks start repeating
    #[must_use]
    pub fn repetition(self, max_window_chars: usize, similarity: f64) -> Self {
        self.with(RepetitionStop::new(max_window_chars).with_similarity(similarity))
    }

    /// Number of conditions added so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether no conditions were added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Collapse into a single condition
    #[must_use]
    pub fn build(mut self) -> Box<dyn StopCondition> {
        match self.children.len() {
            0 => Box::new(NeverStop),
            1 => self.children.remove(0),
            _ => Box::new(AnyOf::new(self.children)),
        }
    }
}
