//! Repetition-detecting stop conditions.
//!
//! [`RepetitionStop`] has two deliberately different triggers: a single exact
//! repeat of the newest chunk is enough, while the similarity trigger needs at
//! least three buffered chunks (the newest included) and more than half of
//! that count to be similar to the newest. The window is trimmed before
//! either check runs.

use std::collections::{HashSet, VecDeque};

use super::StopCondition;

/// Default character-set similarity threshold
pub const DEFAULT_SIMILARITY: f64 = 0.8;

/// Buffered chunks, newest included, before the similarity trigger applies
const MIN_SIMILARITY_SAMPLES: usize = 3;

/// Jaccard similarity of the character sets of two strings
///
/// Two empty strings are identical (1.0).
#[must_use]
pub fn char_jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<char> = a.chars().collect();
    let b: HashSet<char> = b.chars().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Stops when the newest chunk repeats recent output
#[derive(Clone, Debug)]
pub struct RepetitionStop {
    window: VecDeque<String>,
    window_chars: usize,
    max_window_chars: usize,
    similarity: f64,
}

impl RepetitionStop {
    /// Keep up to `max_window_chars` characters of recent chunks
    ///
    /// At least one chunk is always retained, however long.
    #[must_use]
    pub fn new(max_window_chars: usize) -> Self {
        Self {
            window: VecDeque::new(),
            window_chars: 0,
            max_window_chars,
            similarity: DEFAULT_SIMILARITY,
        }
    }

    /// Set the similarity threshold (clamped to 0.0..=1.0)
    #[must_use]
    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = similarity.clamp(0.0, 1.0);
        self
    }

    /// Number of buffered chunks
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    /// Compare the newest buffered chunk with the ones before it
    fn is_repeat(&self) -> bool {
        let len = self.window.len();
        let Some(newest) = self.window.back() else {
            return false;
        };
        let earlier = || self.window.range(..len - 1);

        if earlier().any(|chunk| chunk == newest) {
            return true;
        }
        if len < MIN_SIMILARITY_SAMPLES {
            return false;
        }
        let similar = earlier()
            .filter(|chunk| char_jaccard(chunk, newest) >= self.similarity)
            .count();
        similar * 2 > len
    }

    fn push(&mut self, chunk: &str) {
        self.window_chars += chunk.chars().count();
        self.window.push_back(chunk.to_string());
        while self.window_chars > self.max_window_chars && self.window.len() > 1 {
            if let Some(oldest) = self.window.pop_front() {
                self.window_chars -= oldest.chars().count();
            }
        }
    }
}

impl StopCondition for RepetitionStop {
    fn evaluate(&mut self, _full_text: &str, delta: Option<&str>) -> bool {
        let Some(newest) = delta.filter(|d| !d.is_empty()) else {
            return false;
        };
        self.push(newest);
        self.is_repeat()
    }

    fn reset(&mut self) {
        self.window.clear();
        self.window_chars = 0;
    }

    fn name(&self) -> &'static str {
        "repetition"
    }
}

/// Stops once a substring has occurred a configured number of times
#[derive(Clone, Debug)]
pub struct ConsecutivePatternStop {
    pattern: String,
    max_occurrences: usize,
    window: String,
    occurrences: usize,
}

impl ConsecutivePatternStop {
    /// Trigger at `max_occurrences` occurrences of `pattern`
    pub fn new(pattern: impl Into<String>, max_occurrences: usize) -> Self {
        Self {
            pattern: pattern.into(),
            max_occurrences: max_occurrences.max(1),
            window: String::new(),
            occurrences: 0,
        }
    }

    /// Occurrences counted so far
    #[must_use]
    pub fn occurrences(&self) -> usize {
        self.occurrences
    }
}

impl StopCondition for ConsecutivePatternStop {
    fn evaluate(&mut self, full_text: &str, delta: Option<&str>) -> bool {
        if self.pattern.is_empty() {
            return false;
        }
        match delta {
            Some(delta) => self.window.push_str(delta),
            None => {
                self.window.clear();
                self.window.push_str(full_text);
            }
        }
        let seen = self.window.matches(self.pattern.as_str()).count();
        self.occurrences = self.occurrences.max(seen);
        self.occurrences >= self.max_occurrences
    }

    fn reset(&mut self) {
        self.window.clear();
        self.occurrences = 0;
    }

    fn name(&self) -> &'static str {
        "consecutive_pattern"
    }
}
