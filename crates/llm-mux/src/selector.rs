//! Round-robin selection over multi-valued configuration.
//!
//! API keys and base URLs accept comma-separated lists. A [`Selector`]
//! shuffles the parsed values once at construction and then hands them
//! out in that order, wrapping around forever. This spreads load across
//! keys and regions without any coordination between callers.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;

/// A concurrency-safe, shuffle-once, round-robin value picker.
///
/// ```rust
/// use llm_mux::Selector;
///
/// let keys = Selector::parse("sk-a, sk-b, sk-c");
/// assert_eq!(keys.len(), 3);
/// let first = keys.next().to_owned();
/// assert!(["sk-a", "sk-b", "sk-c"].contains(&first.as_str()));
/// ```
pub struct Selector {
    values: Vec<String>,
    cursor: AtomicUsize,
}

impl Selector {
    /// Builds a selector from pre-split values, shuffling them once.
    pub fn new(mut values: Vec<String>) -> Self {
        values.shuffle(&mut rand::rng());
        Self {
            values,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Parses a comma-separated list, trimming whitespace and dropping
    /// empty entries, then builds a selector over the result.
    pub fn parse(raw: &str) -> Self {
        let values = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        Self::new(values)
    }

    /// Returns the next value in shuffled order.
    ///
    /// Returns `""` forever when no values were configured. Safe to call
    /// from multiple tasks at once.
    pub fn next(&self) -> &str {
        match self.values.len() {
            0 => "",
            1 => &self.values[0],
            n => {
                let i = self.cursor.fetch_add(1, Ordering::Relaxed);
                &self.values[i % n]
            }
        }
    }

    /// Number of configured values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no values were configured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// Values are often API keys; Debug only exposes the count.
impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("len", &self.values.len())
            .finish_non_exhaustive()
    }
}
