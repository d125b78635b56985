//! Token usage accounting carried on steps and states.

use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Resource consumption of one step, or the running total on a state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens sent to the model.
    #[serde(default)]
    pub input: u64,

    /// Completion tokens produced by the model.
    #[serde(default)]
    pub output: u64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_read: u64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub cache_write: u64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub reasoning: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl Usage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            ..Self::default()
        }
    }

    /// Total tokens counted against budgets.
    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache_read)
            .saturating_add(self.cache_write)
            .saturating_add(self.reasoning)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Return the sum of `self` and `other`. Saturates instead of overflowing.
    pub fn accumulate(&self, other: &Usage) -> Usage {
        Usage {
            input: self.input.saturating_add(other.input),
            output: self.output.saturating_add(other.output),
            cache_read: self.cache_read.saturating_add(other.cache_read),
            cache_write: self.cache_write.saturating_add(other.cache_write),
            reasoning: self.reasoning.saturating_add(other.reasoning),
        }
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        self.accumulate(&rhs)
    }
}

impl std::iter::Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), |acc, u| acc + u)
    }
}
