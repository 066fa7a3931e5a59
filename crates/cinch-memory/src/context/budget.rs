//! Proportional token budgets.
//!
//! A [`ContextBudget`] splits a model's ceiling into named sections (system
//! prompt, persistent memory, archive summary, history, response reserve).
//! It is computed once per session by [`BudgetAllocator::allocate`] and
//! rescaled, not recomputed, when the active model changes so that any
//! hand-tuned section sizes keep their relative weight.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const SECTION_SYSTEM: &str = "system";
pub const SECTION_MEMORY_SUMMARY: &str = "memory_summary";
pub const SECTION_ARCHIVE_SUMMARY: &str = "archive_summary";
pub const SECTION_HISTORY: &str = "history";
pub const SECTION_RESPONSE: &str = "response";

/// Default section proportions. Sum to 1.0.
pub const DEFAULT_PROPORTIONS: &[(&str, f64)] = &[
    (SECTION_SYSTEM, 0.10),
    (SECTION_MEMORY_SUMMARY, 0.10),
    (SECTION_ARCHIVE_SUMMARY, 0.05),
    (SECTION_HISTORY, 0.60),
    (SECTION_RESPONSE, 0.15),
];

/// Floating-point slack when checking that proportions fit in the total.
const PROPORTION_EPSILON: f64 = 1e-9;

/// A token ceiling and its named allocations. `sum(sections) <= total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub total: usize,
    pub sections: BTreeMap<String, usize>,
}

impl ContextBudget {
    /// Tokens allocated to `name`, or 0 for an unknown section.
    pub fn section(&self, name: &str) -> usize {
        self.sections.get(name).copied().unwrap_or(0)
    }

    /// Sum of all section allocations.
    pub fn allocated(&self) -> usize {
        self.sections.values().sum()
    }

    /// Scale every section by `new_total / total`, flooring each result.
    ///
    /// The set of section names is never changed. Rescaling from a zero
    /// total yields zero for every section.
    pub fn rescale(&self, new_total: usize) -> ContextBudget {
        let factor = if self.total == 0 {
            0.0
        } else {
            new_total as f64 / self.total as f64
        };
        let sections = self
            .sections
            .iter()
            .map(|(name, &tokens)| (name.clone(), (tokens as f64 * factor).floor() as usize))
            .collect();
        ContextBudget {
            total: new_total,
            sections,
        }
    }

    /// One line per section, for display.
    pub fn to_table(&self) -> String {
        let width = self.sections.keys().map(String::len).max().unwrap_or(0);
        let mut out = format!("total: {} tokens\n", self.total);
        for (name, tokens) in &self.sections {
            let pct = if self.total > 0 {
                *tokens as f64 / self.total as f64 * 100.0
            } else {
                0.0
            };
            out.push_str(&format!("  {name:<width$}  {tokens:>8}  ({pct:.1}%)\n"));
        }
        out
    }
}

/// Splits a total into named sections by fixed proportions.
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    proportions: Vec<(String, f64)>,
}

impl Default for BudgetAllocator {
    fn default() -> Self {
        Self {
            proportions: DEFAULT_PROPORTIONS
                .iter()
                .map(|(name, p)| (name.to_string(), *p))
                .collect(),
        }
    }
}

impl BudgetAllocator {
    /// Build an allocator from custom proportions.
    ///
    /// Fails if the proportions sum to more than 1.0 or any is negative.
    pub fn new(proportions: Vec<(String, f64)>) -> Result<Self, ConfigError> {
        let sum: f64 = proportions.iter().map(|(_, p)| *p).sum();
        if sum > 1.0 + PROPORTION_EPSILON || proportions.iter().any(|(_, p)| !(*p >= 0.0)) {
            return Err(ConfigError::ProportionsExceedTotal(sum));
        }
        Ok(Self { proportions })
    }

    pub fn proportions(&self) -> &[(String, f64)] {
        &self.proportions
    }

    /// Split `total` by the configured proportions (floored).
    pub fn allocate(&self, total: usize) -> ContextBudget {
        let sections = self
            .proportions
            .iter()
            .map(|(name, p)| (name.clone(), (total as f64 * p).floor() as usize))
            .collect();
        ContextBudget { total, sections }
    }
}
