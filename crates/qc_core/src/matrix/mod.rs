//! Unit-by-code membership matrices and code cooccurrence.
//!
//! # Responsibility
//! - Expand requested codes into labelled code-sets using the codebook.
//! - Build a boolean membership row per unit instance.
//! - Derive cooccurrence counts (`MᵀM`), conditional probabilities, and
//!   membership-pattern tallies.
//!
//! # Invariants
//! - Count matrices are symmetric; the diagonal is each code-set's number of
//!   occurring units.
//! - A probability row for a code-set that never occurs is all `None`.

use crate::codebook::CodeTree;
use crate::model::annotation::AnnotationRow;
use std::collections::{BTreeMap, BTreeSet};

/// One matrix column: a label and the code names that count as it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSet {
    pub label: String,
    pub members: BTreeSet<String>,
}

impl CodeSet {
    pub fn single(name: impl Into<String>) -> Self {
        let label = name.into();
        Self {
            members: BTreeSet::from([label.clone()]),
            label,
        }
    }
}

/// Expansion flags for code-sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatrixOptions {
    /// Add every descendant of a requested code as its own code-set.
    pub recursive_codes: bool,
    /// Count descendant occurrences toward each code-set.
    pub recursive_counts: bool,
    /// Levels of descendants considered by either flag.
    pub depth: Option<usize>,
}

/// Expands `requested` into code-sets, preserving request order.
///
/// With `recursive_codes`, each requested label is followed by its
/// descendants (sorted, without repeats). With `recursive_counts`, each
/// code-set's members are its label plus every descendant name.
pub fn expand_code_sets(tree: &CodeTree, requested: &[String], options: MatrixOptions) -> Vec<CodeSet> {
    let mut labels: Vec<String> = Vec::new();
    let mut seen = BTreeSet::new();
    for code in requested {
        if seen.insert(code.clone()) {
            labels.push(code.clone());
        }
        if options.recursive_codes {
            for descendant in tree.descendant_names(code, options.depth) {
                if seen.insert(descendant.clone()) {
                    labels.push(descendant);
                }
            }
        }
    }

    labels
        .into_iter()
        .map(|label| {
            let mut set = CodeSet::single(label);
            if options.recursive_counts {
                set.members
                    .extend(tree.descendant_names(&set.label, options.depth));
            }
            set
        })
        .collect()
}

/// Boolean unit × code-set matrix. Units with no membership are omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipMatrix {
    pub labels: Vec<String>,
    pub units: Vec<String>,
    pub rows: Vec<Vec<bool>>,
}

impl MembershipMatrix {
    /// Builds one row per distinct unit key found in `rows`.
    pub fn build(rows: &[AnnotationRow], code_sets: &[CodeSet]) -> Self {
        let mut codes_by_unit: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        for row in rows {
            codes_by_unit
                .entry(row.unit_key())
                .or_default()
                .insert(row.code.as_str());
        }

        let mut units = Vec::new();
        let mut matrix = Vec::new();
        for (unit, codes) in codes_by_unit {
            let membership: Vec<bool> = code_sets
                .iter()
                .map(|set| codes.iter().any(|code| set.members.contains(*code)))
                .collect();
            if membership.iter().any(|present| *present) {
                units.push(unit);
                matrix.push(membership);
            }
        }
        Self {
            labels: code_sets.iter().map(|set| set.label.clone()).collect(),
            units,
            rows: matrix,
        }
    }
}

/// Square code-set cooccurrence counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cooccurrence {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<u64>>,
}

impl Cooccurrence {
    /// `MᵀM` over a membership matrix.
    pub fn from_matrix(matrix: &MembershipMatrix) -> Self {
        let width = matrix.labels.len();
        let mut counts = vec![vec![0_u64; width]; width];
        for row in &matrix.rows {
            let present: Vec<usize> = row
                .iter()
                .enumerate()
                .filter(|(_, value)| **value)
                .map(|(index, _)| index)
                .collect();
            for &i in &present {
                for &j in &present {
                    counts[i][j] += 1;
                }
            }
        }
        Self {
            labels: matrix.labels.clone(),
            counts,
        }
    }

    /// Units where code-set `i` occurs.
    pub fn occurrences(&self, i: usize) -> u64 {
        self.counts[i][i]
    }

    /// Row-normalized counts: `P(j | i) = count(i ∧ j) / count(i)`.
    pub fn probabilities(&self) -> Vec<Vec<Option<f64>>> {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let total = self.occurrences(i);
                row.iter()
                    .map(|count| (total > 0).then(|| *count as f64 / total as f64))
                    .collect()
            })
            .collect()
    }
}

/// One distinct membership pattern and how many units show it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternCount {
    /// Labels present in the pattern, in label order.
    pub codes: Vec<String>,
    pub count: u64,
}

/// Tallies distinct membership patterns, most frequent first.
///
/// Patterns whose count falls outside `[min, max]` are dropped.
pub fn tidy_counts(matrix: &MembershipMatrix, min: Option<u64>, max: Option<u64>) -> Vec<PatternCount> {
    let mut tally: BTreeMap<&[bool], u64> = BTreeMap::new();
    for row in &matrix.rows {
        *tally.entry(row.as_slice()).or_default() += 1;
    }

    let mut patterns: Vec<PatternCount> = tally
        .into_iter()
        .filter(|(_, count)| min.map_or(true, |min| *count >= min))
        .filter(|(_, count)| max.map_or(true, |max| *count <= max))
        .map(|(pattern, count)| PatternCount {
            codes: pattern
                .iter()
                .zip(&matrix.labels)
                .filter(|(present, _)| **present)
                .map(|(_, label)| label.clone())
                .collect(),
            count,
        })
        .collect();
    patterns.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.codes.cmp(&b.codes)));
    patterns
}
