//! Read-only reports over a session: code stats, crosstabs, and coded text.
//!
//! # Responsibility
//! - Join stored counts with the codebook hierarchy.
//! - Feed annotation rows into the matrix engine.
//! - Cut excerpts of coded units out of corpus files.

use crate::codebook::NodeId;
use crate::matrix::{
    expand_code_sets, tidy_counts, Cooccurrence, MatrixOptions, MembershipMatrix, PatternCount,
};
use crate::model::annotation::Unit;
use crate::model::annotation::UnitSpan;
use crate::repo::{AnnotationFilter, DocumentFilter};
use crate::service::corpus_service::Session;
use crate::service::error::CorpusResult;
use std::collections::{BTreeMap, BTreeSet};

/// Parameters for `Session::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsQuery {
    /// Codes to report; empty means every code in the codebook.
    pub codes: Vec<String>,
    pub unit: Unit,
    /// Coder and document selection. `filter.codes` is ignored.
    pub filter: AnnotationFilter,
    /// Also report the descendants of each requested code.
    pub recursive_codes: bool,
    pub depth: Option<usize>,
    /// Inclusive bounds on the hierarchical total.
    pub min: Option<u64>,
    pub max: Option<u64>,
    /// Keep codes that were never applied directly.
    pub zeros: bool,
    /// Name rows by their full `parent:child` path.
    pub expanded: bool,
    /// Report `total` alongside `count`.
    pub recursive_counts: bool,
    /// One group of rows per coder.
    pub by_coder: bool,
    /// One group of rows per document.
    pub by_document: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRow {
    /// Set when grouping by coder.
    pub coder: Option<String>,
    /// Set when grouping by document.
    pub document: Option<String>,
    pub name: String,
    pub expanded_name: String,
    /// Units carrying this code directly.
    pub count: u64,
    /// `count` plus the totals of all children, with `recursive_counts`.
    pub total: Option<u64>,
}

/// Parameters for `Session::find_coded_text`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindQuery {
    pub codes: Vec<String>,
    pub unit: Unit,
    /// Coder and document selection. `filter.codes` is ignored.
    pub filter: AnnotationFilter,
    /// Also find the descendants of each requested code.
    pub recursive_codes: bool,
    pub depth: Option<usize>,
    /// Context lines around each coded line (line unit only).
    pub before: usize,
    pub after: usize,
}

/// One corpus line inside an excerpt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcerptLine {
    pub number: i64,
    pub text: String,
    pub codes: BTreeSet<String>,
}

/// A contiguous run of lines `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    pub start: i64,
    pub end: i64,
    pub lines: Vec<ExcerptLine>,
}

/// Excerpts of one document, in line order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedText {
    pub document: String,
    /// Matching (code, unit) pairs in the document.
    pub count: usize,
    pub excerpts: Vec<Excerpt>,
}

/// Parameters for `Session::crosstab`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrosstabQuery {
    /// Codes to cross; empty means every code in the codebook.
    pub codes: Vec<String>,
    pub unit: Unit,
    pub filter: AnnotationFilter,
    pub options: MatrixOptions,
    pub expanded: bool,
    /// Report `P(column | row)` instead of counts.
    pub probs: bool,
    /// Tally membership patterns instead of pairs.
    pub tidy: bool,
    /// Inclusive bounds on pattern counts in tidy mode.
    pub min: Option<u64>,
    pub max: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrosstabValues {
    Counts(Vec<Vec<u64>>),
    Probabilities(Vec<Vec<Option<f64>>>),
    Patterns(Vec<PatternCount>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Crosstab {
    pub labels: Vec<String>,
    pub values: CrosstabValues,
}

impl Session<'_> {
    /// Per-code counts with hierarchical totals, sorted by expanded name.
    ///
    /// Grouped rows come coder-major, then document, then code.
    pub fn stats(&self, query: &StatsQuery) -> CorpusResult<Vec<StatsRow>> {
        let coders: Vec<Option<String>> = if query.by_coder {
            let coders = match &query.filter.coders {
                Some(coders) => coders.clone(),
                None => self.list_coders()?,
            };
            coders.into_iter().map(Some).collect()
        } else {
            vec![None]
        };
        let documents: Vec<Option<String>> = if query.by_document {
            self.list_documents(&query.filter.documents)?
                .into_iter()
                .map(|document| Some(document.file_path))
                .collect()
        } else {
            vec![None]
        };

        let mut rows = Vec::new();
        for coder in &coders {
            for document in &documents {
                let mut filter = AnnotationFilter {
                    codes: None,
                    ..query.filter.clone()
                };
                if let Some(coder) = coder {
                    filter.coders = Some(vec![coder.clone()]);
                }
                if let Some(document) = document {
                    filter.documents = DocumentFilter::files([document.clone()]);
                }
                let group = self.group_stats(query, &filter)?;
                rows.extend(group.into_iter().map(|row| StatsRow {
                    coder: coder.clone(),
                    document: document.clone(),
                    ..row
                }));
            }
        }
        Ok(rows)
    }

    fn group_stats(
        &self,
        query: &StatsQuery,
        filter: &AnnotationFilter,
    ) -> CorpusResult<Vec<StatsRow>> {
        let counts = self.count_codes(query.unit, filter)?;
        let mut tree = self.codebook().clone();
        tree.aggregate_counts(&counts);

        let nodes: Vec<NodeId> = if query.codes.is_empty() {
            tree.flatten(query.depth)
        } else {
            let mut selected = BTreeSet::new();
            for code in &query.codes {
                for id in tree.find(code) {
                    if query.recursive_codes {
                        selected.extend(tree.flatten_from(id, query.depth));
                    } else {
                        selected.insert(id);
                    }
                }
            }
            selected.into_iter().collect()
        };

        let mut rows: Vec<StatsRow> = nodes
            .into_iter()
            .filter(|id| query.max.map_or(true, |max| tree.total(*id) <= max))
            .filter(|id| query.min.map_or(true, |min| tree.total(*id) >= min))
            .filter(|id| query.zeros || tree.count(*id) > 0)
            .map(|id| StatsRow {
                coder: None,
                document: None,
                name: tree.display_name(id, query.expanded),
                expanded_name: tree.expanded_name(id),
                count: tree.count(id),
                total: query.recursive_counts.then(|| tree.total(id)),
            })
            .collect();
        rows.sort_by(|a, b| a.expanded_name.cmp(&b.expanded_name));
        rows.dedup_by(|a, b| a.expanded_name == b.expanded_name);
        Ok(rows)
    }

    /// Cooccurrence of code-sets across units.
    pub fn crosstab(&self, query: &CrosstabQuery) -> CorpusResult<Crosstab> {
        let tree = self.codebook();
        let requested = if query.codes.is_empty() {
            let mut seen = BTreeSet::new();
            let mut names: Vec<String> = tree
                .flatten_names(query.options.depth, false)
                .into_iter()
                .filter(|name| seen.insert(name.clone()))
                .collect();
            if names.is_empty() {
                names = self.list_codes()?;
            }
            names
        } else {
            query.codes.clone()
        };

        let code_sets = expand_code_sets(tree, &requested, query.options);
        let members: BTreeSet<String> = code_sets
            .iter()
            .flat_map(|set| set.members.iter().cloned())
            .collect();
        let filter = AnnotationFilter {
            codes: Some(members.into_iter().collect()),
            ..query.filter.clone()
        };
        let rows = self.annotations(query.unit, &filter)?;
        let mut matrix = MembershipMatrix::build(&rows, &code_sets);
        if query.expanded {
            matrix.labels = matrix
                .labels
                .iter()
                .map(|label| {
                    tree.find(label)
                        .first()
                        .map(|id| tree.expanded_name(*id))
                        .unwrap_or_else(|| label.clone())
                })
                .collect();
        }

        let values = if query.tidy {
            CrosstabValues::Patterns(tidy_counts(&matrix, query.min, query.max))
        } else {
            let cooccurrence = Cooccurrence::from_matrix(&matrix);
            if query.probs {
                CrosstabValues::Probabilities(cooccurrence.probabilities())
            } else {
                CrosstabValues::Counts(cooccurrence.counts)
            }
        };
        Ok(Crosstab {
            labels: matrix.labels,
            values,
        })
    }

    /// Coded units of the requested codes with their text, per document.
    ///
    /// Line context windows that touch or overlap are merged. Paragraph and
    /// document units yield one excerpt each, with codes on its first line.
    pub fn find_coded_text(&self, query: &FindQuery) -> CorpusResult<Vec<CodedText>> {
        let tree = self.codebook();
        let mut codes: BTreeSet<String> = query.codes.iter().cloned().collect();
        if query.recursive_codes {
            for code in &query.codes {
                codes.extend(tree.descendant_names(code, query.depth));
            }
        }
        let filter = AnnotationFilter {
            codes: Some(codes.into_iter().collect()),
            ..query.filter.clone()
        };

        let mut by_document: BTreeMap<String, BTreeMap<UnitSpan, BTreeSet<String>>> =
            BTreeMap::new();
        for row in self.annotations(query.unit, &filter)? {
            by_document
                .entry(row.document)
                .or_default()
                .entry(row.span)
                .or_default()
                .insert(row.code);
        }

        let mut found = Vec::with_capacity(by_document.len());
        for (document, spans) in by_document {
            let text = self.read_corpus_file(&document)?;
            let lines: Vec<&str> = text.lines().collect();
            let count = spans.values().map(BTreeSet::len).sum();
            let excerpts = match query.unit {
                Unit::Line => line_excerpts(&lines, &spans, query.before, query.after),
                Unit::Paragraph | Unit::Document => spans
                    .iter()
                    .map(|(span, codes)| {
                        let (start, end) = match span {
                            UnitSpan::Paragraph {
                                start_line,
                                end_line,
                                ..
                            } => (*start_line, *end_line),
                            _ => (0, lines.len() as i64),
                        };
                        let mut excerpt = excerpt(&lines, start, end);
                        if let Some(first) = excerpt.lines.first_mut() {
                            first.codes = codes.clone();
                        }
                        excerpt
                    })
                    .collect(),
            };
            found.push(CodedText {
                document,
                count,
                excerpts,
            });
        }
        Ok(found)
    }
}

fn line_excerpts(
    lines: &[&str],
    spans: &BTreeMap<UnitSpan, BTreeSet<String>>,
    before: usize,
    after: usize,
) -> Vec<Excerpt> {
    let coded: BTreeMap<i64, &BTreeSet<String>> = spans
        .iter()
        .filter_map(|(span, codes)| match span {
            UnitSpan::Line(line) => Some((*line, codes)),
            _ => None,
        })
        .collect();
    let ranges = coded
        .keys()
        .map(|line| (line - before as i64, line + after as i64 + 1));
    merge_ranges(ranges, 0, lines.len() as i64)
        .into_iter()
        .map(|(start, end)| {
            let mut excerpt = excerpt(lines, start, end);
            for line in &mut excerpt.lines {
                if let Some(codes) = coded.get(&line.number) {
                    line.codes = (*codes).clone();
                }
            }
            excerpt
        })
        .collect()
}

/// Sorts, merges touching or overlapping `[start, end)` ranges, then clamps.
fn merge_ranges(ranges: impl Iterator<Item = (i64, i64)>, low: i64, high: i64) -> Vec<(i64, i64)> {
    let mut sorted: Vec<(i64, i64)> = ranges.collect();
    sorted.sort_unstable();
    let mut merged: Vec<(i64, i64)> = Vec::new();
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
        .into_iter()
        .map(|(start, end)| (start.max(low), end.min(high)))
        .filter(|(start, end)| start < end)
        .collect()
}

fn excerpt(lines: &[&str], start: i64, end: i64) -> Excerpt {
    let start = start.clamp(0, lines.len() as i64);
    let end = end.clamp(start, lines.len() as i64);
    Excerpt {
        start,
        end,
        lines: (start..end)
            .map(|number| ExcerptLine {
                number,
                text: lines[number as usize].to_string(),
                codes: BTreeSet::new(),
            })
            .collect(),
    }
}
