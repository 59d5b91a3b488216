//! Hierarchical codebook (taxonomy of code names).
//!
//! # Responsibility
//! - Hold the codebook as an ordered forest under an implicit root.
//! - Provide search, flattening, rename/merge, and count aggregation.
//! - Parse and persist the YAML representation (see [`yaml`]).
//!
//! # Invariants
//! - Node identity (`NodeId`) is distinct from the display name; the same
//!   name may appear at several positions.
//! - Counting is by name: every node named `x` receives `direct_counts[x]`,
//!   whatever its position. Per-position counting would be a behavior change.
//! - Only nodes reachable from the root are part of the tree; removed nodes
//!   stay in the arena but are never visited.

pub mod yaml;

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub use yaml::{parse, read_codebook, serialize, write_codebook};

/// Separator used by expanded names (`parent:child:grandchild`).
pub const EXPANDED_NAME_SEPARATOR: &str = ":";

const OUTLINE_INDENT: &str = "    ";
const OUTLINE_MARKER: &str = "- ";

pub type CodebookResult<T> = Result<T, CodebookError>;

/// Codebook parse and persistence errors.
#[derive(Debug)]
pub enum CodebookError {
    /// YAML is well-formed but not a codebook shape.
    Parse(String),
    /// YAML syntax or emitter failure.
    Yaml(serde_yaml::Error),
    /// Codebook file cannot be read or written.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for CodebookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid codebook: {message}"),
            Self::Yaml(err) => write!(f, "invalid codebook yaml: {err}"),
            Self::Io { path, source } => {
                write!(f, "codebook file `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for CodebookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(_) => None,
            Self::Yaml(err) => Some(err),
            Self::Io { source, .. } => Some(source),
        }
    }
}

impl From<serde_yaml::Error> for CodebookError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

/// Arena index of one tree position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct NodeData {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    count: u64,
    total: u64,
}

impl NodeData {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            count: 0,
            total: 0,
        }
    }
}

/// Codebook forest under an implicit root.
#[derive(Debug, Clone)]
pub struct CodeTree {
    nodes: Vec<NodeData>,
}

impl Default for CodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeTree {
    const ROOT: NodeId = NodeId(0);

    /// Creates an empty codebook.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData::new(String::new(), None)],
        }
    }

    /// The implicit root. It has no name and is never returned by searches.
    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        id == Self::ROOT
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[Self::ROOT.0].children.is_empty()
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Parent position; top-level nodes return the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Direct count assigned by the last [`CodeTree::aggregate_counts`].
    pub fn count(&self, id: NodeId) -> u64 {
        self.nodes[id.0].count
    }

    /// `count` plus the totals of all children.
    pub fn total(&self, id: NodeId) -> u64 {
        self.nodes[id.0].total
    }

    /// Appends a new child named `name` under `parent`.
    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData::new(name.into(), Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Appends a new top-level code.
    pub fn add_code(&mut self, name: impl Into<String>) -> NodeId {
        self.add_child(Self::ROOT, name)
    }

    /// Number of ancestors between `id` and the root, counting `id` itself.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = id;
        while let Some(parent) = self.nodes[cursor.0].parent {
            depth += 1;
            cursor = parent;
        }
        depth
    }

    /// Renders `grandparent:parent:name`.
    pub fn expanded_name(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if self.is_root(current) {
                break;
            }
            parts.push(self.nodes[current.0].name.as_str());
            cursor = self.nodes[current.0].parent;
        }
        parts.reverse();
        parts.join(EXPANDED_NAME_SEPARATOR)
    }

    /// Every reachable position whose name is `name`, in pre-order.
    pub fn find(&self, name: &str) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.nodes[id.0].name == name)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.preorder()
            .into_iter()
            .any(|id| self.nodes[id.0].name == name)
    }

    /// Distinct names of every reachable node.
    pub fn names(&self) -> BTreeSet<String> {
        self.preorder()
            .into_iter()
            .map(|id| self.nodes[id.0].name.clone())
            .collect()
    }

    /// All codes below the root, depth-first, sorted by expanded name.
    ///
    /// `depth` bounds how many levels are visited (`Some(1)` = top level).
    pub fn flatten(&self, depth: Option<usize>) -> Vec<NodeId> {
        self.flatten_from(Self::ROOT, depth)
    }

    /// `id` (unless it is the root) plus its descendants, sorted by expanded
    /// name. `depth` bounds recursion below `id`.
    pub fn flatten_from(&self, id: NodeId, depth: Option<usize>) -> Vec<NodeId> {
        let mut collected = Vec::new();
        if self.is_root(id) {
            let child_depth = depth.map(|value| value.saturating_sub(1));
            if depth != Some(0) {
                for child in &self.nodes[id.0].children {
                    self.collect_subtree(*child, child_depth, &mut collected);
                }
            }
        } else {
            self.collect_subtree(id, depth, &mut collected);
        }
        self.sort_by_expanded_name(collected)
    }

    /// Flattened names, optionally in expanded form.
    pub fn flatten_names(&self, depth: Option<usize>, expanded: bool) -> Vec<String> {
        self.flatten(depth)
            .into_iter()
            .map(|id| self.display_name(id, expanded))
            .collect()
    }

    /// Plain or expanded name of `id`.
    pub fn display_name(&self, id: NodeId, expanded: bool) -> String {
        if expanded {
            self.expanded_name(id)
        } else {
            self.nodes[id.0].name.clone()
        }
    }

    /// Names of every descendant of every position named `name`, bounded by
    /// `depth` levels below each match. `name` itself is not included.
    pub fn descendant_names(&self, name: &str, depth: Option<usize>) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for id in self.find(name) {
            for descendant in self.flatten_from(id, depth) {
                if descendant != id {
                    names.insert(self.nodes[descendant.0].name.clone());
                }
            }
        }
        names
    }

    /// Renames every node called `old` to `new`, at every position.
    ///
    /// Returns the number of renamed positions.
    pub fn rename(&mut self, old: &str, new: &str) -> usize {
        let mut renamed = 0;
        for id in self.preorder() {
            if self.nodes[id.0].name == old {
                self.nodes[id.0].name = new.to_string();
                renamed += 1;
            }
        }
        renamed
    }

    /// Removes every node called `name`; its children move up into the
    /// removed node's parent, after that parent's remaining children.
    ///
    /// Returns the number of removed positions.
    pub fn remove_children_by_name(&mut self, name: &str) -> usize {
        self.remove_named_below(Self::ROOT, name)
    }

    /// Collapses siblings called `name` into the first of them, which adopts
    /// the others' children. Children that become same-named siblings in
    /// turn are merged as well.
    ///
    /// Returns the number of merged-away positions.
    pub fn merge_siblings_named(&mut self, name: &str) -> usize {
        let parents: Vec<NodeId> = std::iter::once(Self::ROOT).chain(self.preorder()).collect();
        parents
            .into_iter()
            .map(|parent| self.merge_children_named(parent, name))
            .sum()
    }

    /// Post-order count aggregation keyed by name.
    pub fn aggregate_counts(&mut self, direct_counts: &BTreeMap<String, u64>) {
        self.aggregate_below(Self::ROOT, direct_counts);
    }

    /// Indented `- name` outline, children sorted; `max_depth` limits levels.
    pub fn render_outline(&self, max_depth: Option<usize>) -> String {
        let mut out = String::new();
        if max_depth == Some(0) {
            return out;
        }
        for child in self.sorted_children(Self::ROOT) {
            self.render_node(child, 0, max_depth.map(|value| value - 1), &mut out);
        }
        out
    }

    pub(crate) fn sorted_children(&self, id: NodeId) -> Vec<NodeId> {
        self.sort_by_expanded_name(self.nodes[id.0].children.clone())
    }

    fn render_node(&self, id: NodeId, level: usize, max_depth: Option<usize>, out: &mut String) {
        out.push_str(&OUTLINE_INDENT.repeat(level));
        out.push_str(OUTLINE_MARKER);
        out.push_str(&self.nodes[id.0].name);
        out.push('\n');
        if max_depth.map_or(true, |limit| level < limit) {
            for child in self.sorted_children(id) {
                self.render_node(child, level + 1, max_depth, out);
            }
        }
    }

    fn collect_subtree(&self, id: NodeId, depth: Option<usize>, out: &mut Vec<NodeId>) {
        out.push(id);
        if depth == Some(0) {
            return;
        }
        let child_depth = depth.map(|value| value - 1);
        for child in &self.nodes[id.0].children {
            self.collect_subtree(*child, child_depth, out);
        }
    }

    fn sort_by_expanded_name(&self, ids: Vec<NodeId>) -> Vec<NodeId> {
        let mut keyed: Vec<(String, NodeId)> = ids
            .into_iter()
            .map(|id| (self.expanded_name(id), id))
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[Self::ROOT.0]
            .children
            .iter()
            .rev()
            .copied()
            .collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    fn remove_named_below(&mut self, parent: NodeId, name: &str) -> usize {
        let children = self.nodes[parent.0].children.clone();
        let mut kept = Vec::with_capacity(children.len());
        let mut promoted = Vec::new();
        let mut removed = 0;
        for child in children {
            removed += self.remove_named_below(child, name);
            if self.nodes[child.0].name == name {
                let grandchildren = std::mem::take(&mut self.nodes[child.0].children);
                for grandchild in &grandchildren {
                    self.nodes[grandchild.0].parent = Some(parent);
                }
                promoted.extend(grandchildren);
                self.nodes[child.0].parent = None;
                removed += 1;
            } else {
                kept.push(child);
            }
        }
        kept.extend(promoted);
        self.nodes[parent.0].children = kept;
        removed
    }

    fn merge_children_named(&mut self, parent: NodeId, name: &str) -> usize {
        let children = self.nodes[parent.0].children.clone();
        let mut kept = Vec::with_capacity(children.len());
        let mut keeper: Option<NodeId> = None;
        let mut merged = 0;
        for child in children {
            if self.nodes[child.0].name != name {
                kept.push(child);
                continue;
            }
            let Some(target) = keeper else {
                keeper = Some(child);
                kept.push(child);
                continue;
            };
            let adopted = std::mem::take(&mut self.nodes[child.0].children);
            for id in &adopted {
                self.nodes[id.0].parent = Some(target);
            }
            self.nodes[target.0].children.extend(adopted);
            self.nodes[child.0].parent = None;
            merged += 1;
        }
        self.nodes[parent.0].children = kept;

        if let Some(target) = keeper.filter(|_| merged > 0) {
            let child_names: BTreeSet<String> = self.nodes[target.0]
                .children
                .iter()
                .map(|id| self.nodes[id.0].name.clone())
                .collect();
            for child_name in child_names {
                merged += self.merge_children_named(target, &child_name);
            }
        }
        merged
    }

    fn aggregate_below(&mut self, id: NodeId, direct_counts: &BTreeMap<String, u64>) -> u64 {
        let children = self.nodes[id.0].children.clone();
        let children_total: u64 = children
            .into_iter()
            .map(|child| self.aggregate_below(child, direct_counts))
            .sum();
        let count = if self.is_root(id) {
            0
        } else {
            direct_counts
                .get(&self.nodes[id.0].name)
                .copied()
                .unwrap_or(0)
        };
        let node = &mut self.nodes[id.0];
        node.count = count;
        node.total = count + children_total;
        node.total
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, CodeTree};
    use std::collections::BTreeMap;

    fn fruit_tree() -> CodeTree {
        parse("- fruit:\n  - apple\n  - pear\n- vegetable:\n  - kale\n  - pear\n").unwrap()
    }

    #[test]
    fn find_returns_every_position_with_the_name() {
        let tree = fruit_tree();
        let pears = tree.find("pear");
        assert_eq!(pears.len(), 2);
        let expanded: Vec<String> = pears.iter().map(|id| tree.expanded_name(*id)).collect();
        assert_eq!(expanded, vec!["fruit:pear", "vegetable:pear"]);
    }

    #[test]
    fn flatten_sorts_by_expanded_name_and_honors_depth() {
        let tree = fruit_tree();
        assert_eq!(
            tree.flatten_names(None, true),
            vec![
                "fruit",
                "fruit:apple",
                "fruit:pear",
                "vegetable",
                "vegetable:kale",
                "vegetable:pear"
            ]
        );
        assert_eq!(tree.flatten_names(Some(1), false), vec!["fruit", "vegetable"]);
        let fruit = tree.find("fruit")[0];
        assert_eq!(tree.flatten_from(fruit, Some(0)), vec![fruit]);
    }

    #[test]
    fn aggregate_counts_sums_children_by_name() {
        let mut tree = parse("- fruit:\n  - apple\n  - pear\n").unwrap();
        let counts = BTreeMap::from([
            ("apple".to_string(), 3),
            ("pear".to_string(), 2),
            ("fruit".to_string(), 0),
        ]);
        tree.aggregate_counts(&counts);
        let fruit = tree.find("fruit")[0];
        assert_eq!(tree.count(fruit), 0);
        assert_eq!(tree.total(fruit), 5);
    }

    #[test]
    fn repeated_names_share_the_same_direct_count() {
        let mut tree = fruit_tree();
        let counts = BTreeMap::from([("pear".to_string(), 4), ("kale".to_string(), 1)]);
        tree.aggregate_counts(&counts);
        for pear in tree.find("pear") {
            assert_eq!(tree.count(pear), 4);
        }
        assert_eq!(tree.total(tree.find("vegetable")[0]), 5);
        assert_eq!(tree.total(tree.find("fruit")[0]), 4);
        assert_eq!(tree.total(tree.root()), 9);
    }

    #[test]
    fn rename_touches_every_position() {
        let mut tree = fruit_tree();
        assert_eq!(tree.rename("pear", "quince"), 2);
        assert!(tree.find("pear").is_empty());
        assert_eq!(tree.find("quince").len(), 2);
    }

    #[test]
    fn rename_into_a_name_under_another_parent_keeps_both_positions() {
        let mut tree = parse("- fruit:\n  - a\n- veg:\n  - b\n").unwrap();
        assert_eq!(tree.rename("a", "b"), 1);
        assert_eq!(tree.merge_siblings_named("b"), 0);
        assert_eq!(
            tree.flatten_names(None, true),
            vec!["fruit", "fruit:b", "veg", "veg:b"]
        );
    }

    #[test]
    fn merging_siblings_adopts_children_recursively() {
        let mut tree = parse("- a:\n  - x:\n    - p\n- b:\n  - x:\n    - q\n  - y\n").unwrap();
        tree.rename("a", "b");
        assert_eq!(tree.merge_siblings_named("b"), 2);
        assert_eq!(
            tree.flatten_names(None, true),
            vec!["b", "b:x", "b:x:p", "b:x:q", "b:y"]
        );
        let q = tree.find("q")[0];
        assert_eq!(tree.parent(q), Some(tree.find("x")[0]));
    }

    #[test]
    fn remove_children_by_name_promotes_grandchildren() {
        let mut tree = parse("- a:\n  - b:\n    - c\n    - d\n  - e\n").unwrap();
        assert_eq!(tree.remove_children_by_name("b"), 1);
        assert!(!tree.contains("b"));
        assert_eq!(tree.flatten_names(None, true), vec!["a", "a:c", "a:d", "a:e"]);
        let c = tree.find("c")[0];
        assert_eq!(tree.parent(c), Some(tree.find("a")[0]));
    }

    #[test]
    fn descendant_names_union_all_positions() {
        let tree = parse("- x:\n  - y:\n    - z\n- w:\n  - x:\n    - q\n").unwrap();
        let names: Vec<String> = tree.descendant_names("x", None).into_iter().collect();
        assert_eq!(names, vec!["q", "y", "z"]);
        let shallow: Vec<String> = tree.descendant_names("x", Some(1)).into_iter().collect();
        assert_eq!(shallow, vec!["q", "y"]);
    }

    #[test]
    fn render_outline_indents_and_limits_depth() {
        let tree = fruit_tree();
        assert_eq!(
            tree.render_outline(None),
            "- fruit\n    - apple\n    - pear\n- vegetable\n    - kale\n    - pear\n"
        );
        assert_eq!(tree.render_outline(Some(1)), "- fruit\n- vegetable\n");
        assert_eq!(tree.render_outline(Some(0)), "");
    }
}
