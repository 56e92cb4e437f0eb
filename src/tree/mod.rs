use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use phylotree::tree::{Node as PhyloNode, NodeId as PhyloNodeId, Tree as PhyloTree};
use rust_decimal::Decimal;

use self::newick::EdgeLiterals;

pub mod address;
pub mod assembly;
pub mod interaction;
mod newick;
pub mod painter;
pub mod prune;
pub mod reroot;
pub mod sanitize;
pub mod scale;
pub mod scene;

/// Node of a rooted phylogenetic tree.
///
/// Children are owned, so every structural operation (sanitize, prune,
/// reroot) produces a new graph and never touches one another view holds.
/// `sub_tree_names` and `max_branch_length` are cached aggregates and are
/// refreshed by the constructors below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub name: String,
    pub branch_length: Decimal,
    pub children: Vec<TreeNode>,
    pub sub_tree_names: Vec<String>,
    pub max_branch_length: Decimal,
}

impl TreeNode {
    pub fn leaf(name: impl Into<String>, branch_length: Decimal) -> Self {
        let name = name.into();
        Self {
            sub_tree_names: vec![name.clone()],
            name,
            branch_length,
            children: Vec::new(),
            max_branch_length: branch_length,
        }
    }

    pub fn internal(
        name: impl Into<String>,
        branch_length: Decimal,
        children: Vec<TreeNode>,
    ) -> Self {
        let mut node = Self {
            name: name.into(),
            branch_length,
            children,
            sub_tree_names: Vec::new(),
            max_branch_length: branch_length,
        };
        node.refresh_aggregates();
        node
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.sub_tree_names.len()
    }

    /// Recompute this node's aggregates from the (already current) aggregates
    /// of its direct children.
    pub(crate) fn refresh_aggregates(&mut self) {
        if self.children.is_empty() {
            self.sub_tree_names = vec![self.name.clone()];
            self.max_branch_length = self.branch_length;
            return;
        }

        let mut names = Vec::with_capacity(
            self.children.iter().map(|child| child.sub_tree_names.len()).sum(),
        );
        let mut deepest = Decimal::ZERO;
        for child in &self.children {
            names.extend(child.sub_tree_names.iter().cloned());
            deepest = deepest.max(child.max_branch_length);
        }
        self.sub_tree_names = names;
        self.max_branch_length = self.branch_length + deepest;
    }

    /// Depth-first search by name, including this node.
    pub fn find(&self, name: &str) -> Option<&TreeNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Resolve a path of child indices starting at this node.
    pub fn node_at(&self, path: &[usize]) -> Option<&TreeNode> {
        path.iter()
            .try_fold(self, |node, &index| node.children.get(index))
    }

    /// Smallest non-zero branch length below this node (this node's own stem
    /// excluded). Used as the finest unit the distance scale may show.
    pub fn min_branch_length(&self) -> Option<Decimal> {
        fn walk(node: &TreeNode, min: &mut Option<Decimal>) {
            for child in &node.children {
                if child.branch_length > Decimal::ZERO {
                    *min = Some(match *min {
                        Some(current) => current.min(child.branch_length),
                        None => child.branch_length,
                    });
                }
                walk(child, min);
            }
        }

        let mut min = None;
        walk(self, &mut min);
        min
    }

    /// Number of nodes in this subtree, this node included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }

    /// Reason this tree cannot be drawn, if any. Degraded trees are not errors.
    pub fn unavailable_reason(&self) -> Option<TreeUnavailable> {
        if self.leaf_count() < 2 {
            Some(TreeUnavailable::TooFewLeaves)
        } else if self.max_branch_length <= Decimal::ZERO {
            Some(TreeUnavailable::ZeroDistance)
        } else {
            None
        }
    }
}

/// Why a tree visualisation is unavailable. Distinct from loading and error
/// states: the data is fine, there is just nothing meaningful to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeUnavailable {
    Empty,
    TooFewLeaves,
    ZeroDistance,
}

impl fmt::Display for TreeUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeUnavailable::Empty => write!(f, "tree contains no cases"),
            TreeUnavailable::TooFewLeaves => write!(f, "tree needs at least two cases"),
            TreeUnavailable::ZeroDistance => write!(f, "all genetic distances are zero"),
        }
    }
}

/// Parse a newick string into an owned node graph.
///
/// Internal nodes (and the odd unnamed leaf) get a synthetic `#<n>` name, `n`
/// being the pre-order index, so every node stays addressable. A synthetic
/// name never shadows a label from the tree; on a clash it gains a `_<k>`
/// suffix. Branch lengths are taken from the literal text, not from the
/// parser's floats.
pub fn parse_newick(newick: &str) -> Result<TreeNode> {
    let text = newick.trim();
    let phylo = PhyloTree::from_newick(text)
        .map_err(|err| anyhow!("failed to parse newick tree: {err}"))?;
    let root = phylo
        .get_root()
        .map_err(|_| anyhow!("newick tree has no root"))?;
    let literals = newick::scan(text)?;

    let mut builder = Builder {
        phylo: &phylo,
        taken: HashSet::new(),
        next_index: 0,
    };
    builder.collect_names(root)?;
    let tree = builder.build(root, &literals)?;
    debug!(
        "Parsed newick tree with {} nodes and {} leaves.",
        builder.next_index,
        tree.leaf_count()
    );
    Ok(tree)
}

struct Builder<'a> {
    phylo: &'a PhyloTree,
    /// Every name in use: labels from the tree plus synthetic names handed out.
    taken: HashSet<String>,
    next_index: usize,
}

impl Builder<'_> {
    fn get(&self, node_id: PhyloNodeId) -> Result<&PhyloNode> {
        self.phylo
            .get(&node_id)
            .map_err(|_| anyhow!("newick tree references missing node {node_id}"))
    }

    fn collect_names(&mut self, node_id: PhyloNodeId) -> Result<()> {
        let node = self.get(node_id)?;
        let children = node.children.clone();
        if let Some(name) = node.name.clone().filter(|name| !name.is_empty()) {
            self.taken.insert(name);
        }
        for child_id in children {
            self.collect_names(child_id)?;
        }
        Ok(())
    }

    fn synthetic_name(&mut self, index: usize) -> String {
        let mut name = format!("#{index}");
        let mut suffix = 1;
        while self.taken.contains(&name) {
            name = format!("#{index}_{suffix}");
            suffix += 1;
        }
        self.taken.insert(name.clone());
        name
    }

    fn build(&mut self, node_id: PhyloNodeId, literals: &EdgeLiterals) -> Result<TreeNode> {
        let node = self.get(node_id)?;
        let label = node.name.clone().filter(|name| !name.is_empty());
        let children = node.children.clone();
        if children.len() != literals.children.len() {
            bail!("newick tree structure is inconsistent around node {node_id}");
        }

        let index = self.next_index;
        self.next_index += 1;
        let name = match label {
            Some(name) => name,
            None => self.synthetic_name(index),
        };
        let branch_length = match literals.length.as_deref().filter(|text| !text.is_empty()) {
            Some(literal) => decimal_from_literal(literal)
                .with_context(|| format!("invalid branch length on node {name}"))?,
            None => Decimal::ZERO,
        };

        if children.is_empty() {
            return Ok(TreeNode::leaf(name, branch_length));
        }

        let children = children
            .iter()
            .zip(&literals.children)
            .map(|(&child_id, child_literals)| self.build(child_id, child_literals))
            .collect::<Result<Vec<_>>>()?;
        Ok(TreeNode::internal(name, branch_length, children))
    }
}

fn decimal_from_literal(literal: &str) -> Result<Decimal> {
    Decimal::from_str(literal)
        .or_else(|_| Decimal::from_scientific(literal))
        .map_err(|err| anyhow!("cannot represent {literal} as decimal: {err}"))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn assert_aggregates(node: &TreeNode) {
        if node.is_leaf() {
            assert_eq!(node.sub_tree_names, vec![node.name.clone()]);
            assert_eq!(node.max_branch_length, node.branch_length);
            return;
        }
        let concatenated: Vec<String> = node
            .children
            .iter()
            .flat_map(|child| child.sub_tree_names.iter().cloned())
            .collect();
        assert_eq!(node.sub_tree_names, concatenated);
        assert!(node.max_branch_length >= node.branch_length);
        for child in &node.children {
            assert_aggregates(child);
        }
    }

    #[test]
    fn parses_newick_with_exact_decimals() {
        let tree = parse_newick("((A:0.1,B:0.2):0.3,C:0.000001);").unwrap();
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.sub_tree_names, vec!["A", "B", "C"]);
        assert_eq!(tree.children[0].children[0].branch_length, dec("0.1"));
        assert_eq!(tree.children[1].branch_length, dec("0.000001"));
        // 0.3 + 0.2 must stay exact
        assert_eq!(tree.max_branch_length, dec("0.5"));
        assert_aggregates(&tree);
    }

    #[test]
    fn unnamed_nodes_get_synthetic_names() {
        let tree = parse_newick("((A:1,B:1):1,C:1);").unwrap();
        assert!(tree.name.starts_with('#'));
        assert!(tree.children[0].name.starts_with('#'));
        assert_ne!(tree.name, tree.children[0].name);
        assert!(!tree.sub_tree_names.iter().any(|name| name.starts_with('#')));
    }

    #[test]
    fn keeps_every_digit_of_long_branch_lengths() {
        let tree = parse_newick("((A:0.1000000000000000001,B:1):0.2,C:0.12345678901234567891);").unwrap();
        assert_eq!(tree.children[1].branch_length, dec("0.12345678901234567891"));
        assert_eq!(
            tree.children[0].children[0].branch_length,
            dec("0.1000000000000000001")
        );
        assert_eq!(tree.children[0].max_branch_length, dec("1.2"));
        assert_eq!(tree.max_branch_length, dec("1.2"));
        let deep = parse_newick("((A:0.1000000000000000001,B:0.1):0.2,C:0.1);").unwrap();
        assert_eq!(deep.max_branch_length, dec("0.3000000000000000001"));
    }

    #[test]
    fn scientific_branch_lengths_are_exact() {
        let tree = parse_newick("(A:1e-7,B:2.5E-3);").unwrap();
        assert_eq!(tree.children[0].branch_length, dec("0.0000001"));
        assert_eq!(tree.children[1].branch_length, dec("0.0025"));
    }

    #[test]
    fn synthetic_names_skip_labels_already_in_the_tree() {
        let tree = parse_newick("((#1:1,B:1):1,C:1);").unwrap();
        let clade = &tree.children[0];
        assert_ne!(clade.name, "#1");
        assert_eq!(clade.name, "#1_1");
        assert!(tree.find("#1").is_some_and(TreeNode::is_leaf));
    }

    #[test]
    fn rejects_malformed_newick() {
        assert!(parse_newick("(A:abc,B:1);").is_err());
    }

    #[test]
    fn aggregates_hold_for_fixture() {
        let tree = two_clades();
        assert_aggregates(&tree);
        assert_eq!(tree.leaf_count(), 5);
        assert_eq!(tree.max_branch_length, dec("3"));
        assert_eq!(tree.min_branch_length(), Some(dec("1")));
        assert_eq!(tree.size(), 8);
    }

    #[test]
    fn finds_nodes_by_name_and_path() {
        let tree = two_clades();
        assert_eq!(tree.find("c2").map(|n| n.leaf_count()), Some(3));
        assert_eq!(tree.node_at(&[1, 0]).map(|n| n.name.as_str()), Some("C"));
        assert!(tree.node_at(&[4]).is_none());
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn degraded_trees_report_reason() {
        assert_eq!(
            leaf("A", "1").unavailable_reason(),
            Some(TreeUnavailable::TooFewLeaves)
        );
        let flat = node("r", "0", vec![leaf("A", "0"), leaf("B", "0")]);
        assert_eq!(flat.unavailable_reason(), Some(TreeUnavailable::ZeroDistance));
        assert_eq!(two_clades().unavailable_reason(), None);
    }
}
