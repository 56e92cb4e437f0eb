use std::collections::HashSet;

use super::TreeNode;

/// Restrict a tree to the leaves in `keep`.
///
/// Internal nodes that lose all their leaves are dropped. A non-root node left
/// with a single child is merged into it: the child takes its place and the
/// two branch lengths are summed exactly, so cumulative distances of the
/// surviving leaves do not change. Returns `None` when nothing survives.
pub fn prune(root: &TreeNode, keep: &HashSet<String>) -> Option<TreeNode> {
    if root
        .sub_tree_names
        .iter()
        .all(|name| keep.contains(name))
    {
        return Some(root.clone());
    }
    prune_node(root, keep, true)
}

fn prune_node(node: &TreeNode, keep: &HashSet<String>, is_root: bool) -> Option<TreeNode> {
    if node.is_leaf() {
        return keep.contains(&node.name).then(|| node.clone());
    }

    let mut children: Vec<TreeNode> = node
        .children
        .iter()
        .filter_map(|child| prune_node(child, keep, false))
        .collect();

    match children.len() {
        0 => None,
        1 if !is_root => {
            let mut only = children.pop()?;
            only.branch_length += node.branch_length;
            only.refresh_aggregates();
            Some(only)
        }
        _ => Some(TreeNode::internal(
            node.name.clone(),
            node.branch_length,
            children,
        )),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::tree::parse_newick;
    use crate::tree::test_support::*;

    fn keep(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn root_distance(tree: &TreeNode, leaf: &str) -> Option<Decimal> {
        fn walk(node: &TreeNode, leaf: &str, acc: Decimal) -> Option<Decimal> {
            let here = acc + node.branch_length;
            if node.is_leaf() {
                return (node.name == leaf).then_some(here);
            }
            node.children.iter().find_map(|child| walk(child, leaf, here))
        }
        walk(tree, leaf, Decimal::ZERO)
    }

    #[test]
    fn keeping_everything_returns_same_tree() {
        let tree = two_clades();
        assert_eq!(prune(&tree, &keep(&["A", "B", "C", "D", "E"])), Some(tree));
    }

    #[test]
    fn single_child_nodes_merge_with_exact_sums() {
        let tree = parse_newick("((A:0.1,B:0.2)x:0.7,(C:0.3,D:0.4)y:0.5)r;").unwrap();
        let pruned = prune(&tree, &keep(&["A", "C", "D"])).unwrap();

        assert_eq!(pruned.sub_tree_names, vec!["A", "C", "D"]);
        // x lost B, so A moved up and absorbed x's branch.
        assert_eq!(pruned.children[0].name, "A");
        assert_eq!(pruned.children[0].branch_length, dec("0.8"));
        for name in ["A", "C", "D"] {
            assert_eq!(root_distance(&pruned, name), root_distance(&tree, name));
        }
        assert_eq!(pruned.max_branch_length, dec("0.9"));
    }

    #[test]
    fn root_survives_with_one_child() {
        let tree = two_clades();
        let pruned = prune(&tree, &keep(&["A", "B"])).unwrap();
        assert_eq!(pruned.name, "root");
        assert_eq!(pruned.children.len(), 1);
        assert_eq!(pruned.children[0].name, "c1");
    }

    #[test]
    fn nothing_kept_yields_none() {
        assert_eq!(prune(&two_clades(), &keep(&["Z"])), None);
    }

    #[test]
    fn input_tree_is_untouched() {
        let tree = two_clades();
        let before = tree.clone();
        let _ = prune(&tree, &keep(&["A", "E"]));
        assert_eq!(tree, before);
    }
}
