use log::debug;

use super::TreeNode;

/// Collapse zero-length internal nodes whose children are all internal or
/// zero-length themselves, splicing their children into the parent in place.
///
/// Distances are unaffected (a removed node contributed exactly zero). The
/// root is never collapsed. One post-order pass reaches the fixpoint, so
/// running this on its own output is a no-op.
pub fn sanitize(root: &TreeNode) -> TreeNode {
    let mut tree = root.clone();
    let collapsed = collapse_children(&mut tree);
    if collapsed > 0 {
        debug!("Sanitized tree: collapsed {collapsed} zero-length internal nodes.");
    }
    tree
}

fn collapse_children(node: &mut TreeNode) -> usize {
    if node.is_leaf() {
        return 0;
    }

    let mut collapsed = 0;
    let children = std::mem::take(&mut node.children);
    let mut kept = Vec::with_capacity(children.len());
    for mut child in children {
        collapsed += collapse_children(&mut child);
        if is_collapsible(&child) {
            collapsed += 1;
            kept.extend(child.children);
        } else {
            kept.push(child);
        }
    }
    node.children = kept;
    node.refresh_aggregates();
    collapsed
}

fn is_collapsible(node: &TreeNode) -> bool {
    !node.is_leaf()
        && node.branch_length.is_zero()
        && node
            .children
            .iter()
            .all(|child| !child.is_leaf() || child.branch_length.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::parse_newick;
    use crate::tree::test_support::*;

    #[test]
    fn collapses_zero_length_node_with_internal_children() {
        // z has length 0 and only internal children: spliced into root.
        let tree = node(
            "root",
            "0",
            vec![
                node(
                    "z",
                    "0",
                    vec![
                        node("x", "1", vec![leaf("A", "1"), leaf("B", "2")]),
                        node("y", "1", vec![leaf("C", "1"), leaf("D", "1")]),
                    ],
                ),
                leaf("E", "3"),
            ],
        );

        let sanitized = sanitize(&tree);
        let names: Vec<&str> = sanitized.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "E"]);
        assert_eq!(sanitized.sub_tree_names, tree.sub_tree_names);
        assert_eq!(sanitized.max_branch_length, tree.max_branch_length);
    }

    #[test]
    fn keeps_zero_length_clade_of_visible_leaves() {
        let tree = node(
            "root",
            "0",
            vec![
                node("z", "0", vec![leaf("A", "1"), leaf("B", "2")]),
                leaf("C", "1"),
            ],
        );
        assert_eq!(sanitize(&tree), tree);
    }

    #[test]
    fn collapses_zero_length_node_of_zero_length_leaves() {
        let tree = node(
            "root",
            "0",
            vec![
                node("z", "0", vec![leaf("A", "0"), leaf("B", "0")]),
                leaf("C", "1"),
            ],
        );
        let sanitized = sanitize(&tree);
        assert_eq!(sanitized.children.len(), 3);
        assert!(sanitized.children.iter().all(TreeNode::is_leaf));
    }

    #[test]
    fn nested_collapse_preserves_order() {
        let tree = parse_newick("(((A:1,B:1):0,(C:1,D:1):0):0,((E:0,F:0):0,G:1):2);").unwrap();
        let sanitized = sanitize(&tree);
        assert_eq!(sanitized.sub_tree_names, vec!["A", "B", "C", "D", "E", "F", "G"]);
        // The first top-level child (length 0, internal children) is gone.
        assert_eq!(sanitized.children.len(), 3);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "(((A:1,B:1):0,(C:1,D:1):0):0,((E:0,F:0):0,G:1):2);",
            "((A:0,(B:0,C:0):0):0,D:1);",
            "(A:1,B:2);",
        ];
        for input in inputs {
            let tree = parse_newick(input).unwrap();
            let once = sanitize(&tree);
            assert_eq!(sanitize(&once), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn leaf_root_is_untouched() {
        let single = leaf("A", "0");
        assert_eq!(sanitize(&single), single);
    }
}
