use log::warn;
use rust_decimal::Decimal;

use super::TreeNode;

/// Copy of the node named `name`, detached from its stem: branch length 0 and
/// `max_branch_length` reduced accordingly so the subtree scales on its own.
///
/// Callers must only pass names from the currently loaded tree; an unknown
/// name logs a warning and yields an unchanged copy of `root`.
pub fn reroot_by_node(root: &TreeNode, name: &str) -> TreeNode {
    match root.find(name) {
        Some(node) => detach_stem(node),
        None => {
            warn!("Reroot target {name:?} not found; keeping current root.");
            root.clone()
        }
    }
}

/// Copy of the parent of the node named `name`, detached the same way. Used to
/// step out of a zoomed subtree. The root has no parent and maps to itself.
pub fn reroot_by_parent(root: &TreeNode, name: &str) -> TreeNode {
    if root.name == name {
        return detach_stem(root);
    }
    match find_parent(root, name) {
        Some(parent) => detach_stem(parent),
        None => {
            warn!("Reroot target {name:?} not found; keeping current root.");
            root.clone()
        }
    }
}

fn detach_stem(node: &TreeNode) -> TreeNode {
    let mut copy = node.clone();
    copy.max_branch_length -= copy.branch_length;
    copy.branch_length = Decimal::ZERO;
    copy
}

fn find_parent<'a>(node: &'a TreeNode, name: &str) -> Option<&'a TreeNode> {
    if node.children.iter().any(|child| child.name == name) {
        return Some(node);
    }
    node.children
        .iter()
        .find_map(|child| find_parent(child, name))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::tree::test_support::*;

    #[test]
    fn reroot_by_node_detaches_stem() {
        let tree = two_clades();
        let clade = reroot_by_node(&tree, "c2");
        assert_eq!(clade.name, "c2");
        assert_eq!(clade.branch_length, Decimal::ZERO);
        // c2 max was 1 + 2, the stem of 1 is discarded.
        assert_eq!(clade.max_branch_length, dec("2"));
        assert_eq!(clade.sub_tree_names, vec!["C", "D", "E"]);
        // original untouched
        assert_eq!(tree.find("c2").map(|n| n.branch_length), Some(dec("1")));
    }

    #[test]
    fn reroot_by_parent_steps_out() {
        let tree = two_clades();
        let parent = reroot_by_parent(&tree, "D");
        assert_eq!(parent.name, "c2");
        assert_eq!(parent.branch_length, Decimal::ZERO);

        let top = reroot_by_parent(&tree, "c1");
        assert_eq!(top.name, "root");
        assert_eq!(reroot_by_parent(&tree, "root").name, "root");
    }

    #[test]
    fn node_then_parent_returns_superset() {
        let tree = two_clades();
        for name in ["A", "c1", "c2", "E"] {
            let zoomed = reroot_by_node(&tree, name);
            let original: HashSet<&String> = zoomed.sub_tree_names.iter().collect();

            let on_result = reroot_by_parent(&zoomed, name);
            let on_tree = reroot_by_parent(&tree, name);
            for stepped in [on_result, on_tree] {
                let names: HashSet<&String> = stepped.sub_tree_names.iter().collect();
                assert!(names.is_superset(&original), "step out of {name} lost leaves");
            }
        }
    }

    #[test]
    fn unknown_name_keeps_root() {
        let tree = two_clades();
        assert_eq!(reroot_by_node(&tree, "nope"), tree);
        assert_eq!(reroot_by_parent(&tree, "nope"), tree);
    }
}
