use std::collections::HashMap;

use super::TreeNode;

/// Hierarchical path label (`"1.2.1"`) for every node, keyed by node name.
///
/// Stable for a given rooting; it has to be recomputed whenever the rooting
/// or the pruned case set changes. Zero-length leaves take the placeholder
/// segment `1` so that clusters of identical sequences sort together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeAddress {
    paths: HashMap<String, String>,
}

impl TreeAddress {
    pub fn compute(root: &TreeNode) -> Self {
        let mut paths = HashMap::with_capacity(root.size());
        let mut stack = vec![(root, "1".to_string())];

        while let Some((node, path)) = stack.pop() {
            for (index, child) in node.children.iter().enumerate().rev() {
                let segment = if child.is_leaf() && child.branch_length.is_zero() {
                    1
                } else {
                    index + 1
                };
                stack.push((child, format!("{path}.{segment}")));
            }
            paths.insert(node.name.clone(), path);
        }

        Self { paths }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.paths.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Names whose path lies inside the subtree addressed by `prefix`.
    pub fn names_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.paths.iter().filter_map(move |(name, path)| {
            let inside = path == prefix
                || (path.starts_with(prefix) && path[prefix.len()..].starts_with('.'));
            inside.then_some(name.as_str())
        })
    }
}
