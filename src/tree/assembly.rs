use std::collections::HashMap;

use egui::{pos2, Pos2, Rect};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::scale::{floor_log10, TickBudget, TickScale};
use super::{TreeNode, TreeUnavailable};
use crate::config::TreeConfig;

/// Geometry inputs of one assembly pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblyConfig {
    pub width: f32,
    pub row_height: f32,
    pub padding_left: f32,
    pub padding_right: f32,
    pub marker_radius: f32,
    pub label_min_percentage: Decimal,
}

impl AssemblyConfig {
    pub fn new(tree: &TreeConfig, width: f32) -> Self {
        Self {
            width,
            row_height: tree.row_height,
            padding_left: tree.padding_left,
            padding_right: tree.padding_right,
            marker_radius: tree.marker_radius,
            label_min_percentage: tree.label_min_percentage,
        }
    }

    pub fn usable_width(&self) -> f32 {
        (self.width - self.padding_left - self.padding_right).max(1.0)
    }
}

/// Half-open run of leaf indices. A subtree's leaves are contiguous in leaf
/// order, so a range stands in for the name set a primitive represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafRange {
    pub start: usize,
    pub end: usize,
}

impl LeafRange {
    pub fn single(index: usize) -> Self {
        Self {
            start: index,
            end: index + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..self.end).contains(&index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// A node's own branch, drawn horizontally up to the node.
    Branch,
    /// Vertical piece joining an ancestor's row to one of its children.
    Connector,
    /// Dashed guide from a leaf to the right edge.
    Support,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeSegment {
    pub from: Pos2,
    pub to: Pos2,
    pub kind: SegmentKind,
    pub leaves: LeafRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeMarker {
    pub center: Pos2,
    pub name: String,
    pub is_leaf: bool,
    pub leaves: LeafRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceLabel {
    pub anchor: Pos2,
    pub text: String,
    pub leaves: LeafRange,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitRegion {
    Circle { center: Pos2, radius: f32 },
    Rect(Rect),
}

impl HitRegion {
    pub fn contains(&self, point: Pos2) -> bool {
        match self {
            HitRegion::Circle { center, radius } => (point - *center).length_sq() <= radius * radius,
            HitRegion::Rect(rect) => rect.contains(point),
        }
    }
}

/// Region plus the child-index path of the node that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct HitEntry {
    pub region: HitRegion,
    pub path: Vec<usize>,
}

/// Positioned primitives of one tree, in unzoomed canvas pixels, plus the hit
/// index. Immutable once built; rebuild when the tree or width changes.
#[derive(Debug, Clone)]
pub struct TreeAssembly {
    root: TreeNode,
    leaf_names: Vec<String>,
    leaf_index: HashMap<String, usize>,
    pub markers: Vec<TreeMarker>,
    pub segments: Vec<TreeSegment>,
    pub labels: Vec<DistanceLabel>,
    /// Queried in insertion order. Post-order traversal puts leaf regions
    /// before the regions of their ancestors.
    pub hit_index: Vec<HitEntry>,
    pub width: f32,
    pub height: f32,
    pub row_height: f32,
    pub padding_left: f32,
    pub usable_width: f32,
    pub max_distance: Decimal,
    pub min_scale_unit: Decimal,
}

impl TreeAssembly {
    pub fn build(root: &TreeNode, config: &AssemblyConfig) -> Result<Self, TreeUnavailable> {
        if let Some(reason) = root.unavailable_reason() {
            return Err(reason);
        }

        let max_distance = root.max_branch_length;
        let label_precision = floor_log10(max_distance)
            .map(|exponent| (2 - exponent).clamp(0, 10) as u32)
            .unwrap_or(2);

        let mut assembler = Assembler {
            config,
            max_distance,
            label_threshold: max_distance * config.label_min_percentage,
            label_precision,
            right_edge: config.width - config.padding_right,
            path: Vec::new(),
            leaf_names: Vec::with_capacity(root.leaf_count()),
            markers: Vec::new(),
            segments: Vec::new(),
            labels: Vec::new(),
            hit_index: Vec::new(),
        };
        assembler.visit(root, Decimal::ZERO);

        let leaf_index = assembler
            .leaf_names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();
        let height = assembler.leaf_names.len() as f32 * config.row_height;

        Ok(Self {
            root: root.clone(),
            leaf_names: assembler.leaf_names,
            leaf_index,
            markers: assembler.markers,
            segments: assembler.segments,
            labels: assembler.labels,
            hit_index: assembler.hit_index,
            width: config.width,
            height,
            row_height: config.row_height,
            padding_left: config.padding_left,
            usable_width: config.usable_width(),
            max_distance,
            min_scale_unit: root.min_branch_length().unwrap_or(max_distance),
        })
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Leaf names top to bottom; this is the row order the table follows.
    pub fn leaf_names(&self) -> &[String] {
        &self.leaf_names
    }

    pub fn leaf_position(&self, name: &str) -> Option<usize> {
        self.leaf_index.get(name).copied()
    }

    pub fn leaves_in(&self, range: LeafRange) -> &[String] {
        let end = range.end.min(self.leaf_names.len());
        &self.leaf_names[range.start.min(end)..end]
    }

    pub fn leaf_y(&self, index: usize) -> f32 {
        index as f32 * self.row_height + self.row_height * 0.5
    }

    /// Resolve a canvas point (unzoomed pixels) to the node owning the first
    /// hit region containing it.
    pub fn hit_test(&self, point: Pos2) -> Option<&TreeNode> {
        self.hit_index
            .iter()
            .find(|entry| entry.region.contains(point))
            .and_then(|entry| self.root.node_at(&entry.path))
    }

    pub fn x_for_distance(&self, distance: Decimal) -> f32 {
        project(distance, self.max_distance, self.padding_left, self.usable_width)
    }

    pub fn tick_scale(&self, zoom: f32, budget: TickBudget) -> TickScale {
        TickScale::solve(
            self.usable_width,
            self.max_distance,
            self.min_scale_unit,
            zoom,
            budget,
        )
    }
}

fn project(distance: Decimal, max_distance: Decimal, padding_left: f32, usable_width: f32) -> f32 {
    let fraction = distance
        .checked_div(max_distance)
        .and_then(|fraction| fraction.to_f32())
        .unwrap_or(0.0);
    padding_left + fraction * usable_width
}

struct Assembler<'a> {
    config: &'a AssemblyConfig,
    max_distance: Decimal,
    label_threshold: Decimal,
    label_precision: u32,
    right_edge: f32,
    path: Vec<usize>,
    leaf_names: Vec<String>,
    markers: Vec<TreeMarker>,
    segments: Vec<TreeSegment>,
    labels: Vec<DistanceLabel>,
    hit_index: Vec<HitEntry>,
}

impl Assembler<'_> {
    fn project(&self, distance: Decimal) -> f32 {
        project(
            distance,
            self.max_distance,
            self.config.padding_left,
            self.config.usable_width(),
        )
    }

    fn visit(&mut self, node: &TreeNode, parent_distance: Decimal) -> (f32, LeafRange) {
        let distance = parent_distance + node.branch_length;
        let stem_x = self.project(parent_distance);
        let x = self.project(distance);

        let (y, leaves) = if node.is_leaf() {
            self.place_leaf(node, x)
        } else {
            self.place_ancestor(node, x, distance)
        };

        self.segments.push(TreeSegment {
            from: pos2(stem_x, y),
            to: pos2(x, y),
            kind: SegmentKind::Branch,
            leaves,
        });
        self.push_label(node, stem_x, x, y, leaves);

        (y, leaves)
    }

    fn place_leaf(&mut self, node: &TreeNode, x: f32) -> (f32, LeafRange) {
        let index = self.leaf_names.len();
        self.leaf_names.push(node.name.clone());

        let row_height = self.config.row_height;
        let y = index as f32 * row_height + row_height * 0.5;
        let leaves = LeafRange::single(index);

        if x < self.right_edge {
            self.segments.push(TreeSegment {
                from: pos2(x, y),
                to: pos2(self.right_edge, y),
                kind: SegmentKind::Support,
                leaves,
            });
        }
        self.push_marker(node, pos2(x, y), leaves);

        (y, leaves)
    }

    fn place_ancestor(&mut self, node: &TreeNode, x: f32, distance: Decimal) -> (f32, LeafRange) {
        let mut rows = Vec::with_capacity(node.children.len());
        for (index, child) in node.children.iter().enumerate() {
            self.path.push(index);
            rows.push(self.visit(child, distance));
            self.path.pop();
        }

        let (Some(&(first_y, first)), Some(&(last_y, last))) = (rows.first(), rows.last()) else {
            return (0.0, LeafRange::single(self.leaf_names.len()));
        };
        let y = (first_y + last_y) * 0.5;
        let leaves = LeafRange {
            start: first.start,
            end: last.end,
        };

        self.push_connectors(x, y, &rows);

        // A child on a zero-length branch would sit under this marker and be
        // impossible to click, so the ancestor only gets a marker when every
        // child branch has length.
        if node
            .children
            .iter()
            .all(|child| child.branch_length > Decimal::ZERO)
        {
            self.push_marker(node, pos2(x, y), leaves);
        }

        (y, leaves)
    }

    /// Vertical connectors, built outward from the ancestor's row. Each piece
    /// carries the leaves of every child at or beyond its far end.
    fn push_connectors(&mut self, x: f32, y: f32, rows: &[(f32, LeafRange)]) {
        let above: Vec<&(f32, LeafRange)> = rows.iter().filter(|(child_y, _)| *child_y < y).collect();
        if let (Some(top), Some(_)) = (above.first(), above.last()) {
            let mut covered = LeafRange {
                start: top.1.start,
                end: above.iter().map(|(_, range)| range.end).max().unwrap_or(top.1.end),
            };
            let mut from_y = y;
            for &&(child_y, range) in above.iter().rev() {
                self.segments.push(TreeSegment {
                    from: pos2(x, from_y),
                    to: pos2(x, child_y),
                    kind: SegmentKind::Connector,
                    leaves: covered,
                });
                covered.end = range.start;
                from_y = child_y;
            }
        }

        let below: Vec<&(f32, LeafRange)> = rows.iter().filter(|(child_y, _)| *child_y > y).collect();
        if let (Some(_), Some(bottom)) = (below.first(), below.last()) {
            let mut covered = LeafRange {
                start: below.iter().map(|(_, range)| range.start).min().unwrap_or(bottom.1.start),
                end: bottom.1.end,
            };
            let mut from_y = y;
            for &&(child_y, range) in &below {
                self.segments.push(TreeSegment {
                    from: pos2(x, from_y),
                    to: pos2(x, child_y),
                    kind: SegmentKind::Connector,
                    leaves: covered,
                });
                covered.start = range.end;
                from_y = child_y;
            }
        }
    }

    fn push_marker(&mut self, node: &TreeNode, center: Pos2, leaves: LeafRange) {
        self.markers.push(TreeMarker {
            center,
            name: node.name.clone(),
            is_leaf: node.is_leaf(),
            leaves,
        });
        self.hit_index.push(HitEntry {
            region: HitRegion::Circle {
                center,
                radius: self.config.marker_radius,
            },
            path: self.path.clone(),
        });
    }

    fn push_label(&mut self, node: &TreeNode, stem_x: f32, x: f32, y: f32, leaves: LeafRange) {
        if node.branch_length <= Decimal::ZERO || node.branch_length < self.label_threshold {
            return;
        }
        let text = format!(
            "{:.*}",
            self.label_precision as usize,
            node.branch_length.round_dp(self.label_precision)
        );
        self.labels.push(DistanceLabel {
            anchor: pos2((stem_x + x) * 0.5, y - self.config.row_height * 0.25),
            text,
            leaves,
        });
    }
}
