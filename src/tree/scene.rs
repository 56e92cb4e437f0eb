use std::collections::{HashMap, HashSet};

use egui::{pos2, vec2, Align2, Color32, Pos2, Rect, Vec2};

use super::assembly::{LeafRange, SegmentKind, TreeAssembly};
use super::scale::TickBudget;
use crate::config::{parse_hex_color, TreeConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub width: f32,
    pub color: Color32,
    pub dash: Option<(f32, f32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScenePrimitive {
    StrokeLine {
        from: Pos2,
        to: Pos2,
        style: StrokeStyle,
    },
    FillCircle {
        center: Pos2,
        radius: f32,
        color: Color32,
    },
    Text {
        text: String,
        anchor: Pos2,
        align: Align2,
        size: f32,
        color: Color32,
    },
}

/// Draw list for one canvas, in device pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeScene {
    pub size: Vec2,
    pub primitives: Vec<ScenePrimitive>,
}

/// Canvas-to-screen mapping. Recomputed by callers on every redraw since zoom
/// and scroll change from frame to frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub zoom: f32,
    pub scroll_x: f32,
    pub scroll_y: f32,
    pub device_pixel_ratio: f32,
    pub width: f32,
}

impl ViewTransform {
    pub fn identity(width: f32) -> Self {
        Self {
            zoom: 1.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
            device_pixel_ratio: 1.0,
            width,
        }
    }

    pub fn is_unzoomed(&self) -> bool {
        (self.zoom - 1.0).abs() <= f32::EPSILON
    }

    pub fn screen_x(&self, x: f32) -> f32 {
        let half = self.width * 0.5;
        ((x - half) * self.zoom + half - self.scroll_x) * self.device_pixel_ratio
    }

    pub fn screen_y(&self, y: f32) -> f32 {
        (y * self.zoom - self.scroll_y) * self.device_pixel_ratio
    }

    pub fn to_screen(&self, point: Pos2) -> Pos2 {
        pos2(self.screen_x(point.x), self.screen_y(point.y))
    }

    /// Inverse of [`ViewTransform::to_screen`].
    pub fn to_canvas(&self, point: Pos2) -> Pos2 {
        let dpr = self.device_pixel_ratio.max(f32::EPSILON);
        let zoom = self.zoom.max(f32::EPSILON);
        let half = self.width * 0.5;
        pos2(
            (point.x / dpr + self.scroll_x - half) / zoom + half,
            (point.y / dpr + self.scroll_y) / zoom,
        )
    }

    /// Scale a length given in canvas pixels into device pixels, without zoom.
    fn device(&self, length: f32) -> f32 {
        length * self.device_pixel_ratio
    }
}

/// Resolved colours and sizes of a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneStyle {
    pub branch_color: Color32,
    pub support_color: Color32,
    pub marker_color: Color32,
    pub label_color: Color32,
    pub tick_color: Color32,
    pub background_color: Color32,
    pub line_width: f32,
    pub marker_radius: f32,
    pub font_size: f32,
    pub dimmed_alpha: f32,
    pub support_dash: (f32, f32),
    pub header_height: f32,
    pub tick_budget: TickBudget,
}

impl SceneStyle {
    pub fn from_config(config: &TreeConfig) -> Self {
        let color = |hex: &str, fallback: Color32| parse_hex_color(hex).unwrap_or(fallback);
        Self {
            branch_color: color(&config.branch_color, Color32::BLACK),
            support_color: color(&config.support_color, Color32::LIGHT_GRAY),
            marker_color: color(&config.marker_color, Color32::BLACK),
            label_color: color(&config.label_color, Color32::DARK_GRAY),
            tick_color: color(&config.tick_color, Color32::GRAY),
            background_color: color(&config.background_color, Color32::WHITE),
            line_width: config.line_width,
            marker_radius: config.marker_radius,
            font_size: config.font_size,
            dimmed_alpha: config.dimmed_alpha,
            support_dash: config.support_dash,
            header_height: config.header_height,
            tick_budget: config.tick_budget(),
        }
    }
}

impl Default for SceneStyle {
    fn default() -> Self {
        Self::from_config(&TreeConfig::default())
    }
}

/// Per-frame inputs of the body scene.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderState<'a> {
    pub highlight: Option<&'a HashSet<String>>,
    /// Stratification colours by leaf name.
    pub leaf_colors: Option<&'a HashMap<String, Color32>>,
    pub show_distances: bool,
}

/// Highlighted leaves as prefix sums over leaf order, so a primitive's
/// leaf range is tested in constant time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightMask {
    prefix: Vec<u32>,
}

impl HighlightMask {
    /// `None` when nothing is highlighted.
    pub fn new(assembly: &TreeAssembly, highlight: Option<&HashSet<String>>) -> Option<Self> {
        let highlight = highlight.filter(|set| !set.is_empty())?;
        let mut prefix = Vec::with_capacity(assembly.leaf_names().len() + 1);
        let mut running = 0u32;
        prefix.push(running);
        for name in assembly.leaf_names() {
            if highlight.contains(name) {
                running += 1;
            }
            prefix.push(running);
        }
        Some(Self { prefix })
    }

    pub fn intersects(&self, range: LeafRange) -> bool {
        let last = self.prefix.len().saturating_sub(1);
        let start = range.start.min(last);
        let end = range.end.min(last);
        end > start && self.prefix[end] > self.prefix[start]
    }

    pub fn highlighted_count(&self) -> usize {
        self.prefix.last().copied().unwrap_or(0) as usize
    }
}

/// Body canvas: branches, connectors, support lines, markers and distance
/// labels. `viewport` is the visible size in canvas pixels; primitives fully
/// outside it are culled.
pub fn build_body_scene(
    assembly: &TreeAssembly,
    view: &ViewTransform,
    viewport: Vec2,
    state: &RenderState<'_>,
    style: &SceneStyle,
) -> TreeScene {
    let mask = HighlightMask::new(assembly, state.highlight);
    let tint = |color: Color32, leaves: LeafRange| match &mask {
        Some(mask) if !mask.intersects(leaves) => color.gamma_multiply(style.dimmed_alpha),
        _ => color,
    };

    let size = viewport * view.device_pixel_ratio;
    let margin = view.device(style.marker_radius + style.font_size * 4.0);
    let visible = Rect::from_min_size(Pos2::ZERO, size).expand(margin);

    let mut primitives = Vec::new();
    let line_width = view.device(style.line_width);

    for segment in &assembly.segments {
        if segment.kind == SegmentKind::Support && !view.is_unzoomed() {
            continue;
        }
        let from = view.to_screen(segment.from);
        let to = view.to_screen(segment.to);
        if !visible.intersects(Rect::from_two_pos(from, to)) {
            continue;
        }
        let stroke = match segment.kind {
            SegmentKind::Support => StrokeStyle {
                width: line_width,
                color: tint(style.support_color, segment.leaves),
                dash: Some((
                    view.device(style.support_dash.0),
                    view.device(style.support_dash.1),
                )),
            },
            SegmentKind::Branch | SegmentKind::Connector => StrokeStyle {
                width: line_width,
                color: tint(style.branch_color, segment.leaves),
                dash: None,
            },
        };
        primitives.push(ScenePrimitive::StrokeLine {
            from,
            to,
            style: stroke,
        });
    }

    let radius = view.device(style.marker_radius);
    for marker in &assembly.markers {
        let center = view.to_screen(marker.center);
        if !visible.contains(center) {
            continue;
        }
        let base = if marker.is_leaf {
            state
                .leaf_colors
                .and_then(|colors| colors.get(&marker.name))
                .copied()
                .unwrap_or(style.marker_color)
        } else {
            style.marker_color
        };
        primitives.push(ScenePrimitive::FillCircle {
            center,
            radius,
            color: tint(base, marker.leaves),
        });
    }

    if state.show_distances {
        if let Some(mask) = &mask {
            for label in &assembly.labels {
                if !mask.intersects(label.leaves) {
                    continue;
                }
                let anchor = view.to_screen(label.anchor);
                if !visible.contains(anchor) {
                    continue;
                }
                primitives.push(ScenePrimitive::Text {
                    text: label.text.clone(),
                    anchor,
                    align: Align2::CENTER_BOTTOM,
                    size: view.device(style.font_size),
                    color: style.label_color,
                });
            }
        }
    }

    TreeScene { size, primitives }
}

/// Header canvas: the distance scale. Only the horizontal part of `view`
/// applies.
pub fn build_header_scene(
    assembly: &TreeAssembly,
    view: &ViewTransform,
    viewport_width: f32,
    style: &SceneStyle,
) -> TreeScene {
    let size = vec2(viewport_width, style.header_height) * view.device_pixel_ratio;
    let scale = assembly.tick_scale(view.zoom, style.tick_budget);
    let precision = scale.label_precision() as usize;

    let baseline = size.y - view.device(1.0);
    let tick_top = size.y - view.device(style.header_height * 0.3);
    let stroke = StrokeStyle {
        width: view.device(style.line_width),
        color: style.tick_color,
        dash: None,
    };

    let mut primitives = Vec::new();
    let ticks = scale.tick_distances(assembly.max_distance);
    if let (Some(first), Some(last)) = (ticks.first(), ticks.last()) {
        primitives.push(ScenePrimitive::StrokeLine {
            from: pos2(view.screen_x(assembly.x_for_distance(*first)), baseline),
            to: pos2(view.screen_x(assembly.x_for_distance(*last)), baseline),
            style: stroke,
        });
    }
    for distance in ticks {
        let x = view.screen_x(assembly.x_for_distance(distance));
        if x < -view.device(style.font_size * 4.0) || x > size.x + view.device(style.font_size * 4.0) {
            continue;
        }
        primitives.push(ScenePrimitive::StrokeLine {
            from: pos2(x, tick_top),
            to: pos2(x, baseline),
            style: stroke,
        });
        primitives.push(ScenePrimitive::Text {
            text: format!("{:.*}", precision, distance),
            anchor: pos2(x, tick_top - view.device(2.0)),
            align: Align2::CENTER_BOTTOM,
            size: view.device(style.font_size),
            color: style.tick_color,
        });
    }

    TreeScene { size, primitives }
}
