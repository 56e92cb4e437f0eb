use egui::{pos2, Pos2, Response, Vec2};
use log::debug;

use super::assembly::TreeAssembly;
use super::scene::ViewTransform;

const WHEEL_ZOOM_SPEED: f32 = 0.002;

/// Pointer input in device pixels relative to the body canvas origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Move(Pos2),
    Click(Pos2),
    DoubleClick(Pos2),
    /// `delta` follows egui: positive y scrolls content down.
    Wheel {
        at: Pos2,
        delta: Vec2,
        zoom_modifier: bool,
    },
    DragStart(Pos2),
    DragMove(Pos2),
    DragEnd,
    Leave,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractionAction {
    /// Leaves under the hovered node.
    Highlight(Vec<String>),
    ClearHighlight,
    /// Leaves under the clicked node.
    Select(Vec<String>),
    ZoomInto(String),
    ViewChanged(ViewTransform),
}

#[derive(Debug, Clone, Copy)]
struct DragState {
    origin: Pos2,
    scroll_x: f32,
    scroll_y: f32,
}

/// Pointer controller for the tree body. It owns its attach/detach lifecycle
/// and its drag state, so redraws or layout swaps never interrupt a live drag.
#[derive(Debug, Clone)]
pub struct TreeInteraction {
    attached: bool,
    view: ViewTransform,
    viewport: Vec2,
    content_height: f32,
    max_zoom: f32,
    drag: Option<DragState>,
    hovered: Option<String>,
}

impl TreeInteraction {
    pub fn new(view: ViewTransform) -> Self {
        Self {
            attached: false,
            view,
            viewport: Vec2::ZERO,
            content_height: 0.0,
            max_zoom: 50.0,
            drag: None,
            hovered: None,
        }
    }

    pub fn attach(&mut self) {
        self.attached = true;
    }

    pub fn detach(&mut self) {
        self.attached = false;
        self.drag = None;
        self.hovered = None;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn view(&self) -> ViewTransform {
        self.view
    }

    /// Replace the view, e.g. after a new assembly. A drag in progress continues.
    pub fn set_view(&mut self, view: ViewTransform) {
        self.view = view;
        self.clamp_scroll();
    }

    /// Visible canvas size and full unzoomed content height, both in canvas pixels.
    pub fn set_bounds(&mut self, viewport: Vec2, content_height: f32) {
        self.viewport = viewport;
        self.content_height = content_height;
        self.clamp_scroll();
    }

    pub fn set_max_zoom(&mut self, max_zoom: f32) {
        self.max_zoom = max_zoom.max(1.0);
    }

    pub fn handle(&mut self, assembly: &TreeAssembly, event: PointerEvent) -> Vec<InteractionAction> {
        if !self.attached {
            return Vec::new();
        }

        match event {
            PointerEvent::Move(at) => {
                if self.drag.is_some() {
                    return Vec::new();
                }
                let hit = assembly.hit_test(self.view.to_canvas(at));
                let name = hit.map(|node| node.name.clone());
                if name == self.hovered {
                    return Vec::new();
                }
                self.hovered = name;
                match hit {
                    Some(node) => vec![InteractionAction::Highlight(node.sub_tree_names.clone())],
                    None => vec![InteractionAction::ClearHighlight],
                }
            }
            PointerEvent::Leave => match self.hovered.take() {
                Some(_) => vec![InteractionAction::ClearHighlight],
                None => Vec::new(),
            },
            PointerEvent::Click(at) => assembly
                .hit_test(self.view.to_canvas(at))
                .map(|node| vec![InteractionAction::Select(node.sub_tree_names.clone())])
                .unwrap_or_default(),
            PointerEvent::DoubleClick(at) => assembly
                .hit_test(self.view.to_canvas(at))
                .filter(|node| !node.is_leaf())
                .map(|node| vec![InteractionAction::ZoomInto(node.name.clone())])
                .unwrap_or_default(),
            PointerEvent::Wheel {
                at,
                delta,
                zoom_modifier,
            } => {
                if zoom_modifier {
                    self.zoom_around(at, (delta.y * WHEEL_ZOOM_SPEED).exp());
                } else {
                    let dpr = self.view.device_pixel_ratio.max(f32::EPSILON);
                    self.view.scroll_y -= delta.y / dpr;
                    self.view.scroll_x -= delta.x / dpr;
                    self.clamp_scroll();
                }
                vec![InteractionAction::ViewChanged(self.view)]
            }
            PointerEvent::DragStart(at) => {
                self.drag = Some(DragState {
                    origin: at,
                    scroll_x: self.view.scroll_x,
                    scroll_y: self.view.scroll_y,
                });
                Vec::new()
            }
            PointerEvent::DragMove(at) => {
                let Some(drag) = self.drag else {
                    return Vec::new();
                };
                let dpr = self.view.device_pixel_ratio.max(f32::EPSILON);
                let moved = (at - drag.origin) / dpr;
                self.view.scroll_x = drag.scroll_x - moved.x;
                self.view.scroll_y = drag.scroll_y - moved.y;
                self.clamp_scroll();
                vec![InteractionAction::ViewChanged(self.view)]
            }
            PointerEvent::DragEnd => {
                self.drag = None;
                Vec::new()
            }
        }
    }

    /// Change zoom by `factor`, keeping the canvas point under `at` in place.
    fn zoom_around(&mut self, at: Pos2, factor: f32) {
        let anchor = self.view.to_canvas(at);
        let zoom = (self.view.zoom * factor).clamp(1.0, self.max_zoom);
        let dpr = self.view.device_pixel_ratio.max(f32::EPSILON);
        let half = self.view.width * 0.5;

        self.view.zoom = zoom;
        self.view.scroll_x = (anchor.x - half) * zoom + half - at.x / dpr;
        self.view.scroll_y = anchor.y * zoom - at.y / dpr;
        self.clamp_scroll();
        debug!("Tree zoom {zoom:.2} around ({:.1}, {:.1})", anchor.x, anchor.y);
    }

    fn clamp_scroll(&mut self) {
        let zoom = self.view.zoom;
        let overflow_x = self.view.width * 0.5 * (zoom - 1.0).max(0.0);
        self.view.scroll_x = self.view.scroll_x.clamp(-overflow_x, overflow_x);

        let max_y = (self.content_height * zoom - self.viewport.y).max(0.0);
        self.view.scroll_y = self.view.scroll_y.clamp(0.0, max_y);
    }
}

/// Debounces redraws: at most one frame is pending and a new request replaces
/// the previous one.
#[derive(Debug)]
pub struct RedrawScheduler<T> {
    pending: Option<T>,
    superseded: u64,
}

impl<T> Default for RedrawScheduler<T> {
    fn default() -> Self {
        Self {
            pending: None,
            superseded: 0,
        }
    }
}

impl<T> RedrawScheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, request: T) {
        if self.pending.replace(request).is_some() {
            self.superseded += 1;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Called on the animation tick.
    pub fn take_frame(&mut self) -> Option<T> {
        self.pending.take()
    }

    pub fn superseded(&self) -> u64 {
        self.superseded
    }
}

/// Keeps the table and the tree showing the same leaf row at the top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollLink {
    pub tree_row_height: f32,
    pub table_row_height: f32,
}

impl ScrollLink {
    pub fn table_offset(&self, tree_scroll_y: f32, tree_zoom: f32) -> f32 {
        let tree_row = self.tree_row_height * tree_zoom.max(f32::EPSILON);
        tree_scroll_y / tree_row * self.table_row_height
    }

    pub fn tree_offset(&self, table_scroll_y: f32, tree_zoom: f32) -> f32 {
        let table_row = self.table_row_height.max(f32::EPSILON);
        table_scroll_y / table_row * self.tree_row_height * tree_zoom
    }

    pub fn first_visible_row(&self, tree_scroll_y: f32, tree_zoom: f32) -> usize {
        let tree_row = self.tree_row_height * tree_zoom.max(f32::EPSILON);
        (tree_scroll_y / tree_row).floor().max(0.0) as usize
    }
}

/// Translate this frame's egui input on the tree body into pointer events.
pub fn pointer_events(response: &Response) -> Vec<PointerEvent> {
    let ctx = &response.ctx;
    let ppp = ctx.pixels_per_point();
    let local = |p: Pos2| pos2((p.x - response.rect.min.x) * ppp, (p.y - response.rect.min.y) * ppp);

    let mut events = Vec::new();
    let Some(pointer) = response.hover_pos().or_else(|| response.interact_pointer_pos()) else {
        if !response.contains_pointer() {
            events.push(PointerEvent::Leave);
        }
        if response.drag_stopped() {
            events.push(PointerEvent::DragEnd);
        }
        return events;
    };
    let at = local(pointer);

    if response.drag_started() {
        events.push(PointerEvent::DragStart(at));
    } else if response.dragged() {
        events.push(PointerEvent::DragMove(at));
    }
    if response.drag_stopped() {
        events.push(PointerEvent::DragEnd);
    }

    if response.double_clicked() {
        events.push(PointerEvent::DoubleClick(at));
    } else if response.clicked() {
        events.push(PointerEvent::Click(at));
    }

    if response.hovered() {
        let (delta, zoom_modifier) = ctx.input(|input| (input.smooth_scroll_delta, input.modifiers.command));
        if delta != Vec2::ZERO {
            events.push(PointerEvent::Wheel {
                at,
                delta: delta * ppp,
                zoom_modifier,
            });
        }
        events.push(PointerEvent::Move(at));
    }

    events
}
