//! Interactive tools: press → drag* → release state machines that mutate
//! the document and emit history commands.
//!
//! Each tool implements the three-method [`Tool`] capability independently;
//! shared mechanics (stroke tracking, stamp interpolation, Bresenham) are
//! free helpers. Tools hold transient per-stroke state only — nothing here
//! is part of the persisted document. A tool that needs an active layer
//! silently no-ops when the document has none; that is a user-facing guard,
//! not an error.

use image::Rgba;

use crate::buffer::{PixelBuffer, TRANSPARENT};
use crate::canvas::{CanvasState, SelectionShape};
use crate::error::EngineError;
use crate::geometry::{PixelRect, Point};
use crate::history::{Command, LayerOpCommand, LayerOperation, PixelPatch, StrokeCommand};
use crate::plugins::ToolRegistry;

/// One pointer event in document space. `pressure` is stylus pressure in
/// (0, 1] when the input device reports it.
#[derive(Clone, Copy, Debug)]
pub struct PointerInput {
    pub x: f32,
    pub y: f32,
    pub pressure: Option<f32>,
}

impl PointerInput {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, pressure: None }
    }

    pub fn with_pressure(x: f32, y: f32, pressure: f32) -> Self {
        Self { x, y, pressure: Some(pressure) }
    }

    fn pos(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

/// Shared tool parameters, owned by the controller and passed to the active
/// tool on every event.
#[derive(Clone, Debug)]
pub struct ToolSettings {
    /// Brush/eraser diameter in pixels.
    pub size: f32,
    /// 1.0 = hard edge, lower values feather the stamp rim.
    pub hardness: f32,
    /// Stamp spacing as a fraction of the diameter.
    pub spacing: f32,
    pub primary_color: Rgba<u8>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            size: 16.0,
            hardness: 1.0,
            spacing: 0.25,
            primary_color: Rgba([0, 0, 0, 255]),
        }
    }
}

/// The tool capability: consume pointer events, mutate the document, hand a
/// finished command back on release for the caller to record.
pub trait Tool: Send {
    fn name(&self) -> &'static str;
    fn on_press(&mut self, doc: &mut CanvasState, settings: &ToolSettings, input: PointerInput);
    fn on_drag(&mut self, doc: &mut CanvasState, settings: &ToolSettings, input: PointerInput);
    fn on_release(
        &mut self,
        doc: &mut CanvasState,
        settings: &ToolSettings,
        input: PointerInput,
    ) -> Option<Box<dyn Command>>;
}

// ============================================================================
// STROKE TRACKER — before/after patch capture shared by the paint tools
// ============================================================================

/// Snapshots the active layer at stroke start and accumulates the
/// document-space dirty bounds, so release can build one compact
/// before/after command instead of per-drag-step records.
pub struct StrokeTracker {
    layer_index: usize,
    pre_stroke: PixelBuffer,
    bounds: PixelRect,
    description: String,
}

impl StrokeTracker {
    /// `None` when the document has no active layer.
    pub fn begin(doc: &CanvasState, description: &str) -> Option<Self> {
        let layer_index = doc.active_layer_index?;
        let layer = doc.layers.get(layer_index)?;
        Some(Self {
            layer_index,
            pre_stroke: layer.pixels.clone(),
            bounds: PixelRect::EMPTY,
            description: description.to_string(),
        })
    }

    pub fn expand(&mut self, rect: PixelRect) {
        self.bounds = self.bounds.union(&rect);
    }

    pub fn bounds(&self) -> PixelRect {
        self.bounds
    }

    /// Build the stroke command from the pre-stroke snapshot and the layer's
    /// current pixels. `None` when the stroke never touched the layer.
    pub fn finish(self, doc: &CanvasState) -> Option<Box<dyn Command>> {
        if self.bounds.is_empty() {
            return None;
        }
        let layer = doc.layers.get(self.layer_index)?;
        let local = self.bounds.translated(
            -layer.offset.x,
            -layer.offset.y,
            layer.pixels.width(),
            layer.pixels.height(),
        );
        if local.is_empty() {
            return None;
        }
        let before = PixelPatch::from_buffer(&self.pre_stroke, self.layer_index, local);
        let after = PixelPatch::capture(doc, self.layer_index, local)?;
        Some(Box::new(StrokeCommand::new(self.description, before, after)))
    }
}

// ============================================================================
// STAMPING HELPERS
// ============================================================================

fn radius_for(size: f32, pressure: Option<f32>) -> f32 {
    let r = size / 2.0;
    match pressure {
        Some(p) => r * p.clamp(0.05, 1.0).sqrt(),
        None => r,
    }
}

/// Stamp a round dab into the stroke buffer with max-alpha accumulation
/// (repeated passes over the same pixel never stack opacity within one
/// stroke). Returns the document-space dirty rect.
fn stamp_round(
    target: &mut PixelBuffer,
    cx: f32,
    cy: f32,
    radius: f32,
    hardness: f32,
    color: Rgba<u8>,
) -> PixelRect {
    let rect = PixelRect::around(cx, cy, radius, target.width(), target.height());
    if rect.is_empty() || radius <= 0.0 {
        return PixelRect::EMPTY;
    }
    let radius_sq = radius * radius;
    let hard_r = radius * hardness.clamp(0.0, 1.0);
    let mut dirty = PixelRect::EMPTY;

    for y in rect.min_y..rect.max_y {
        for x in rect.min_x..rect.max_x {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let dist_sq = dx * dx + dy * dy;
            if dist_sq > radius_sq {
                continue;
            }
            let alpha = if hard_r >= radius {
                1.0
            } else {
                let dist = dist_sq.sqrt();
                if dist <= hard_r {
                    1.0
                } else {
                    1.0 - (dist - hard_r) / (radius - hard_r)
                }
            };
            let a = (alpha * color[3] as f32).round().clamp(0.0, 255.0) as u8;
            if a == 0 {
                continue;
            }
            let existing = target.pixel_unchecked(x, y);
            if a > existing[3] {
                target.set_pixel_unchecked(x, y, Rgba([color[0], color[1], color[2], a]));
                dirty = dirty.union(&PixelRect::new(x, y, x + 1, y + 1));
            }
        }
    }
    dirty
}

/// Stamp along the segment from `from` to `to` at `spacing × diameter`
/// steps, so fast pointer motion leaves no gaps.
fn stamp_round_segment(
    target: &mut PixelBuffer,
    from: (f32, f32),
    to: (f32, f32),
    radius: f32,
    hardness: f32,
    spacing: f32,
    color: Rgba<u8>,
) -> PixelRect {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let dist = (dx * dx + dy * dy).sqrt();
    let step = (radius * 2.0 * spacing).max(1.0);
    let steps = (dist / step).ceil().max(1.0) as u32;

    let mut dirty = PixelRect::EMPTY;
    for i in 1..=steps {
        let t = i as f32 / steps as f32;
        let px = from.0 + dx * t;
        let py = from.1 + dy * t;
        dirty = dirty.union(&stamp_round(target, px, py, radius, hardness, color));
    }
    dirty
}

/// Write one hard pixel (max-alpha).
fn stamp_pixel(target: &mut PixelBuffer, x: i32, y: i32, color: Rgba<u8>) -> PixelRect {
    if x < 0 || y < 0 {
        return PixelRect::EMPTY;
    }
    let (x, y) = (x as u32, y as u32);
    if !target.contains(x, y) {
        return PixelRect::EMPTY;
    }
    let existing = target.pixel_unchecked(x, y);
    if color[3] >= existing[3] {
        target.set_pixel_unchecked(x, y, color);
    }
    PixelRect::new(x, y, x + 1, y + 1)
}

/// Bresenham line of hard pixels from `from` to `to`.
fn stamp_pixel_line(
    target: &mut PixelBuffer,
    from: (f32, f32),
    to: (f32, f32),
    color: Rgba<u8>,
) -> PixelRect {
    let mut x0 = from.0.floor() as i32;
    let mut y0 = from.1.floor() as i32;
    let x1 = to.0.floor() as i32;
    let y1 = to.1.floor() as i32;

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;

    let mut dirty = PixelRect::EMPTY;
    loop {
        dirty = dirty.union(&stamp_pixel(target, x0, y0, color));
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
    dirty
}

// ============================================================================
// PAINT TOOLS — Brush, Eraser, Pencil
// ============================================================================

#[derive(Default)]
pub struct BrushTool {
    tracker: Option<StrokeTracker>,
    last_pos: Option<(f32, f32)>,
}

impl BrushTool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tool for BrushTool {
    fn name(&self) -> &'static str {
        "Brush"
    }

    fn on_press(&mut self, doc: &mut CanvasState, settings: &ToolSettings, input: PointerInput) {
        self.tracker = StrokeTracker::begin(doc, "Brush Stroke");
        if self.tracker.is_none() {
            return;
        }
        doc.begin_stroke_preview(false, false);
        let r = radius_for(settings.size, input.pressure);
        if let Some(pv) = doc.preview_mut() {
            let rect =
                stamp_round(pv, input.x, input.y, r, settings.hardness, settings.primary_color);
            if let Some(t) = self.tracker.as_mut() {
                t.expand(rect);
            }
        }
        self.last_pos = Some(input.pos());
    }

    fn on_drag(&mut self, doc: &mut CanvasState, settings: &ToolSettings, input: PointerInput) {
        if self.tracker.is_none() {
            return;
        }
        let Some(last) = self.last_pos else { return };
        let r = radius_for(settings.size, input.pressure);
        if let Some(pv) = doc.preview_mut() {
            let rect = stamp_round_segment(
                pv,
                last,
                input.pos(),
                r,
                settings.hardness,
                settings.spacing,
                settings.primary_color,
            );
            if let Some(t) = self.tracker.as_mut() {
                t.expand(rect);
            }
        }
        self.last_pos = Some(input.pos());
    }

    fn on_release(
        &mut self,
        doc: &mut CanvasState,
        _settings: &ToolSettings,
        _input: PointerInput,
    ) -> Option<Box<dyn Command>> {
        self.last_pos = None;
        let tracker = self.tracker.take()?;
        doc.commit_stroke_preview(tracker.bounds());
        tracker.finish(doc)
    }
}

#[derive(Default)]
pub struct EraserTool {
    tracker: Option<StrokeTracker>,
    last_pos: Option<(f32, f32)>,
}

impl EraserTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The eraser stamps an opaque mask; only its alpha matters at commit.
    const MASK: Rgba<u8> = Rgba([0, 0, 0, 255]);
}

impl Tool for EraserTool {
    fn name(&self) -> &'static str {
        "Eraser"
    }

    fn on_press(&mut self, doc: &mut CanvasState, settings: &ToolSettings, input: PointerInput) {
        self.tracker = StrokeTracker::begin(doc, "Eraser Stroke");
        if self.tracker.is_none() {
            return;
        }
        doc.begin_stroke_preview(true, false);
        let r = radius_for(settings.size, input.pressure);
        if let Some(pv) = doc.preview_mut() {
            let rect = stamp_round(pv, input.x, input.y, r, settings.hardness, Self::MASK);
            if let Some(t) = self.tracker.as_mut() {
                t.expand(rect);
            }
        }
        self.last_pos = Some(input.pos());
    }

    fn on_drag(&mut self, doc: &mut CanvasState, settings: &ToolSettings, input: PointerInput) {
        if self.tracker.is_none() {
            return;
        }
        let Some(last) = self.last_pos else { return };
        let r = radius_for(settings.size, input.pressure);
        if let Some(pv) = doc.preview_mut() {
            let rect = stamp_round_segment(
                pv,
                last,
                input.pos(),
                r,
                settings.hardness,
                settings.spacing,
                Self::MASK,
            );
            if let Some(t) = self.tracker.as_mut() {
                t.expand(rect);
            }
        }
        self.last_pos = Some(input.pos());
    }

    fn on_release(
        &mut self,
        doc: &mut CanvasState,
        _settings: &ToolSettings,
        _input: PointerInput,
    ) -> Option<Box<dyn Command>> {
        self.last_pos = None;
        let tracker = self.tracker.take()?;
        doc.commit_stroke_preview(tracker.bounds());
        tracker.finish(doc)
    }
}

#[derive(Default)]
pub struct PencilTool {
    tracker: Option<StrokeTracker>,
    last_pos: Option<(f32, f32)>,
}

impl PencilTool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tool for PencilTool {
    fn name(&self) -> &'static str {
        "Pencil"
    }

    fn on_press(&mut self, doc: &mut CanvasState, settings: &ToolSettings, input: PointerInput) {
        self.tracker = StrokeTracker::begin(doc, "Pencil Stroke");
        if self.tracker.is_none() {
            return;
        }
        doc.begin_stroke_preview(false, false);
        if let Some(pv) = doc.preview_mut() {
            let rect = stamp_pixel(
                pv,
                input.x.floor() as i32,
                input.y.floor() as i32,
                settings.primary_color,
            );
            if let Some(t) = self.tracker.as_mut() {
                t.expand(rect);
            }
        }
        self.last_pos = Some(input.pos());
    }

    fn on_drag(&mut self, doc: &mut CanvasState, settings: &ToolSettings, input: PointerInput) {
        if self.tracker.is_none() {
            return;
        }
        let Some(last) = self.last_pos else { return };
        if let Some(pv) = doc.preview_mut() {
            let rect = stamp_pixel_line(pv, last, input.pos(), settings.primary_color);
            if let Some(t) = self.tracker.as_mut() {
                t.expand(rect);
            }
        }
        self.last_pos = Some(input.pos());
    }

    fn on_release(
        &mut self,
        doc: &mut CanvasState,
        _settings: &ToolSettings,
        _input: PointerInput,
    ) -> Option<Box<dyn Command>> {
        self.last_pos = None;
        let tracker = self.tracker.take()?;
        doc.commit_stroke_preview(tracker.bounds());
        tracker.finish(doc)
    }
}

// ============================================================================
// MOVE TOOL — drags the active layer's origin offset
// ============================================================================

#[derive(Default)]
pub struct MoveTool {
    start: Option<(f32, f32)>,
    /// (layer index, offset at press)
    orig: Option<(usize, Point)>,
}

impl MoveTool {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_delta(&self, doc: &mut CanvasState, input: PointerInput) {
        if let (Some(start), Some((index, orig))) = (self.start, self.orig) {
            let dx = (input.x - start.0).round() as i32;
            let dy = (input.y - start.1).round() as i32;
            if let Some(layer) = doc.layers.get_mut(index) {
                layer.offset = Point::new(orig.x + dx, orig.y + dy);
            }
        }
    }
}

impl Tool for MoveTool {
    fn name(&self) -> &'static str {
        "Move"
    }

    fn on_press(&mut self, doc: &mut CanvasState, _settings: &ToolSettings, input: PointerInput) {
        let Some(index) = doc.active_layer_index else {
            return;
        };
        self.orig = doc.layers.get(index).map(|l| (index, l.offset));
        self.start = Some(input.pos());
    }

    fn on_drag(&mut self, doc: &mut CanvasState, _settings: &ToolSettings, input: PointerInput) {
        self.apply_delta(doc, input);
    }

    fn on_release(
        &mut self,
        doc: &mut CanvasState,
        _settings: &ToolSettings,
        input: PointerInput,
    ) -> Option<Box<dyn Command>> {
        self.apply_delta(doc, input);
        self.start = None;
        let (index, old) = self.orig.take()?;
        let new = doc.layers.get(index)?.offset;
        if new == old {
            return None;
        }
        // One offset-change record per drag, not one per drag step.
        Some(Box::new(LayerOpCommand::new(LayerOperation::Offset { index, old, new })))
    }
}

// ============================================================================
// MOVE SELECTION TOOL — floats the selected pixels and re-stamps them
// ============================================================================

struct FloatingMove {
    tracker: StrokeTracker,
    /// Lifted pixels, at their original document positions.
    floating: PixelBuffer,
    src_bounds: PixelRect,
    start: (f32, f32),
    delta: (i32, i32),
}

#[derive(Default)]
pub struct MoveSelectionTool {
    state: Option<FloatingMove>,
}

impl MoveSelectionTool {
    pub fn new() -> Self {
        Self::default()
    }

    fn delta_for(start: (f32, f32), input: PointerInput) -> (i32, i32) {
        (
            (input.x - start.0).round() as i32,
            (input.y - start.1).round() as i32,
        )
    }

    /// Rewrite the preview as the floating pixels shifted by `delta`.
    fn refresh_preview(doc: &mut CanvasState, st: &FloatingMove) {
        let (w, h) = (doc.width(), doc.height());
        let Some(pv) = doc.preview_mut() else { return };
        pv.fill(TRANSPARENT);
        for y in st.src_bounds.min_y..st.src_bounds.max_y {
            for x in st.src_bounds.min_x..st.src_bounds.max_x {
                let p = st.floating.pixel_unchecked(x, y);
                if p[3] == 0 {
                    continue;
                }
                let nx = x as i64 + st.delta.0 as i64;
                let ny = y as i64 + st.delta.1 as i64;
                if nx >= 0 && ny >= 0 && nx < w as i64 && ny < h as i64 {
                    pv.set_pixel_unchecked(nx as u32, ny as u32, p);
                }
            }
        }
    }
}

impl Tool for MoveSelectionTool {
    fn name(&self) -> &'static str {
        "Move Selection"
    }

    fn on_press(&mut self, doc: &mut CanvasState, _settings: &ToolSettings, input: PointerInput) {
        if !doc.has_selection() {
            return;
        }
        let Some(tracker) = StrokeTracker::begin(doc, "Move Selection") else {
            return;
        };
        let Some(active) = doc.active_layer_index else {
            return;
        };
        let Some(shape) = doc.selection().cloned() else {
            return;
        };

        // Pass 1: find the selected pixels that actually live on the layer.
        let (bx0, by0, bx1, by1) = shape.bounds(doc.width(), doc.height());
        let mut lifted: Vec<(u32, u32, Rgba<u8>)> = Vec::new();
        let mut src_bounds = PixelRect::EMPTY;
        if bx0 <= bx1 && by0 <= by1 {
            let layer = &doc.layers[active];
            for y in by0..=by1 {
                for x in bx0..=bx1 {
                    if !doc.mask_allows(x, y) {
                        continue;
                    }
                    let Some((lx, ly)) = layer.doc_to_local(x as i32, y as i32) else {
                        continue;
                    };
                    let px = layer.pixels.pixel_unchecked(lx, ly);
                    if px[3] == 0 {
                        continue;
                    }
                    lifted.push((x, y, px));
                    src_bounds = src_bounds.union(&PixelRect::new(x, y, x + 1, y + 1));
                }
            }
        }
        if src_bounds.is_empty() {
            return;
        }

        // Pass 2: cut them out of the layer into the floating buffer.
        let mut floating = PixelBuffer::new(doc.width(), doc.height());
        let layer = &mut doc.layers[active];
        for &(x, y, px) in &lifted {
            floating.set_pixel_unchecked(x, y, px);
            if let Some((lx, ly)) = layer.doc_to_local(x as i32, y as i32) {
                layer.pixels.set_pixel_unchecked(lx, ly, TRANSPARENT);
            }
        }

        // The floating content may travel outside the selection mask.
        doc.begin_stroke_preview(false, true);
        let st = FloatingMove {
            tracker,
            floating,
            src_bounds,
            start: input.pos(),
            delta: (0, 0),
        };
        Self::refresh_preview(doc, &st);
        self.state = Some(st);
    }

    fn on_drag(&mut self, doc: &mut CanvasState, _settings: &ToolSettings, input: PointerInput) {
        if let Some(st) = self.state.as_mut() {
            st.delta = Self::delta_for(st.start, input);
        }
        if let Some(st) = self.state.as_ref() {
            Self::refresh_preview(doc, st);
        }
    }

    fn on_release(
        &mut self,
        doc: &mut CanvasState,
        _settings: &ToolSettings,
        input: PointerInput,
    ) -> Option<Box<dyn Command>> {
        let mut st = self.state.take()?;
        st.delta = Self::delta_for(st.start, input);
        Self::refresh_preview(doc, &st);

        let (w, h) = (doc.width(), doc.height());
        let dst_bounds = st.src_bounds.translated(st.delta.0, st.delta.1, w, h);
        let total = st.src_bounds.union(&dst_bounds);
        st.tracker.expand(total);
        doc.commit_stroke_preview(total);
        doc.translate_selection(st.delta.0, st.delta.1);
        st.tracker.finish(doc)
    }
}

// ============================================================================
// SELECTION TOOLS — rectangle and ellipse
// ============================================================================

/// Anchor/corner drag state shared by both selection shapes.
#[derive(Default)]
struct SelectionDrag {
    anchor: Option<(f32, f32)>,
    current: Option<(f32, f32)>,
}

impl SelectionDrag {
    fn press(&mut self, input: PointerInput) {
        self.anchor = Some(input.pos());
        self.current = Some(input.pos());
    }

    fn drag(&mut self, input: PointerInput) {
        if self.anchor.is_some() {
            self.current = Some(input.pos());
        }
    }

    /// Normalized bounds: (x0, y0, x1, y1) with non-negative extents.
    /// `None` when no drag is in progress or the gesture was a bare click
    /// (which clears the selection instead).
    fn release(&mut self, input: PointerInput) -> Option<(f32, f32, f32, f32)> {
        let anchor = self.anchor.take()?;
        self.current = None;
        let (x0, x1) = (anchor.0.min(input.x), anchor.0.max(input.x));
        let (y0, y1) = (anchor.1.min(input.y), anchor.1.max(input.y));
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            return None;
        }
        Some((x0, y0, x1, y1))
    }
}

/// Clamp normalized float bounds to inclusive pixel bounds on the canvas.
/// `None` when the rectangle lies entirely off-canvas.
fn pixel_bounds(
    (x0, y0, x1, y1): (f32, f32, f32, f32),
    w: u32,
    h: u32,
) -> Option<(u32, u32, u32, u32)> {
    if x1 < 0.0 || y1 < 0.0 || x0 >= w as f32 || y0 >= h as f32 || w == 0 || h == 0 {
        return None;
    }
    let min_x = (x0.max(0.0).floor() as u32).min(w - 1);
    let min_y = (y0.max(0.0).floor() as u32).min(h - 1);
    let max_x = ((x1.ceil() as u32).saturating_sub(1)).clamp(min_x, w - 1);
    let max_y = ((y1.ceil() as u32).saturating_sub(1)).clamp(min_y, h - 1);
    Some((min_x, min_y, max_x, max_y))
}

#[derive(Default)]
pub struct RectangleSelectionTool {
    drag: SelectionDrag,
}

impl RectangleSelectionTool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tool for RectangleSelectionTool {
    fn name(&self) -> &'static str {
        "Rectangle Selection"
    }

    fn on_press(&mut self, _doc: &mut CanvasState, _settings: &ToolSettings, input: PointerInput) {
        self.drag.press(input);
    }

    fn on_drag(&mut self, _doc: &mut CanvasState, _settings: &ToolSettings, input: PointerInput) {
        self.drag.drag(input);
    }

    fn on_release(
        &mut self,
        doc: &mut CanvasState,
        _settings: &ToolSettings,
        input: PointerInput,
    ) -> Option<Box<dyn Command>> {
        match self
            .drag
            .release(input)
            .and_then(|b| pixel_bounds(b, doc.width(), doc.height()))
        {
            Some((min_x, min_y, max_x, max_y)) => {
                doc.set_selection(SelectionShape::Rectangle { min_x, min_y, max_x, max_y });
            }
            None => doc.clear_selection(),
        }
        // Selection changes are transient view state — nothing for history.
        None
    }
}

#[derive(Default)]
pub struct EllipseSelectionTool {
    drag: SelectionDrag,
}

impl EllipseSelectionTool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tool for EllipseSelectionTool {
    fn name(&self) -> &'static str {
        "Ellipse Selection"
    }

    fn on_press(&mut self, _doc: &mut CanvasState, _settings: &ToolSettings, input: PointerInput) {
        self.drag.press(input);
    }

    fn on_drag(&mut self, _doc: &mut CanvasState, _settings: &ToolSettings, input: PointerInput) {
        self.drag.drag(input);
    }

    fn on_release(
        &mut self,
        doc: &mut CanvasState,
        _settings: &ToolSettings,
        input: PointerInput,
    ) -> Option<Box<dyn Command>> {
        match self.drag.release(input) {
            Some((x0, y0, x1, y1)) => {
                doc.set_selection(SelectionShape::Ellipse {
                    cx: (x0 + x1) / 2.0,
                    cy: (y0 + y1) / 2.0,
                    rx: (x1 - x0) / 2.0,
                    ry: (y1 - y0) / 2.0,
                });
            }
            None => doc.clear_selection(),
        }
        None
    }
}

// ============================================================================
// TOOL CONTROLLER — dispatch, single-active enforcement, implicit release
// ============================================================================

/// Owns the registry and the active tool instance. Only one tool can hold
/// an in-progress stroke per document; switching tools mid-stroke forces an
/// implicit release that finalizes the pending command first.
pub struct ToolController {
    registry: ToolRegistry,
    active_id: String,
    active: Box<dyn Tool>,
    stroke_active: bool,
    last_input: PointerInput,
    pub settings: ToolSettings,
}

impl Default for ToolController {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolController {
    pub fn new() -> Self {
        let registry = ToolRegistry::with_builtins();
        let active = registry
            .create(ToolRegistry::DEFAULT_TOOL)
            .expect("with_builtins always registers the brush tool");
        Self {
            registry,
            active_id: ToolRegistry::DEFAULT_TOOL.to_string(),
            active,
            stroke_active: false,
            last_input: PointerInput::new(0.0, 0.0),
            settings: ToolSettings::default(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Register additional tools (the plugin surface).
    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn active_tool_id(&self) -> &str {
        &self.active_id
    }

    pub fn active_tool_name(&self) -> &'static str {
        self.active.name()
    }

    pub fn stroke_in_progress(&self) -> bool {
        self.stroke_active
    }

    /// Activate a registered tool, replacing the current instance. Fails
    /// with `UnknownTool` for unregistered ids. Callers must
    /// [`Self::finalize`] any in-progress stroke first (the project wrapper
    /// does).
    pub fn activate(&mut self, id: &str) -> Result<(), EngineError> {
        let Some(tool) = self.registry.create(id) else {
            return Err(EngineError::UnknownTool(id.to_string()));
        };
        self.active_id = id.to_string();
        self.active = tool;
        Ok(())
    }

    pub fn on_press(&mut self, doc: &mut CanvasState, input: PointerInput) {
        self.last_input = input;
        self.stroke_active = true;
        self.active.on_press(doc, &self.settings, input);
    }

    pub fn on_drag(&mut self, doc: &mut CanvasState, input: PointerInput) {
        if !self.stroke_active {
            return;
        }
        self.last_input = input;
        self.active.on_drag(doc, &self.settings, input);
    }

    pub fn on_release(
        &mut self,
        doc: &mut CanvasState,
        input: PointerInput,
    ) -> Option<Box<dyn Command>> {
        self.stroke_active = false;
        self.last_input = input;
        self.active.on_release(doc, &self.settings, input)
    }

    /// Implicit release at the last known pointer position; used when the
    /// active tool changes (or undo fires) mid-stroke.
    pub fn finalize(&mut self, doc: &mut CanvasState) -> Option<Box<dyn Command>> {
        if !self.stroke_active {
            return None;
        }
        self.stroke_active = false;
        self.active.on_release(doc, &self.settings, self.last_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Layer;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    /// 64×64 document with a single fully transparent layer.
    fn blank_doc() -> CanvasState {
        let layer = Layer::new("Layer".into(), 64, 64, TRANSPARENT);
        CanvasState::from_parts(64, 64, vec![layer], Some(0))
    }

    fn red_settings(size: f32) -> ToolSettings {
        ToolSettings { size, hardness: 1.0, spacing: 0.25, primary_color: RED }
    }

    #[test]
    fn brush_stroke_paints_line_and_undoes() {
        let mut doc = blank_doc();
        let settings = red_settings(4.0);
        let mut brush = BrushTool::new();

        brush.on_press(&mut doc, &settings, PointerInput::new(10.0, 10.0));
        brush.on_drag(&mut doc, &settings, PointerInput::new(20.0, 10.0));
        let cmd = brush
            .on_release(&mut doc, &settings, PointerInput::new(20.0, 10.0))
            .expect("stroke produces a command");

        let out = doc.composite();
        for x in [10, 15, 20] {
            assert_eq!(out.get(x, 10).unwrap(), RED, "stroke core at x={}", x);
        }
        assert_eq!(out.get(15, 14).unwrap(), TRANSPARENT);
        assert_eq!(out.get(40, 40).unwrap(), TRANSPARENT);

        cmd.undo(&mut doc);
        assert!(doc.composite().is_fully_transparent());

        cmd.redo(&mut doc);
        assert_eq!(doc.composite().get(15, 10).unwrap(), RED);
    }

    #[test]
    fn brush_respects_selection_mask() {
        let mut doc = blank_doc();
        doc.set_selection(SelectionShape::Rectangle { min_x: 0, min_y: 0, max_x: 14, max_y: 63 });
        let settings = red_settings(6.0);
        let mut brush = BrushTool::new();

        brush.on_press(&mut doc, &settings, PointerInput::new(14.0, 20.0));
        brush.on_release(&mut doc, &settings, PointerInput::new(14.0, 20.0));

        let layer = &doc.layers[0].pixels;
        assert_eq!(layer.get(13, 20).unwrap(), RED);
        assert_eq!(layer.get(14, 20).unwrap(), RED);
        // Footprint overlapped the boundary; outside stays untouched.
        for x in 15..20 {
            assert_eq!(layer.get(x, 20).unwrap(), TRANSPARENT, "masked out at x={}", x);
        }
    }

    #[test]
    fn brush_on_empty_document_is_a_noop() {
        let mut doc = CanvasState::new_empty(32, 32);
        let settings = red_settings(4.0);
        let mut brush = BrushTool::new();
        brush.on_press(&mut doc, &settings, PointerInput::new(5.0, 5.0));
        brush.on_drag(&mut doc, &settings, PointerInput::new(9.0, 5.0));
        assert!(brush.on_release(&mut doc, &settings, PointerInput::new(9.0, 5.0)).is_none());
        assert!(doc.composite().is_fully_transparent());
    }

    #[test]
    fn pencil_draws_hard_diagonal() {
        let mut doc = blank_doc();
        let settings = red_settings(1.0);
        let mut pencil = PencilTool::new();
        pencil.on_press(&mut doc, &settings, PointerInput::new(0.0, 0.0));
        pencil.on_drag(&mut doc, &settings, PointerInput::new(5.0, 5.0));
        pencil.on_release(&mut doc, &settings, PointerInput::new(5.0, 5.0));

        let layer = &doc.layers[0].pixels;
        for i in 0..=5 {
            assert_eq!(layer.get(i, i).unwrap(), RED, "diagonal pixel {}", i);
        }
        assert_eq!(layer.get(0, 5).unwrap(), TRANSPARENT);
    }

    #[test]
    fn eraser_clears_painted_pixels() {
        let mut doc = blank_doc();
        doc.layers[0].pixels.fill(RED);
        let settings = red_settings(8.0);
        let mut eraser = EraserTool::new();
        eraser.on_press(&mut doc, &settings, PointerInput::new(32.0, 32.0));
        let cmd = eraser.on_release(&mut doc, &settings, PointerInput::new(32.0, 32.0)).unwrap();

        assert_eq!(doc.layers[0].pixels.get(32, 32).unwrap()[3], 0);
        assert_eq!(doc.layers[0].pixels.get(0, 0).unwrap(), RED);

        cmd.undo(&mut doc);
        assert_eq!(doc.layers[0].pixels.get(32, 32).unwrap(), RED);
    }

    #[test]
    fn pressure_shrinks_the_stamp() {
        let mut doc = blank_doc();
        let settings = red_settings(16.0);
        let mut brush = BrushTool::new();
        brush.on_press(&mut doc, &settings, PointerInput::with_pressure(32.0, 32.0, 0.1));
        brush.on_release(&mut doc, &settings, PointerInput::with_pressure(32.0, 32.0, 0.1));
        // Full radius would be 8; sqrt(0.1) scales it to ~2.5.
        assert_eq!(doc.layers[0].pixels.get(32, 32).unwrap(), RED);
        assert_eq!(doc.layers[0].pixels.get(32, 38).unwrap(), TRANSPARENT);
    }

    #[test]
    fn move_tool_records_single_offset_command() {
        let mut doc = blank_doc();
        let settings = ToolSettings::default();
        let mut tool = MoveTool::new();
        tool.on_press(&mut doc, &settings, PointerInput::new(5.0, 5.0));
        tool.on_drag(&mut doc, &settings, PointerInput::new(9.0, 6.0));
        tool.on_drag(&mut doc, &settings, PointerInput::new(12.0, 8.0));
        let cmd = tool.on_release(&mut doc, &settings, PointerInput::new(12.0, 8.0)).unwrap();

        assert_eq!(doc.layers[0].offset, Point::new(7, 3));
        cmd.undo(&mut doc);
        assert_eq!(doc.layers[0].offset, Point::new(0, 0));
        cmd.redo(&mut doc);
        assert_eq!(doc.layers[0].offset, Point::new(7, 3));
    }

    #[test]
    fn move_tool_without_drag_records_nothing() {
        let mut doc = blank_doc();
        let settings = ToolSettings::default();
        let mut tool = MoveTool::new();
        tool.on_press(&mut doc, &settings, PointerInput::new(5.0, 5.0));
        assert!(tool.on_release(&mut doc, &settings, PointerInput::new(5.0, 5.0)).is_none());
    }

    #[test]
    fn rectangle_selection_normalizes_corners() {
        let mut doc = blank_doc();
        let settings = ToolSettings::default();
        let mut tool = RectangleSelectionTool::new();
        // Drag up-left so the anchor is the bottom-right corner.
        tool.on_press(&mut doc, &settings, PointerInput::new(20.0, 18.0));
        tool.on_drag(&mut doc, &settings, PointerInput::new(5.0, 4.0));
        assert!(tool.on_release(&mut doc, &settings, PointerInput::new(5.0, 4.0)).is_none());

        match doc.selection() {
            Some(SelectionShape::Rectangle { min_x, min_y, max_x, max_y }) => {
                assert_eq!((*min_x, *min_y), (5, 4));
                assert_eq!((*max_x, *max_y), (19, 17));
            }
            other => panic!("expected rectangle selection, got {:?}", other),
        }

        // A bare click clears the selection.
        tool.on_press(&mut doc, &settings, PointerInput::new(30.0, 30.0));
        tool.on_release(&mut doc, &settings, PointerInput::new(30.0, 30.0));
        assert!(!doc.has_selection());
    }

    #[test]
    fn ellipse_selection_commits_bbox_geometry() {
        let mut doc = blank_doc();
        let settings = ToolSettings::default();
        let mut tool = EllipseSelectionTool::new();
        tool.on_press(&mut doc, &settings, PointerInput::new(10.0, 10.0));
        tool.on_drag(&mut doc, &settings, PointerInput::new(30.0, 20.0));
        tool.on_release(&mut doc, &settings, PointerInput::new(30.0, 20.0));

        match doc.selection() {
            Some(SelectionShape::Ellipse { cx, cy, rx, ry }) => {
                assert_eq!((*cx, *cy), (20.0, 15.0));
                assert_eq!((*rx, *ry), (10.0, 5.0));
            }
            other => panic!("expected ellipse selection, got {:?}", other),
        }
    }

    #[test]
    fn move_selection_translates_pixels_and_mask() {
        let mut doc = blank_doc();
        // A 4×4 red square at (10, 10).
        for y in 10..14 {
            for x in 10..14 {
                doc.layers[0].pixels.set(x, y, RED).unwrap();
            }
        }
        doc.set_selection(SelectionShape::Rectangle { min_x: 10, min_y: 10, max_x: 13, max_y: 13 });

        let settings = ToolSettings::default();
        let mut tool = MoveSelectionTool::new();
        tool.on_press(&mut doc, &settings, PointerInput::new(11.0, 11.0));
        tool.on_drag(&mut doc, &settings, PointerInput::new(31.0, 11.0));
        let cmd = tool.on_release(&mut doc, &settings, PointerInput::new(31.0, 11.0)).unwrap();

        let layer = &doc.layers[0].pixels;
        assert_eq!(layer.get(10, 10).unwrap(), TRANSPARENT);
        assert_eq!(layer.get(30, 10).unwrap(), RED);
        assert_eq!(layer.get(33, 13).unwrap(), RED);
        // Selection followed the content.
        assert!(doc.mask_allows(30, 10));
        assert!(!doc.mask_allows(10, 10));

        cmd.undo(&mut doc);
        assert_eq!(doc.layers[0].pixels.get(10, 10).unwrap(), RED);
        assert_eq!(doc.layers[0].pixels.get(30, 10).unwrap(), TRANSPARENT);
    }

    #[test]
    fn move_selection_without_selection_is_noop() {
        let mut doc = blank_doc();
        let settings = ToolSettings::default();
        let mut tool = MoveSelectionTool::new();
        tool.on_press(&mut doc, &settings, PointerInput::new(5.0, 5.0));
        assert!(tool.on_release(&mut doc, &settings, PointerInput::new(25.0, 5.0)).is_none());
    }

    #[test]
    fn controller_finalizes_stroke_on_tool_switch() {
        let mut doc = blank_doc();
        let mut controller = ToolController::new();
        controller.settings = red_settings(4.0);

        controller.on_press(&mut doc, PointerInput::new(10.0, 10.0));
        controller.on_drag(&mut doc, PointerInput::new(20.0, 10.0));
        assert!(controller.stroke_in_progress());

        // Switching mid-stroke forces an implicit release first.
        let cmd = controller.finalize(&mut doc);
        controller.activate("eraser").unwrap();
        assert!(cmd.is_some());
        assert!(!controller.stroke_in_progress());
        assert_eq!(doc.composite().get(15, 10).unwrap(), RED);
        assert_eq!(controller.active_tool_name(), "Eraser");
    }

    #[test]
    fn controller_rejects_unknown_tool() {
        let mut controller = ToolController::new();
        assert!(controller.activate("airbrush-9000").is_err());
        assert_eq!(controller.active_tool_id(), ToolRegistry::DEFAULT_TOOL);
    }

    #[test]
    fn drag_without_press_is_ignored() {
        let mut doc = blank_doc();
        let mut controller = ToolController::new();
        controller.settings = red_settings(4.0);
        controller.on_drag(&mut doc, PointerInput::new(10.0, 10.0));
        assert!(controller.on_release(&mut doc, PointerInput::new(10.0, 10.0)).is_none());
        assert!(doc.composite().is_fully_transparent());
    }
}
