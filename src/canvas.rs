//! The image document: layer stack, selection state, stroke preview, and
//! the pixel compositor.
//!
//! Coordinate system: document origin at the canvas top-left, x rightward,
//! y downward, integer pixel coordinates. Pointer input arriving in any
//! other space must be translated by the caller before it reaches the
//! document.

use image::{GrayImage, Luma, Rgba};
use rayon::prelude::*;

use crate::buffer::{PixelBuffer, TRANSPARENT};
use crate::error::EngineError;
use crate::geometry::{PixelRect, Point};

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Additive,
    Overlay,
    Lighten,
    Darken,
    Difference,
}

impl BlendMode {
    /// All blend modes, in the order a layer panel lists them.
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Additive,
            BlendMode::Overlay,
            BlendMode::Lighten,
            BlendMode::Darken,
            BlendMode::Difference,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Additive => "Additive",
            BlendMode::Overlay => "Overlay",
            BlendMode::Lighten => "Lighten",
            BlendMode::Darken => "Darken",
            BlendMode::Difference => "Difference",
        }
    }

    /// Convert to a stable u8 for binary serialization.
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Additive => 3,
            BlendMode::Overlay => 4,
            BlendMode::Lighten => 5,
            BlendMode::Darken => 6,
            BlendMode::Difference => 7,
        }
    }

    /// Reconstruct from a u8 (unknown values fall back to Normal).
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => BlendMode::Normal,
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Additive,
            4 => BlendMode::Overlay,
            5 => BlendMode::Lighten,
            6 => BlendMode::Darken,
            7 => BlendMode::Difference,
            _ => BlendMode::Normal,
        }
    }

    /// Blend `top` onto `base` with this mode, `opacity` folded into the
    /// source alpha. Channels convert back to u8 by rounding half-up, so a
    /// 50%-opacity red over opaque blue is exactly (128, 0, 128, 255).
    pub fn blend(self, base: Rgba<u8>, top: Rgba<u8>, opacity: f32) -> Rgba<u8> {
        // Fast path: fully transparent top pixel — nothing to blend
        if top[3] == 0 {
            return base;
        }
        // Fast path: Normal blend, full opacity, fully opaque top — overwrite
        if matches!(self, BlendMode::Normal) && opacity >= 1.0 && top[3] == 255 {
            return top;
        }

        let opacity = opacity.clamp(0.0, 1.0);

        let base_r = base[0] as f32 / 255.0;
        let base_g = base[1] as f32 / 255.0;
        let base_b = base[2] as f32 / 255.0;
        let base_a = base[3] as f32 / 255.0;

        let top_r = top[0] as f32 / 255.0;
        let top_g = top[1] as f32 / 255.0;
        let top_b = top[2] as f32 / 255.0;
        let top_a = (top[3] as f32 / 255.0) * opacity;

        let (r, g, b) = match self {
            BlendMode::Normal => (top_r, top_g, top_b),
            BlendMode::Multiply => (base_r * top_r, base_g * top_g, base_b * top_b),
            BlendMode::Screen => (
                1.0 - (1.0 - base_r) * (1.0 - top_r),
                1.0 - (1.0 - base_g) * (1.0 - top_g),
                1.0 - (1.0 - base_b) * (1.0 - top_b),
            ),
            BlendMode::Additive => (
                (base_r + top_r).min(1.0),
                (base_g + top_g).min(1.0),
                (base_b + top_b).min(1.0),
            ),
            BlendMode::Overlay => (
                overlay_channel(base_r, top_r),
                overlay_channel(base_g, top_g),
                overlay_channel(base_b, top_b),
            ),
            BlendMode::Lighten => (base_r.max(top_r), base_g.max(top_g), base_b.max(top_b)),
            BlendMode::Darken => (base_r.min(top_r), base_g.min(top_g), base_b.min(top_b)),
            BlendMode::Difference => (
                (base_r - top_r).abs(),
                (base_g - top_g).abs(),
                (base_b - top_b).abs(),
            ),
        };

        let out_a = top_a + base_a * (1.0 - top_a);
        if out_a == 0.0 {
            return TRANSPARENT;
        }

        let out_r = (r * top_a + base_r * base_a * (1.0 - top_a)) / out_a;
        let out_g = (g * top_a + base_g * base_a * (1.0 - top_a)) / out_a;
        let out_b = (b * top_a + base_b * base_a * (1.0 - top_a)) / out_a;

        Rgba([
            round_channel(out_r),
            round_channel(out_g),
            round_channel(out_b),
            round_channel(out_a),
        ])
    }
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// Round-half-up u8 conversion; the single rounding convention for the
/// whole compositor.
#[inline]
fn round_channel(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Scale a pixel's alpha down by an erase-mask strength (0..=255).
fn erase_alpha(px: Rgba<u8>, strength: u8) -> Rgba<u8> {
    let keep = 1.0 - strength as f32 / 255.0;
    Rgba([px[0], px[1], px[2], round_channel(px[3] as f32 / 255.0 * keep)])
}

// ============================================================================
// SELECTION
// ============================================================================

/// Geometric selection region, defined by its bounding box. The document
/// holds at most one and rasterizes it into a mask for per-pixel tests.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionShape {
    /// Inclusive pixel bounds.
    Rectangle { min_x: u32, min_y: u32, max_x: u32, max_y: u32 },
    Ellipse { cx: f32, cy: f32, rx: f32, ry: f32 },
}

impl SelectionShape {
    /// Returns 255 if the pixel (x, y) is inside the shape, 0 otherwise.
    pub fn contains(&self, x: u32, y: u32) -> u8 {
        match self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => {
                if x >= *min_x && x <= *max_x && y >= *min_y && y <= *max_y {
                    255
                } else {
                    0
                }
            }
            SelectionShape::Ellipse { cx, cy, rx, ry } => {
                if *rx <= 0.0 || *ry <= 0.0 {
                    return 0;
                }
                let dx = (x as f32 - cx) / rx;
                let dy = (y as f32 - cy) / ry;
                if dx * dx + dy * dy <= 1.0 { 255 } else { 0 }
            }
        }
    }

    /// Inclusive bounding box in pixel coordinates, clamped to the canvas.
    pub fn bounds(&self, canvas_w: u32, canvas_h: u32) -> (u32, u32, u32, u32) {
        match self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => (
                *min_x,
                *min_y,
                (*max_x).min(canvas_w.saturating_sub(1)),
                (*max_y).min(canvas_h.saturating_sub(1)),
            ),
            SelectionShape::Ellipse { cx, cy, rx, ry } => {
                let min_x = (cx - rx).max(0.0).floor() as u32;
                let min_y = (cy - ry).max(0.0).floor() as u32;
                let max_x = ((cx + rx).ceil().max(0.0) as u32).min(canvas_w.saturating_sub(1));
                let max_y = ((cy + ry).ceil().max(0.0) as u32).min(canvas_h.saturating_sub(1));
                (min_x, min_y, max_x, max_y)
            }
        }
    }

    fn rasterize(&self, canvas_w: u32, canvas_h: u32) -> GrayImage {
        let mut mask = GrayImage::new(canvas_w, canvas_h);
        let (bx0, by0, bx1, by1) = self.bounds(canvas_w, canvas_h);
        if bx0 > bx1 || by0 > by1 {
            return mask;
        }
        for y in by0..=by1 {
            for x in bx0..=bx1 {
                if self.contains(x, y) != 0 {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        mask
    }

    /// Shift by a signed delta. `None` when the shape lands entirely
    /// outside the canvas.
    fn translated(&self, dx: i32, dy: i32, canvas_w: u32, canvas_h: u32) -> Option<SelectionShape> {
        match self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => {
                let nx0 = *min_x as i64 + dx as i64;
                let ny0 = *min_y as i64 + dy as i64;
                let nx1 = *max_x as i64 + dx as i64;
                let ny1 = *max_y as i64 + dy as i64;
                if nx1 < 0 || ny1 < 0 || nx0 > canvas_w as i64 - 1 || ny0 > canvas_h as i64 - 1 {
                    return None;
                }
                Some(SelectionShape::Rectangle {
                    min_x: nx0.max(0) as u32,
                    min_y: ny0.max(0) as u32,
                    max_x: nx1.min(canvas_w as i64 - 1) as u32,
                    max_y: ny1.min(canvas_h as i64 - 1) as u32,
                })
            }
            SelectionShape::Ellipse { cx, cy, rx, ry } => {
                let ncx = cx + dx as f32;
                let ncy = cy + dy as f32;
                if ncx + rx < 0.0
                    || ncy + ry < 0.0
                    || ncx - rx > canvas_w as f32
                    || ncy - ry > canvas_h as f32
                {
                    return None;
                }
                Some(SelectionShape::Ellipse { cx: ncx, cy: ncy, rx: *rx, ry: *ry })
            }
        }
    }
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Debug)]
pub struct Layer {
    name: String,
    pub visible: bool,
    opacity: f32,
    pub blend_mode: BlendMode,
    /// Document-space position of the buffer's top-left corner.
    pub offset: Point,
    pub pixels: PixelBuffer,
}

impl Layer {
    pub fn new(name: String, width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        Self {
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            offset: Point::default(),
            pixels: PixelBuffer::new_filled(width, height, fill_color),
        }
    }

    pub fn from_buffer(name: String, pixels: PixelBuffer) -> Self {
        Self {
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            offset: Point::default(),
            pixels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name_raw(&mut self, name: String) {
        self.name = name;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, v: f32) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&v) {
            return Err(EngineError::InvalidRange {
                what: "layer opacity",
                value: v,
                min: 0.0,
                max: 1.0,
            });
        }
        self.opacity = v;
        Ok(())
    }

    /// Restore-path setter used by undo/redo; clamps instead of failing.
    pub(crate) fn set_opacity_raw(&mut self, v: f32) {
        self.opacity = v.clamp(0.0, 1.0);
    }

    /// Map a document-space coordinate into this layer's buffer.
    pub fn doc_to_local(&self, x: i32, y: i32) -> Option<(u32, u32)> {
        let lx = x as i64 - self.offset.x as i64;
        let ly = y as i64 - self.offset.y as i64;
        if lx < 0 || ly < 0 || lx >= self.pixels.width() as i64 || ly >= self.pixels.height() as i64
        {
            return None;
        }
        Some((lx as u32, ly as u32))
    }

    /// Write one pixel addressed in document space. Coordinates outside the
    /// layer's buffer are an `OutOfBounds` contract violation; stroke code
    /// clips its footprint before calling.
    pub fn paint(&mut self, x: i32, y: i32, color: Rgba<u8>) -> Result<(), EngineError> {
        let (lx, ly) = self.doc_to_local(x, y).ok_or(EngineError::OutOfBounds {
            x: x.max(0) as u32,
            y: y.max(0) as u32,
            width: self.pixels.width(),
            height: self.pixels.height(),
        })?;
        self.pixels.set(lx, ly, color)
    }

    /// Deep copy with the same name; the owning document resolves the
    /// duplicate's name to stay unique.
    pub fn duplicate(&self) -> Layer {
        self.clone()
    }

    /// Sample at document coordinates; transparent outside the buffer.
    #[inline]
    fn sample_doc(&self, x: u32, y: u32) -> Rgba<u8> {
        match self.doc_to_local(x as i32, y as i32) {
            Some((lx, ly)) => self.pixels.pixel_unchecked(lx, ly),
            None => TRANSPARENT,
        }
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// The document: an ordered stack of layers (index 0 = bottom), the active
/// layer, the current selection, and the in-progress stroke preview.
///
/// Invariant: `active_layer_index` is `Some` and in-bounds exactly when the
/// layer stack is non-empty. Every structural operation below maintains it.
#[derive(Clone, Debug)]
pub struct CanvasState {
    width: u32,
    height: u32,
    pub layers: Vec<Layer>,
    pub active_layer_index: Option<usize>,
    selection_shape: Option<SelectionShape>,
    selection_mask: Option<GrayImage>,
    /// Canvas-sized scratch a paint tool accumulates its stroke into; the
    /// compositor renders it over the active layer so partial strokes are
    /// visible before commit.
    pub(crate) preview: Option<PixelBuffer>,
    /// Preview alpha is an erase mask rather than paint.
    pub(crate) preview_is_eraser: bool,
    /// Preview bypasses the selection mask (floating move-selection content).
    pub(crate) preview_ignores_selection: bool,
}

impl CanvasState {
    /// New document with an opaque white background layer.
    pub fn new(width: u32, height: u32) -> Self {
        let background =
            Layer::new("Background".to_string(), width, height, Rgba([255, 255, 255, 255]));
        Self {
            width,
            height,
            layers: vec![background],
            active_layer_index: Some(0),
            selection_shape: None,
            selection_mask: None,
            preview: None,
            preview_is_eraser: false,
            preview_ignores_selection: false,
        }
    }

    /// New document with no layers at all (loaders assemble into this).
    pub fn new_empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: Vec::new(),
            active_layer_index: None,
            selection_shape: None,
            selection_mask: None,
            preview: None,
            preview_is_eraser: false,
            preview_ignores_selection: false,
        }
    }

    /// Assemble a document from deserialized parts. The active index is
    /// clamped into range (or cleared when there are no layers).
    pub fn from_parts(
        width: u32,
        height: u32,
        layers: Vec<Layer>,
        active_layer_index: Option<usize>,
    ) -> Self {
        let active = if layers.is_empty() {
            None
        } else {
            Some(active_layer_index.unwrap_or(0).min(layers.len() - 1))
        };
        Self {
            width,
            height,
            layers,
            active_layer_index: active,
            selection_shape: None,
            selection_mask: None,
            preview: None,
            preview_is_eraser: false,
            preview_ignores_selection: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active_layer_index.and_then(|i| self.layers.get(i))
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        match self.active_layer_index {
            Some(i) => self.layers.get_mut(i),
            None => None,
        }
    }

    pub fn require_active_mut(&mut self) -> Result<&mut Layer, EngineError> {
        self.active_layer_mut().ok_or(EngineError::NoActiveLayer)
    }

    // ---- layer stack operations -------------------------------------------

    /// Insert a new transparent canvas-sized layer above `after` (or on top
    /// when `None`), make it active, and return its index. The name is made
    /// unique within the document.
    pub fn add_layer(&mut self, name: &str, after: Option<usize>) -> usize {
        let layer = Layer::new(name.to_string(), self.width, self.height, TRANSPARENT);
        self.add_layer_from(layer, after)
    }

    /// Insert an existing layer (image import, paste) above `after`.
    pub fn add_layer_from(&mut self, mut layer: Layer, after: Option<usize>) -> usize {
        let index = match after {
            Some(i) => (i + 1).min(self.layers.len()),
            None => self.layers.len(),
        };
        layer.name = self.unique_name(&layer.name, None);
        self.layers.insert(index, layer);
        self.active_layer_index = Some(index);
        index
    }

    /// Insert verbatim at `index` — no renaming. Undo/redo restores layers
    /// exactly as captured.
    pub(crate) fn insert_layer_raw(&mut self, index: usize, layer: Layer) {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.active_layer_index = Some(index);
    }

    /// Remove and return the layer at `index`. The active index moves to the
    /// nearest remaining layer, or clears when the stack empties.
    pub fn remove_layer(&mut self, index: usize) -> Result<Layer, EngineError> {
        if index >= self.layers.len() {
            return Err(EngineError::NotFound { index, len: self.layers.len() });
        }
        let removed = self.layers.remove(index);
        self.active_layer_index = if self.layers.is_empty() {
            None
        } else {
            Some(match self.active_layer_index {
                Some(a) if a > index => a - 1,
                Some(a) if a == index => index.min(self.layers.len() - 1),
                Some(a) => a,
                None => 0,
            })
        };
        Ok(removed)
    }

    /// Reorder a layer. Indices are clamped into range; the active index
    /// follows the layer it pointed at.
    pub fn move_layer(&mut self, from: usize, to: usize) {
        if self.layers.is_empty() {
            return;
        }
        let last = self.layers.len() - 1;
        let from = from.min(last);
        let to = to.min(last);
        if from == to {
            return;
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.active_layer_index = self.active_layer_index.map(|a| {
            if a == from {
                to
            } else if from < a && a <= to {
                a - 1
            } else if to <= a && a < from {
                a + 1
            } else {
                a
            }
        });
    }

    pub fn set_active_layer(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.layers.len() {
            return Err(EngineError::NotFound { index, len: self.layers.len() });
        }
        self.active_layer_index = Some(index);
        Ok(())
    }

    /// Rename a layer, resolving collisions; returns the name actually set.
    pub fn rename_layer(&mut self, index: usize, new_name: &str) -> Result<String, EngineError> {
        if index >= self.layers.len() {
            return Err(EngineError::NotFound { index, len: self.layers.len() });
        }
        let resolved = self.unique_name(new_name, Some(index));
        self.layers[index].name = resolved.clone();
        Ok(resolved)
    }

    /// Deep-copy a layer, inserting the copy directly above the source and
    /// making it active. Names collide as "name copy", "name copy 2", …
    pub fn duplicate_layer(&mut self, index: usize) -> Result<usize, EngineError> {
        if index >= self.layers.len() {
            return Err(EngineError::NotFound { index, len: self.layers.len() });
        }
        let mut copy = self.layers[index].duplicate();
        copy.name = self.unique_name(&format!("{} copy", copy.name), None);
        let new_index = index + 1;
        self.layers.insert(new_index, copy);
        self.active_layer_index = Some(new_index);
        Ok(new_index)
    }

    fn unique_name(&self, desired: &str, skip: Option<usize>) -> String {
        let taken = |candidate: &str| {
            self.layers
                .iter()
                .enumerate()
                .any(|(i, l)| Some(i) != skip && l.name == candidate)
        };
        if !taken(desired) {
            return desired.to_string();
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{} {}", desired, n);
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    // ---- selection --------------------------------------------------------

    /// Replace the current selection. Selection changes are view state and
    /// are never recorded in history.
    pub fn set_selection(&mut self, shape: SelectionShape) {
        self.selection_mask = Some(shape.rasterize(self.width, self.height));
        self.selection_shape = Some(shape);
    }

    pub fn clear_selection(&mut self) {
        self.selection_shape = None;
        self.selection_mask = None;
    }

    pub fn has_selection(&self) -> bool {
        self.selection_shape.is_some()
    }

    /// The current selection geometry, for the shell's overlay rendering.
    pub fn selection(&self) -> Option<&SelectionShape> {
        self.selection_shape.as_ref()
    }

    /// Shift the selection (shape and mask) by a pixel delta. A selection
    /// pushed fully off-canvas is cleared.
    pub fn translate_selection(&mut self, dx: i32, dy: i32) {
        let Some(shape) = self.selection_shape.take() else {
            return;
        };
        match shape.translated(dx, dy, self.width, self.height) {
            Some(moved) => self.set_selection(moved),
            None => self.clear_selection(),
        }
    }

    /// True when the selection (if any) permits writes at (x, y).
    pub fn mask_allows(&self, x: u32, y: u32) -> bool {
        match &self.selection_mask {
            Some(m) => x < m.width() && y < m.height() && m.get_pixel(x, y).0[0] != 0,
            None => true,
        }
    }

    // ---- stroke preview ---------------------------------------------------

    /// Start accumulating a stroke. The preview buffer is canvas-sized and
    /// transparent; paint tools stamp into it and the compositor shows it
    /// over the active layer until commit or discard.
    pub(crate) fn begin_stroke_preview(&mut self, is_eraser: bool, ignores_selection: bool) {
        self.preview = Some(PixelBuffer::new(self.width, self.height));
        self.preview_is_eraser = is_eraser;
        self.preview_ignores_selection = ignores_selection;
    }

    pub(crate) fn preview_mut(&mut self) -> Option<&mut PixelBuffer> {
        self.preview.as_mut()
    }

    /// Apply the accumulated preview onto the active layer within `bounds`
    /// (document space), intersecting with the selection mask, then drop the
    /// preview. Paint blends source-over; an eraser preview scales alpha
    /// down by its mask strength.
    pub(crate) fn commit_stroke_preview(&mut self, bounds: PixelRect) {
        let Some(preview) = self.preview.take() else {
            return;
        };
        let is_eraser = self.preview_is_eraser;
        let ignores_selection = self.preview_ignores_selection;
        self.preview_is_eraser = false;
        self.preview_ignores_selection = false;

        let Some(active) = self.active_layer_index else {
            return;
        };
        let canvas = PixelRect::new(0, 0, self.width, self.height);
        let bounds = bounds.intersect(&canvas);
        let mask = self.selection_mask.as_ref();
        let layer = &mut self.layers[active];

        for y in bounds.min_y..bounds.max_y {
            for x in bounds.min_x..bounds.max_x {
                let p = preview.pixel_unchecked(x, y);
                if p[3] == 0 {
                    continue;
                }
                if !ignores_selection
                    && let Some(m) = mask
                    && m.get_pixel(x, y).0[0] == 0
                {
                    continue;
                }
                let Some((lx, ly)) = layer.doc_to_local(x as i32, y as i32) else {
                    continue;
                };
                let dst = layer.pixels.pixel_unchecked(lx, ly);
                let out = if is_eraser {
                    erase_alpha(dst, p[3])
                } else {
                    BlendMode::Normal.blend(dst, p, 1.0)
                };
                layer.pixels.set_pixel_unchecked(lx, ly, out);
            }
        }
    }

    // ---- compositing ------------------------------------------------------

    /// Flatten the visible stack bottom-to-top into one canvas-sized buffer.
    ///
    /// Deterministic: a given stack always composites to the same result.
    /// Takes `&self` — the document is read-only for the duration, so a
    /// caller may run this from a worker as long as no tool mutates the
    /// document concurrently. Rows are processed in parallel.
    pub fn composite(&self) -> PixelBuffer {
        let mut out = PixelBuffer::new(self.width, self.height);
        let width = self.width;
        let row_bytes = width as usize * 4;
        if row_bytes == 0 {
            return out;
        }
        let active = self.active_layer_index;

        out.as_raw_mut()
            .par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, row)| {
                let y = y as u32;
                for x in 0..width {
                    let mut acc = TRANSPARENT;
                    for (li, layer) in self.layers.iter().enumerate() {
                        if !layer.visible {
                            continue;
                        }
                        let mut src = layer.sample_doc(x, y);
                        if Some(li) == active
                            && let Some(pv) = self.preview.as_ref()
                        {
                            let p = pv.pixel_unchecked(x, y);
                            if p[3] > 0
                                && (self.preview_ignores_selection || self.mask_allows(x, y))
                            {
                                src = if self.preview_is_eraser {
                                    erase_alpha(src, p[3])
                                } else {
                                    BlendMode::Normal.blend(src, p, 1.0)
                                };
                            }
                        }
                        acc = layer.blend_mode.blend(acc, src, layer.opacity);
                    }
                    let i = x as usize * 4;
                    row[i..i + 4].copy_from_slice(&acc.0);
                }
            });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn doc_with(layers: Vec<Layer>) -> CanvasState {
        let active = if layers.is_empty() { None } else { Some(layers.len() - 1) };
        CanvasState::from_parts(8, 8, layers, active)
    }

    #[test]
    fn all_invisible_composites_transparent() {
        let mut layer = Layer::new("a".into(), 8, 8, RED);
        layer.visible = false;
        let doc = doc_with(vec![layer]);
        let out = doc.composite();
        assert_eq!(out.width(), 8);
        assert_eq!(out.height(), 8);
        assert!(out.is_fully_transparent());
    }

    #[test]
    fn single_opaque_layer_composites_to_its_content() {
        let mut layer = Layer::new("a".into(), 4, 4, RED);
        layer.offset = Point::new(2, 1);
        let doc = doc_with(vec![layer]);
        let out = doc.composite();
        assert_eq!(out.get(2, 1).unwrap(), RED);
        assert_eq!(out.get(5, 4).unwrap(), RED);
        assert_eq!(out.get(1, 1).unwrap(), TRANSPARENT);
        assert_eq!(out.get(6, 5).unwrap(), TRANSPARENT);
    }

    #[test]
    fn half_opacity_red_over_blue_rounds_half_up() {
        let bottom = Layer::new("blue".into(), 8, 8, BLUE);
        let mut top = Layer::new("red".into(), 8, 8, RED);
        top.set_opacity(0.5).unwrap();
        let doc = doc_with(vec![bottom, top]);
        let out = doc.composite();
        assert_eq!(out.get(3, 3).unwrap(), Rgba([128, 0, 128, 255]));
    }

    #[test]
    fn multiply_blend() {
        let bottom = Layer::new("base".into(), 8, 8, Rgba([200, 100, 50, 255]));
        let mut top = Layer::new("gray".into(), 8, 8, Rgba([128, 128, 128, 255]));
        top.blend_mode = BlendMode::Multiply;
        let doc = doc_with(vec![bottom, top]);
        assert_eq!(doc.composite().get(0, 0).unwrap(), Rgba([100, 50, 25, 255]));
    }

    #[test]
    fn screen_blend_over_white_stays_white() {
        let bottom = Layer::new("base".into(), 8, 8, Rgba([255, 255, 255, 255]));
        let mut top = Layer::new("top".into(), 8, 8, Rgba([10, 20, 30, 255]));
        top.blend_mode = BlendMode::Screen;
        let doc = doc_with(vec![bottom, top]);
        assert_eq!(doc.composite().get(0, 0).unwrap(), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn blend_mode_u8_codes_round_trip() {
        for &mode in BlendMode::all() {
            assert_eq!(BlendMode::from_u8(mode.to_u8()), mode);
        }
        assert_eq!(BlendMode::from_u8(200), BlendMode::Normal);
    }

    #[test]
    fn opacity_out_of_range_is_rejected() {
        let mut layer = Layer::new("a".into(), 2, 2, RED);
        assert!(matches!(layer.set_opacity(1.5), Err(EngineError::InvalidRange { .. })));
        assert!(matches!(layer.set_opacity(-0.1), Err(EngineError::InvalidRange { .. })));
        assert_eq!(layer.opacity(), 1.0);
    }

    #[test]
    fn paint_translates_document_coordinates() {
        let mut layer = Layer::new("a".into(), 4, 4, TRANSPARENT);
        layer.offset = Point::new(2, 2);
        layer.paint(3, 3, RED).unwrap();
        assert_eq!(layer.pixels.get(1, 1).unwrap(), RED);
        assert!(layer.paint(0, 0, RED).is_err());
        assert!(layer.paint(6, 6, RED).is_err());
    }

    #[test]
    fn empty_document_has_no_active_layer() {
        let mut doc = CanvasState::new_empty(8, 8);
        assert_eq!(doc.active_layer_index, None);
        assert_eq!(doc.require_active_mut().unwrap_err(), EngineError::NoActiveLayer);
    }

    #[test]
    fn remove_layer_reassigns_active() {
        let mut doc = CanvasState::new(8, 8);
        doc.add_layer("a", None);
        doc.add_layer("b", None);
        assert_eq!(doc.active_layer_index, Some(2));

        doc.remove_layer(2).unwrap();
        assert_eq!(doc.active_layer_index, Some(1));

        doc.set_active_layer(0).unwrap();
        doc.remove_layer(1).unwrap();
        assert_eq!(doc.active_layer_index, Some(0));

        doc.remove_layer(0).unwrap();
        assert_eq!(doc.active_layer_index, None);
        assert!(matches!(doc.remove_layer(0), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn move_layer_clamps_and_tracks_active() {
        let mut doc = CanvasState::new(8, 8);
        doc.add_layer("a", None);
        doc.add_layer("b", None); // stack: Background, a, b — active 2
        doc.move_layer(2, 0);
        assert_eq!(doc.layers[0].name(), "b");
        assert_eq!(doc.active_layer_index, Some(0));

        // Out-of-range indices clamp instead of failing.
        doc.move_layer(0, 99);
        assert_eq!(doc.layers[2].name(), "b");
        assert_eq!(doc.active_layer_index, Some(2));
    }

    #[test]
    fn duplicate_names_get_copy_suffixes() {
        let mut doc = CanvasState::new(8, 8);
        let i = doc.duplicate_layer(0).unwrap();
        assert_eq!(doc.layers[i].name(), "Background copy");
        let j = doc.duplicate_layer(0).unwrap();
        assert_eq!(doc.layers[j].name(), "Background copy 2");
        assert_eq!(doc.active_layer_index, Some(j));
    }

    #[test]
    fn add_layer_resolves_name_collisions() {
        let mut doc = CanvasState::new(8, 8);
        doc.add_layer("Layer", None);
        let i = doc.add_layer("Layer", None);
        assert_eq!(doc.layers[i].name(), "Layer 2");
        let resolved = doc.rename_layer(i, "Background").unwrap();
        assert_eq!(resolved, "Background 2");
    }

    #[test]
    fn rectangle_selection_masks_pixels() {
        let mut doc = CanvasState::new(8, 8);
        doc.set_selection(SelectionShape::Rectangle { min_x: 2, min_y: 2, max_x: 4, max_y: 4 });
        assert!(doc.mask_allows(2, 2));
        assert!(doc.mask_allows(4, 4));
        assert!(!doc.mask_allows(1, 2));
        assert!(!doc.mask_allows(5, 4));
        doc.clear_selection();
        assert!(doc.mask_allows(1, 2));
    }

    #[test]
    fn ellipse_selection_excludes_bbox_corners() {
        let mut doc = CanvasState::new(16, 16);
        doc.set_selection(SelectionShape::Ellipse { cx: 8.0, cy: 8.0, rx: 4.0, ry: 4.0 });
        assert!(doc.mask_allows(8, 8));
        assert!(doc.mask_allows(4, 8));
        assert!(!doc.mask_allows(4, 4));
        assert!(!doc.mask_allows(12, 12));
    }

    #[test]
    fn translate_selection_moves_and_clips() {
        let mut doc = CanvasState::new(8, 8);
        doc.set_selection(SelectionShape::Rectangle { min_x: 2, min_y: 2, max_x: 4, max_y: 4 });
        doc.translate_selection(3, 0);
        assert!(doc.mask_allows(5, 2));
        assert!(!doc.mask_allows(2, 2));

        doc.translate_selection(100, 0);
        assert!(!doc.has_selection());
    }

    #[test]
    fn composite_is_deterministic() {
        let mut doc = CanvasState::new(16, 16);
        let i = doc.add_layer("paint", None);
        doc.layers[i].pixels.set(3, 3, Rgba([10, 200, 30, 128])).unwrap();
        doc.layers[i].set_opacity(0.7).unwrap();
        let a = doc.composite();
        let b = doc.composite();
        assert_eq!(a, b);
    }
}
