//! Undo/redo history.
//!
//! Every discrete edit is captured as a [`Command`] holding enough state to
//! replay itself in both directions. The history is the classic linear undo
//! stack: recording while undone edits exist discards the redo branch, and
//! both a step cap and a byte budget bound memory by evicting the oldest
//! command (that eviction is deliberate, irreversible loss of the earliest
//! undo step).

use std::collections::VecDeque;

use crate::buffer::PixelBuffer;
use crate::canvas::{BlendMode, CanvasState, Layer};
use crate::geometry::{PixelRect, Point};

/// An undoable/redoable edit. Commands are immutable once created and are
/// recorded AFTER their effect has been applied to the document — `redo` is
/// only invoked when the user redoes an undone step.
pub trait Command: Send + Sync {
    fn undo(&self, canvas: &mut CanvasState);
    fn redo(&self, canvas: &mut CanvasState);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// PIXEL PATCH — rectangular before/after capture for stroke undo
// ============================================================================

/// A rectangular patch of one layer's pixels, in layer-local coordinates.
#[derive(Clone)]
pub struct PixelPatch {
    pub layer_index: usize,
    pub rect: PixelRect,
    pixels: Vec<u8>,
}

impl PixelPatch {
    /// Capture `rect` (clamped to the layer's buffer) from the document.
    /// `None` when the layer index is stale or nothing lies inside.
    pub fn capture(canvas: &CanvasState, layer_index: usize, rect: PixelRect) -> Option<Self> {
        let layer = canvas.layers.get(layer_index)?;
        Some(Self::from_buffer(&layer.pixels, layer_index, rect))
    }

    /// Capture from an arbitrary buffer (the pre-stroke snapshot a tool
    /// took before painting).
    pub fn from_buffer(buffer: &PixelBuffer, layer_index: usize, rect: PixelRect) -> Self {
        let rect = rect.intersect(&buffer.bounds());
        let mut pixels = Vec::with_capacity((rect.width() * rect.height()) as usize * 4);
        for y in rect.min_y..rect.max_y {
            for x in rect.min_x..rect.max_x {
                pixels.extend_from_slice(&buffer.pixel_unchecked(x, y).0);
            }
        }
        Self { layer_index, rect, pixels }
    }

    /// Write the captured pixels back onto the layer.
    pub fn apply(&self, canvas: &mut CanvasState) {
        let Some(layer) = canvas.layers.get_mut(self.layer_index) else {
            eprintln!(
                "PixelPatch: layer index {} out of bounds ({})",
                self.layer_index,
                canvas.layer_count()
            );
            return;
        };
        let mut i = 0;
        for y in self.rect.min_y..self.rect.max_y {
            for x in self.rect.min_x..self.rect.max_x {
                if layer.pixels.contains(x, y) {
                    let px = image::Rgba([
                        self.pixels[i],
                        self.pixels[i + 1],
                        self.pixels[i + 2],
                        self.pixels[i + 3],
                    ]);
                    layer.pixels.set_pixel_unchecked(x, y, px);
                }
                i += 4;
            }
        }
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.len()
    }
}

// ============================================================================
// STROKE COMMAND
// ============================================================================

/// One paint-tool stroke: the affected rectangle before and after.
pub struct StrokeCommand {
    description: String,
    before: PixelPatch,
    after: PixelPatch,
}

impl StrokeCommand {
    pub fn new(description: String, before: PixelPatch, after: PixelPatch) -> Self {
        Self { description, before, after }
    }
}

impl Command for StrokeCommand {
    fn undo(&self, canvas: &mut CanvasState) {
        self.before.apply(canvas);
    }

    fn redo(&self, canvas: &mut CanvasState) {
        self.after.apply(canvas);
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.before.memory_size() + self.after.memory_size()
    }
}

// ============================================================================
// LAYER OPERATION COMMAND — structural edits
// ============================================================================

/// Full capture of a layer for delete/duplicate restore.
#[derive(Clone)]
pub struct LayerSnapshot {
    name: String,
    visible: bool,
    opacity: f32,
    blend_mode: BlendMode,
    offset: Point,
    pixels: PixelBuffer,
}

impl LayerSnapshot {
    pub fn capture(layer: &Layer) -> Self {
        Self {
            name: layer.name().to_string(),
            visible: layer.visible,
            opacity: layer.opacity(),
            blend_mode: layer.blend_mode,
            offset: layer.offset,
            pixels: layer.pixels.clone(),
        }
    }

    fn to_layer(&self) -> Layer {
        let mut layer = Layer::from_buffer(self.name.clone(), self.pixels.clone());
        layer.visible = self.visible;
        layer.set_opacity_raw(self.opacity);
        layer.blend_mode = self.blend_mode;
        layer.offset = self.offset;
        layer
    }

    fn memory_size(&self) -> usize {
        self.pixels.memory_bytes() + self.name.len()
    }
}

/// Structural layer-stack edits that can be undone/redone.
pub enum LayerOperation {
    /// A transparent layer was added at `index`.
    Add { index: usize, name: String, width: u32, height: u32 },
    /// A layer was deleted (full capture for restore).
    Delete { index: usize, snapshot: LayerSnapshot },
    /// Layer reordered.
    Move { from: usize, to: usize },
    /// Opacity changed.
    Opacity { index: usize, old: f32, new: f32 },
    /// Visibility toggled.
    Visibility { index: usize, was_visible: bool },
    /// Renamed.
    Rename { index: usize, old_name: String, new_name: String },
    /// Duplicated (capture of the new copy for redo).
    Duplicate { new_index: usize, snapshot: LayerSnapshot },
    /// Layer origin offset changed (Move tool).
    Offset { index: usize, old: Point, new: Point },
}

pub struct LayerOpCommand {
    operation: LayerOperation,
}

impl LayerOpCommand {
    pub fn new(operation: LayerOperation) -> Self {
        Self { operation }
    }
}

impl Command for LayerOpCommand {
    fn undo(&self, canvas: &mut CanvasState) {
        match &self.operation {
            LayerOperation::Add { index, .. } => {
                let _ = canvas.remove_layer(*index);
            }
            LayerOperation::Delete { index, snapshot } => {
                canvas.insert_layer_raw(*index, snapshot.to_layer());
            }
            LayerOperation::Move { from, to } => {
                canvas.move_layer(*to, *from);
            }
            LayerOperation::Opacity { index, old, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.set_opacity_raw(*old);
                }
            }
            LayerOperation::Visibility { index, was_visible } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.visible = *was_visible;
                }
            }
            LayerOperation::Rename { index, old_name, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.set_name_raw(old_name.clone());
                }
            }
            LayerOperation::Duplicate { new_index, .. } => {
                let _ = canvas.remove_layer(*new_index);
            }
            LayerOperation::Offset { index, old, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.offset = *old;
                }
            }
        }
    }

    fn redo(&self, canvas: &mut CanvasState) {
        match &self.operation {
            LayerOperation::Add { index, name, width, height } => {
                let layer = Layer::new(name.clone(), *width, *height, crate::buffer::TRANSPARENT);
                canvas.insert_layer_raw(*index, layer);
            }
            LayerOperation::Delete { index, .. } => {
                let _ = canvas.remove_layer(*index);
            }
            LayerOperation::Move { from, to } => {
                canvas.move_layer(*from, *to);
            }
            LayerOperation::Opacity { index, new, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.set_opacity_raw(*new);
                }
            }
            LayerOperation::Visibility { index, was_visible } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.visible = !*was_visible;
                }
            }
            LayerOperation::Rename { index, new_name, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.set_name_raw(new_name.clone());
                }
            }
            LayerOperation::Duplicate { new_index, snapshot } => {
                canvas.insert_layer_raw(*new_index, snapshot.to_layer());
            }
            LayerOperation::Offset { index, new, .. } => {
                if let Some(layer) = canvas.layers.get_mut(*index) {
                    layer.offset = *new;
                }
            }
        }
    }

    fn description(&self) -> String {
        match &self.operation {
            LayerOperation::Add { name, .. } => format!("Add Layer: {}", name),
            LayerOperation::Delete { snapshot, .. } => {
                format!("Delete Layer: {}", snapshot.name)
            }
            LayerOperation::Move { from, to } => format!("Move Layer {} → {}", from, to),
            LayerOperation::Opacity { index, new, .. } => {
                format!("Layer {} Opacity: {:.0}%", index, new * 100.0)
            }
            LayerOperation::Visibility { index, was_visible } => {
                if *was_visible {
                    format!("Hide Layer {}", index)
                } else {
                    format!("Show Layer {}", index)
                }
            }
            LayerOperation::Rename { old_name, new_name, .. } => {
                format!("Rename: {} → {}", old_name, new_name)
            }
            LayerOperation::Duplicate { snapshot, .. } => {
                format!("Duplicate: {}", snapshot.name)
            }
            LayerOperation::Offset { index, new, .. } => {
                format!("Move Layer {} to ({}, {})", index, new.x, new.y)
            }
        }
    }

    fn memory_size(&self) -> usize {
        match &self.operation {
            LayerOperation::Delete { snapshot, .. }
            | LayerOperation::Duplicate { snapshot, .. } => snapshot.memory_size(),
            LayerOperation::Add { name, .. } => name.len(),
            LayerOperation::Rename { old_name, new_name, .. } => old_name.len() + new_name.len(),
            _ => std::mem::size_of::<LayerOperation>(),
        }
    }
}

// ============================================================================
// HISTORY — bounded undo/redo stacks
// ============================================================================

pub struct History {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_steps: usize,
    /// Optional memory cap in bytes across both stacks.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(50)
    }
}

impl History {
    pub fn new(max_steps: usize) -> Self {
        Self::with_limits(max_steps, Some(100 * 1024 * 1024))
    }

    pub fn with_limits(max_steps: usize, max_memory_bytes: Option<usize>) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_steps,
            max_memory_bytes,
            total_memory: 0,
        }
    }

    /// Record an already-applied command. Any undone commands are discarded
    /// (redo becomes unavailable), then the oldest entries are evicted until
    /// both the step cap and the byte budget hold.
    pub fn push(&mut self, command: Box<dyn Command>) {
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }

        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);

        self.prune();
    }

    /// Undo the most recent command. `None` at the bottom of the stack.
    pub fn undo(&mut self, canvas: &mut CanvasState) -> Option<String> {
        let command = self.undo_stack.pop_back()?;
        let description = command.description();
        command.undo(canvas);
        self.redo_stack.push_back(command);
        Some(description)
    }

    /// Redo the most recently undone command. `None` when nothing is undone.
    pub fn redo(&mut self, canvas: &mut CanvasState) -> Option<String> {
        let command = self.redo_stack.pop_back()?;
        let description = command.description();
        command.redo(canvas);
        self.undo_stack.push_back(command);
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|c| c.description())
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Current history memory usage (O(1) via the cached total).
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    /// Drop-oldest eviction. The newest command always survives, even when
    /// it alone exceeds the byte budget.
    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_steps {
            if let Some(old) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(old.memory_size());
            }
        }
        if let Some(cap) = self.max_memory_bytes {
            while self.total_memory > cap && self.undo_stack.len() > 1 {
                if let Some(old) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(old.memory_size());
                }
            }
        }
    }
}
