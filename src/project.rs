//! One open document plus its editing session: history, tool controller,
//! file path, and dirty state.
//!
//! This is the surface a shell drives. Pointer events, tool selection,
//! undo/redo, and layer commands come in; the composited raster, the layer
//! panel snapshot, the selection geometry, and the undo/redo availability
//! flags go out. Layer commands record their inverses into history here, so
//! callers never touch [`History`] directly.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::buffer::PixelBuffer;
use crate::canvas::{BlendMode, CanvasState, SelectionShape};
use crate::error::EngineError;
use crate::geometry::Point;
use crate::history::{History, LayerOpCommand, LayerOperation, LayerSnapshot};
use crate::io::{self, FileError, SaveFormat, TiffCompression};
use crate::tools::{PointerInput, ToolController};

/// Snapshot of one layer for the shell's layers panel.
#[derive(Clone, Debug)]
pub struct LayerInfo {
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub offset: Point,
    pub width: u32,
    pub height: u32,
    pub is_active: bool,
}

/// A single open document.
pub struct Project {
    pub id: Uuid,
    pub canvas: CanvasState,
    pub history: History,
    pub tools: ToolController,
    /// `None` for unsaved/untitled documents.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    /// Display name (derived from path or "Untitled-N").
    pub name: String,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            canvas: CanvasState::new(width, height),
            history: History::default(),
            tools: ToolController::new(),
            path: None,
            is_dirty: false,
            name: format!("Untitled-{}", untitled_counter),
        }
    }

    /// Open a file (native project or raster image) as a new project.
    pub fn from_file(path: PathBuf) -> Result<Self, FileError> {
        let canvas = io::load_image(&path)?;
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        Ok(Self {
            id: Uuid::new_v4(),
            canvas,
            history: History::default(),
            tools: ToolController::new(),
            path: Some(path),
            is_dirty: false,
            name,
        })
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    /// Display title with the dirty indicator.
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    // ---- file surface -----------------------------------------------------

    /// Save the full layer stack to the native format and adopt `path`.
    pub fn save_as(&mut self, path: PathBuf) -> Result<(), FileError> {
        io::save_project(&self.canvas, &path)?;
        self.name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone());
        self.path = Some(path);
        self.mark_clean();
        Ok(())
    }

    /// Export the flattened composite (or the project itself for `Rly`).
    pub fn export(
        &self,
        path: &Path,
        format: SaveFormat,
        quality: u8,
        tiff_compression: TiffCompression,
    ) -> Result<(), FileError> {
        io::export(&self.canvas, path, format, quality, tiff_compression)
    }

    // ---- pointer surface --------------------------------------------------

    pub fn pointer_pressed(&mut self, x: f32, y: f32, pressure: Option<f32>) {
        let input = PointerInput { x, y, pressure };
        self.tools.on_press(&mut self.canvas, input);
    }

    pub fn pointer_dragged(&mut self, x: f32, y: f32, pressure: Option<f32>) {
        let input = PointerInput { x, y, pressure };
        self.tools.on_drag(&mut self.canvas, input);
    }

    pub fn pointer_released(&mut self, x: f32, y: f32, pressure: Option<f32>) {
        let input = PointerInput { x, y, pressure };
        if let Some(cmd) = self.tools.on_release(&mut self.canvas, input) {
            self.history.push(cmd);
            self.is_dirty = true;
        }
    }

    /// Switch the active tool. A stroke in progress is finalized (and
    /// recorded) before the new tool activates.
    pub fn select_tool(&mut self, id: &str) -> Result<(), EngineError> {
        if !self.tools.registry().contains(id) {
            return Err(EngineError::UnknownTool(id.to_string()));
        }
        self.finalize_pending_stroke();
        self.tools.activate(id)
    }

    fn finalize_pending_stroke(&mut self) {
        if let Some(cmd) = self.tools.finalize(&mut self.canvas) {
            self.history.push(cmd);
            self.is_dirty = true;
        }
    }

    // ---- undo/redo surface ------------------------------------------------

    /// Undo one step; returns its description, or `None` at the bottom.
    pub fn undo(&mut self) -> Option<String> {
        self.finalize_pending_stroke();
        let result = self.history.undo(&mut self.canvas);
        if result.is_some() {
            self.is_dirty = true;
        }
        result
    }

    pub fn redo(&mut self) -> Option<String> {
        self.finalize_pending_stroke();
        let result = self.history.redo(&mut self.canvas);
        if result.is_some() {
            self.is_dirty = true;
        }
        result
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ---- layer command surface --------------------------------------------

    /// Add a transparent layer on top, record it, and return its index.
    pub fn add_layer(&mut self, name: &str) -> usize {
        let index = self.canvas.add_layer(name, None);
        let resolved = self.canvas.layers[index].name().to_string();
        self.history.push(Box::new(LayerOpCommand::new(LayerOperation::Add {
            index,
            name: resolved,
            width: self.canvas.width(),
            height: self.canvas.height(),
        })));
        self.is_dirty = true;
        index
    }

    pub fn remove_layer(&mut self, index: usize) -> Result<(), EngineError> {
        let layer = self.canvas.layers.get(index).ok_or(EngineError::NotFound {
            index,
            len: self.canvas.layer_count(),
        })?;
        let snapshot = LayerSnapshot::capture(layer);
        self.canvas.remove_layer(index)?;
        self.history
            .push(Box::new(LayerOpCommand::new(LayerOperation::Delete { index, snapshot })));
        self.is_dirty = true;
        Ok(())
    }

    /// Reorder layers (indices clamp, matching the document operation).
    pub fn move_layer(&mut self, from: usize, to: usize) {
        if self.canvas.layers.is_empty() {
            return;
        }
        let last = self.canvas.layer_count() - 1;
        let (from, to) = (from.min(last), to.min(last));
        if from == to {
            return;
        }
        self.canvas.move_layer(from, to);
        self.history
            .push(Box::new(LayerOpCommand::new(LayerOperation::Move { from, to })));
        self.is_dirty = true;
    }

    pub fn set_layer_opacity(&mut self, index: usize, opacity: f32) -> Result<(), EngineError> {
        let len = self.canvas.layer_count();
        let layer = self.canvas.layers.get_mut(index).ok_or(EngineError::NotFound {
            index,
            len,
        })?;
        let old = layer.opacity();
        layer.set_opacity(opacity)?;
        if old != opacity {
            self.history.push(Box::new(LayerOpCommand::new(LayerOperation::Opacity {
                index,
                old,
                new: opacity,
            })));
            self.is_dirty = true;
        }
        Ok(())
    }

    pub fn set_layer_visible(&mut self, index: usize, visible: bool) -> Result<(), EngineError> {
        let len = self.canvas.layer_count();
        let layer = self.canvas.layers.get_mut(index).ok_or(EngineError::NotFound {
            index,
            len,
        })?;
        if layer.visible != visible {
            let was_visible = layer.visible;
            layer.visible = visible;
            self.history.push(Box::new(LayerOpCommand::new(LayerOperation::Visibility {
                index,
                was_visible,
            })));
            self.is_dirty = true;
        }
        Ok(())
    }

    /// Rename a layer; returns the (possibly de-duplicated) name set.
    pub fn rename_layer(&mut self, index: usize, name: &str) -> Result<String, EngineError> {
        let old_name = self
            .canvas
            .layers
            .get(index)
            .ok_or(EngineError::NotFound { index, len: self.canvas.layer_count() })?
            .name()
            .to_string();
        let resolved = self.canvas.rename_layer(index, name)?;
        if resolved != old_name {
            self.history.push(Box::new(LayerOpCommand::new(LayerOperation::Rename {
                index,
                old_name,
                new_name: resolved.clone(),
            })));
            self.is_dirty = true;
        }
        Ok(resolved)
    }

    pub fn duplicate_layer(&mut self, index: usize) -> Result<usize, EngineError> {
        let new_index = self.canvas.duplicate_layer(index)?;
        let snapshot = LayerSnapshot::capture(&self.canvas.layers[new_index]);
        self.history.push(Box::new(LayerOpCommand::new(LayerOperation::Duplicate {
            new_index,
            snapshot,
        })));
        self.is_dirty = true;
        Ok(new_index)
    }

    /// Active-layer changes are view state — not recorded.
    pub fn set_active_layer(&mut self, index: usize) -> Result<(), EngineError> {
        self.canvas.set_active_layer(index)
    }

    // ---- selection surface ------------------------------------------------

    /// Selection changes are transient view state: never recorded in
    /// history, but a stroke in progress is finalized first so its commit
    /// uses the mask it started under.
    pub fn set_selection(&mut self, shape: SelectionShape) {
        self.finalize_pending_stroke();
        self.canvas.set_selection(shape);
    }

    pub fn clear_selection(&mut self) {
        self.finalize_pending_stroke();
        self.canvas.clear_selection();
    }

    pub fn selection_geometry(&self) -> Option<SelectionShape> {
        self.canvas.selection().cloned()
    }

    // ---- display surface --------------------------------------------------

    /// The composited raster for display or export.
    pub fn composite(&self) -> PixelBuffer {
        self.canvas.composite()
    }

    /// Layer-list snapshot for the layers panel, bottom to top.
    pub fn layer_panel(&self) -> Vec<LayerInfo> {
        self.canvas
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| LayerInfo {
                name: layer.name().to_string(),
                visible: layer.visible,
                opacity: layer.opacity(),
                blend_mode: layer.blend_mode,
                offset: layer.offset,
                width: layer.pixels.width(),
                height: layer.pixels.height(),
                is_active: self.canvas.active_layer_index == Some(i),
            })
            .collect()
    }
}
