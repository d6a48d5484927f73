//! Tool registry — the plugin surface.
//!
//! The entire extension contract is [`ToolRegistry::register`]: a string id
//! mapped to a factory producing an object satisfying the [`Tool`]
//! capability. Built-ins are registered the same way at startup, so
//! registered tools are selectable alongside them with no further hooks.
//! There is no dynamic loading here; an embedding shell calls `register`
//! explicitly for whatever it wants to add.

use std::collections::HashMap;

use crate::tools::{
    BrushTool, EllipseSelectionTool, EraserTool, MoveSelectionTool, MoveTool, PencilTool,
    RectangleSelectionTool, Tool,
};

pub type ToolFactory = Box<dyn Fn() -> Box<dyn Tool> + Send + Sync>;

pub struct ToolRegistry {
    factories: HashMap<String, ToolFactory>,
    /// Registration order, for stable listing in a tool panel.
    order: Vec<String>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ToolRegistry {
    pub const DEFAULT_TOOL: &'static str = "brush";

    /// An empty registry with no tools at all.
    pub fn new() -> Self {
        Self { factories: HashMap::new(), order: Vec::new() }
    }

    /// The built-in tool set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("brush", Box::new(|| Box::new(BrushTool::new())));
        registry.register("eraser", Box::new(|| Box::new(EraserTool::new())));
        registry.register("pencil", Box::new(|| Box::new(PencilTool::new())));
        registry.register("move", Box::new(|| Box::new(MoveTool::new())));
        registry.register("move-selection", Box::new(|| Box::new(MoveSelectionTool::new())));
        registry.register("rectangle-select", Box::new(|| Box::new(RectangleSelectionTool::new())));
        registry.register("ellipse-select", Box::new(|| Box::new(EllipseSelectionTool::new())));
        registry
    }

    /// Register a tool factory under `id`. Re-registering an id replaces
    /// the factory but keeps its listing position.
    pub fn register(&mut self, id: &str, factory: ToolFactory) {
        if !self.factories.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.factories.insert(id.to_string(), factory);
    }

    /// Instantiate a fresh tool. `None` for unknown ids.
    pub fn create(&self, id: &str) -> Option<Box<dyn Tool>> {
        self.factories.get(id).map(|f| f())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasState;
    use crate::history::Command;
    use crate::tools::{PointerInput, ToolController, ToolSettings};

    #[test]
    fn builtins_are_registered_in_order() {
        let registry = ToolRegistry::default();
        let ids: Vec<&str> = registry.ids().collect();
        assert_eq!(
            ids,
            [
                "brush",
                "eraser",
                "pencil",
                "move",
                "move-selection",
                "rectangle-select",
                "ellipse-select"
            ]
        );
        assert!(registry.create("brush").is_some());
        assert!(registry.create("lasso").is_none());
    }

    /// A plugin tool that fills the whole active layer on release.
    struct FillTool {
        pressed: bool,
    }

    impl Tool for FillTool {
        fn name(&self) -> &'static str {
            "Fill"
        }

        fn on_press(&mut self, _doc: &mut CanvasState, _s: &ToolSettings, _i: PointerInput) {
            self.pressed = true;
        }

        fn on_drag(&mut self, _doc: &mut CanvasState, _s: &ToolSettings, _i: PointerInput) {}

        fn on_release(
            &mut self,
            doc: &mut CanvasState,
            settings: &ToolSettings,
            _input: PointerInput,
        ) -> Option<Box<dyn Command>> {
            if !self.pressed {
                return None;
            }
            self.pressed = false;
            if let Some(layer) = doc.active_layer_mut() {
                layer.pixels.fill(settings.primary_color);
            }
            None
        }
    }

    #[test]
    fn registered_plugin_tool_is_selectable() {
        let mut controller = ToolController::new();
        controller
            .registry_mut()
            .register("fill", Box::new(|| Box::new(FillTool { pressed: false })));
        controller.activate("fill").unwrap();
        assert_eq!(controller.active_tool_name(), "Fill");

        let mut doc = CanvasState::new_empty(4, 4);
        doc.add_layer("base", None);
        controller.settings.primary_color = image::Rgba([0, 255, 0, 255]);
        controller.on_press(&mut doc, PointerInput::new(1.0, 1.0));
        controller.on_release(&mut doc, PointerInput::new(1.0, 1.0));
        assert_eq!(doc.layers[0].pixels.get(3, 3).unwrap(), image::Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn re_registering_replaces_factory_but_keeps_position() {
        let mut registry = ToolRegistry::default();
        let before = registry.len();
        registry.register("brush", Box::new(|| Box::new(FillTool { pressed: false })));
        assert_eq!(registry.len(), before);
        assert_eq!(registry.ids().next(), Some("brush"));
        assert_eq!(registry.create("brush").map(|t| t.name()), Some("Fill"));
    }
}
