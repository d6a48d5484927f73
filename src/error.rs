use thiserror::Error;

/// Contract violations surfaced by the document engine.
///
/// These are programming errors on the caller's side (bad coordinates, bad
/// indices, out-of-domain parameters) and are returned rather than panicking
/// so an embedding shell can report them. Tool dispatch deliberately does
/// NOT surface `NoActiveLayer` — pointer input on an empty document is a
/// silent no-op, not a fault.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("pixel coordinate ({x}, {y}) outside buffer bounds {width}x{height}")]
    OutOfBounds { x: u32, y: u32, width: u32, height: u32 },

    #[error("{what} = {value} outside allowed range [{min}, {max}]")]
    InvalidRange {
        what: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("layer index {index} invalid (stack holds {len})")]
    NotFound { index: usize, len: usize },

    #[error("operation requires an active layer but the document has none")]
    NoActiveLayer,

    #[error("no tool registered under id '{0}'")]
    UnknownTool(String),
}
