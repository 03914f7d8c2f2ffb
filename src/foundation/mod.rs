/// Canvas and color primitives.
pub mod core;
/// Error types shared by every stage.
pub mod error;
