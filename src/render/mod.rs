//! Render adapters.
//!
//! Adapters execute a finished filter graph; the engine itself never encodes.

/// Adapter trait, request type and cancellation token.
pub mod adapter;
/// `ffmpeg`-based adapter (MP4 output via system `ffmpeg`).
pub mod ffmpeg;
