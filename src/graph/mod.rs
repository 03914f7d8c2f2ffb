//! Composition graph: the node model and the builder that lowers active layers into it.

/// Lowering of resolved layers and timelines into a [`model::FilterGraph`].
pub mod builder;
/// Nodes, operations and the ffmpeg `-filter_complex` text they render to.
pub mod model;
