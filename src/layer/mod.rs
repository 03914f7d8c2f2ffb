//! Layer identities, per-layer configuration and paint-order resolution.

/// Layer configuration model.
pub mod model;
/// Active layer resolution from the default stack and an optional override.
pub mod order;
