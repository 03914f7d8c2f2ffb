/// Song-title text rendering.
pub mod title;
