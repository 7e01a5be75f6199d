//! Audio assembly: concatenating stored segments into one narration.

pub mod merger;

pub use merger::merge;
