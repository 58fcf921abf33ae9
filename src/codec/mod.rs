//! Codec module - field-level encoding for record bodies.
//!
//! - [`fixed_point`] - scale families and hue wrapping
//! - [`Field`] - one fixed-offset, fixed-width, optionally scaled field
//! - [`GroupCommand`] - bitmask-prefixed bodies that update a field subset
//!
//! # Design
//!
//! Fields are `const` values declared in per-tag tables, so every feature
//! module shares the same read/write path instead of hand-written byte
//! shuffling per setter.

mod field;
pub mod fixed_point;
mod group;

pub use field::{Field, Scale, Width};
pub use group::GroupCommand;
