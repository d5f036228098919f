//! HTTP handlers for entity CRUD and the catalog index.

pub mod entity;
pub use entity::*;
