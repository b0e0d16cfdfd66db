//! Storage traits.

mod graph;

pub use graph::{EntityUpdate, GraphStore, NewEntity};
