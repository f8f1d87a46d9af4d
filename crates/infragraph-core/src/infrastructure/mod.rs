//! Infrastructure layer
//!
//! Contains implementations of the domain traits against concrete storage.

pub mod graph;

pub use graph::{InMemoryGraphStorage, SqliteGraphStorage};
