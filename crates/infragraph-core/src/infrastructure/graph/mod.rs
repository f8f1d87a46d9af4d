//! GraphStorage backends

mod memory;
mod sqlite;

pub use memory::InMemoryGraphStorage;
pub use sqlite::SqliteGraphStorage;
