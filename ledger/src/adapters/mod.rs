pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryAdapter;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAdapter;
