pub mod repository;
pub mod sqlite;

pub use repository::{
    InMemorySessionStore, ModuleRecord, SessionRecord, SessionStore, StorageError,
};
pub use sqlite::{SqliteInitError, SqliteSessionStore};
