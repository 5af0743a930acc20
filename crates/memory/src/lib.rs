//! Session stores for opsclaw.
//!
//! Both backends implement [`opsclaw_core::SessionStore`]: SQLite for the
//! gateway and CLI, an in-process map for tests and ephemeral use.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemorySessionStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionStore;
