//! Embedded single-file backend.
//!
//! One `SQLite` file per logical name, opened in WAL journal mode so the
//! migration gate can read the file while the facade still holds its handle.

mod backup;
mod schema;
mod store;

pub use backup::{dump, idempotent_create_index, idempotent_create_table};
pub use store::EmbeddedStore;
