//! Database module: row models, SQL repository functions and the store seam.
//!
//! - `model`: row structs returned by queries and their mapping to domain types.
//! - `repo`: SQL-only functions over a SQLite pool.
//! - `store`: the [`LocalStore`] capability the sync engine is built against,
//!   and its SQLite implementation.

pub mod model;
pub mod repo;
pub mod store;

pub use repo::*;

pub use store::{LocalStore, SqliteStore};
