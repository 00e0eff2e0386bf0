//! Database module: row models and the upsert-only persistence gateway.
//!
//! - `model`: rows as they come back from SQLite.
//! - `repo`: SQL-only functions; every write is insert-or-replace by key.
//!
//! External modules import from `channel_harvest::db`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::ChannelInfoRow;
