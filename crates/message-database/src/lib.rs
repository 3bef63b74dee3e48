//! SQLite store for outbound messages.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Versioned schema migrations
//! - The `Message` model shared with the dispatch engine
//! - Query helpers for inserting, polling and saving messages
//!
//! # Example
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let pending = db.call(move |conn| queries::fetch_pending(conn, 2)).await?;
//! ```
//!
//! Only SQL operations should run inside `db.call()`. Network calls and
//! serialization of payloads happen outside.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::{Message, NewMessage, MAX_CONTENT_LEN};
