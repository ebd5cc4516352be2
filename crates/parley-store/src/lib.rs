//! # parley-store
//!
//! Durable storage for contacts, groups and messages, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every record.
//! Callers running on an async runtime are expected to move calls onto a
//! blocking thread.

pub mod contacts;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;

mod error;

pub use contacts::ContactRemoval;
pub use database::Database;
pub use error::{Result, StoreError};
pub use groups::GroupRemoval;
pub use parley_shared::models::{Contact, Group, Message};
