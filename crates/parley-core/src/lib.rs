//! # parley-core
//!
//! The live half of the relay. This crate keeps track of who is connected
//! and routes events between them:
//!
//! - **Presence** ([`presence`]) binds identities to live connections
//! - **Membership** ([`membership`]) keeps channel subscriptions in sync with
//!   the durable group records
//! - **Contacts** ([`contacts`]) establishes contacts from invites and pushes
//!   contact/group snapshots
//! - **Router** ([`router`]) persists and delivers direct and group messages
//! - **Gateway** ([`gateway`]) is the seam to durable storage
//!
//! [`Relay`] ties the components together and is what a transport talks to.

pub mod connection;
pub mod contacts;
pub mod error;
pub mod gateway;
pub mod membership;
pub mod presence;
pub mod relay;
pub mod router;

#[cfg(test)]
mod testing;

pub use connection::ConnectionHandle;
pub use error::{RelayError, Result};
pub use gateway::{Gateway, GatewayError, SqliteGateway};
pub use relay::Relay;
