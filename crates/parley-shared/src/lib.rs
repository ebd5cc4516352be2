//! # parley-shared
//!
//! Types shared by every parley crate: identity and id newtypes, the durable
//! record models, the projections pushed to clients, and the JSON event
//! protocol spoken over a client connection.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use models::{Contact, ContactView, Group, GroupView, Message, Snapshot};
pub use protocol::{ClientEvent, ServerEvent};
pub use types::{ChannelId, ConnectionId, ContactId, Identity, MessageId};
