//! Wire protocol between room participants.
//!
//! Every message is one variant of a single tagged union, serialized as JSON
//! with a `type` discriminator. Unknown or malformed messages fail to decode;
//! callers log and ignore them so newer peers can talk to older ones.

mod message;

pub use message::{decode, encode, ProtocolMessage};
