//! Shared protocol types for termgate
//!
//! Defines the binary frame envelope exchanged between browser clients and
//! the gateway, the message-type namespace, the JSON header structs, and the
//! stable error-code taxonomy.

pub mod error;
pub mod frame;
pub mod messages;

pub use error::ErrorCode;
pub use frame::{decode, encode, DecodeError, Frame, MessageType, MAGIC, VERSION};
pub use messages::*;
