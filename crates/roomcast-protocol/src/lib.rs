//! # roomcast-protocol
//!
//! Wire event definitions for the Roomcast real-time messaging service.
//!
//! Events are exchanged as JSON text frames with an adjacently tagged
//! envelope: `{"event": "...", "data": {...}}`. Every event name and payload
//! is typed up front; unknown events and malformed payloads are rejected at
//! the boundary before they reach the session coordinator.
//!
//! ## Event Types
//!
//! - [`ClientEvent`] - requests sent by clients (`join`, `leave`,
//!   `send_message`, `mark_read`, `get_online_users`)
//! - [`ServerEvent`] - notifications sent by the server (`room_joined`,
//!   `user_joined`, `user_left`, `new_message`, `read_receipts_updated`, ...)
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, ClientEvent};
//!
//! let event = codec::decode(r#"{"event":"join","data":{"username":"alice","room":"lobby"}}"#).unwrap();
//! assert!(matches!(event, ClientEvent::Join { .. }));
//! ```

pub mod codec;
pub mod events;
pub mod validate;

pub use codec::{decode, encode, ProtocolError};
pub use events::{ClientEvent, MessageRecord, ReceiptUpdate, ServerEvent};
