//! JSON codec for Roomcast wire events.
//!
//! Events travel as WebSocket text frames; this module is the only place
//! raw client input is parsed.

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum accepted size of an inbound event, in bytes.
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound event exceeds [`MAX_EVENT_SIZE`].
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// JSON encoding/decoding error, including unknown event names.
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a server event to a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a client event from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the input is oversized, not valid JSON, names an
/// unknown event, or carries a payload that does not match the event.
pub fn decode(input: &str) -> Result<ClientEvent, ProtocolError> {
    if input.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(input.len()));
    }
    Ok(serde_json::from_str(input)?)
}
