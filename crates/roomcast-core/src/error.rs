//! Engine error taxonomy.

use thiserror::Error;

use crate::registry::RegistryError;
use crate::store::StoreError;

/// Errors surfaced to the originating connection only.
///
/// None of these variants imply a presence or storage mutation happened;
/// rejected requests leave state untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Empty or malformed username/room, or empty/oversized content.
    #[error("{0}")]
    Validation(&'static str),

    /// The username is already held in the room by a distinct live
    /// connection and this was not a grace-window reconnect.
    #[error("Username \"{0}\" is already taken in this room")]
    NameConflict(String),

    /// The connection has no active room association.
    #[error("You are not in a room")]
    NotInRoom,

    /// Storage failed for the triggering operation.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<RegistryError> for EngineError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NameTaken { username, .. } => Self::NameConflict(username),
        }
    }
}
