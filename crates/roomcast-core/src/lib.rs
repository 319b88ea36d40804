//! # roomcast-core
//!
//! The presence and delivery coordination engine for Roomcast.
//!
//! This crate provides the stateful heart of the service:
//!
//! - **PresenceRegistry** - who occupies which room, with reconnect grace
//!   periods that keep presence from flapping across page reloads
//! - **SessionCoordinator** - event-driven handling of join/leave/send/
//!   mark-read with race-free notification semantics
//! - **MessageStore** - durable message log and read receipts behind a trait
//! - **Notifier** - the fan-out seam to the transport
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │  Connection │────▶│   Coordinator    │────▶│   Notifier    │
//! └─────────────┘     └──────────────────┘     └───────────────┘
//!                        │            │
//!                        ▼            ▼
//!               ┌─────────────┐  ┌─────────────┐
//!               │  Registry   │  │    Store    │
//!               └─────────────┘  └─────────────┘
//! ```

pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod registry;
pub mod store;

pub use coordinator::{Limits, SessionCoordinator};
pub use error::EngineError;
pub use fanout::Notifier;
pub use registry::{
    Expiration, JoinKind, PresenceEntry, PresenceRegistry, Registration, RegistryError,
    RegistryStats,
};
pub use store::{MemoryStore, MessageStore, StoreError, StoredMessage};
