pub mod controller;
pub mod error;
pub mod identity;
pub mod poller;
pub mod publisher;
pub mod room;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{ConnectOutcome, ConnectionPhase, PresenceController, PresenceStatus};
pub use error::{PresenceError, StoreError};
pub use identity::{CallerIdentity, IdentityProvider, SessionIdentity};
pub use room::{RoomId, RoomScope};
pub use store::{HttpPresenceStore, MemoryPresenceStore, PresenceStore};
