//! # entrydesk-collab: presence for collaboratively edited entries
//!
//! Tracks which users are viewing a document and which field each of them
//! is focused on, using a small broadcast ("shout") protocol carried on the
//! document's event channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   shouts    ┌──────────────┐
//! │ PresenceHub  │ ──────────► │ ShoutRoom    │
//! │ (per editor) │ ◄────────── │ (per doc)    │
//! └──────┬───────┘  DocEvents  └──────────────┘
//!        │
//!        ▼
//!  watch views: collaborators / collaborators_for(field, locale)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: `[kind, sender, payload?]` shout tuples and document events
//! - [`throttle`]: keyed trailing-edge throttle for focus shouts
//! - [`presence`]: collaborator tracking, heartbeat and timeout eviction
//! - [`room`]: per-document fan-out standing in for the document session

pub mod protocol;
pub mod throttle;
pub mod presence;
pub mod room;

// Re-exports for convenience
pub use protocol::{DocEvent, FieldPath, Shout, ShoutError, ShoutKind, UserId, SHOUT_EVENT};
pub use presence::{
    Applied, Collaborator, FieldCollaborators, PresenceConfig, PresenceHub, PresenceState,
    ShoutFn, ShoutSink,
};
pub use room::{RoomConfig, RoomRegistry, RoomSink, RoomStats, ShoutRoom};
pub use throttle::{KeyedThrottle, Offer};
