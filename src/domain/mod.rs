pub mod event;
pub mod types;

pub use event::{
    CallbackPayload, Event, EventKind, EventType, InboundMessage, JoinRequest, MessageRef,
    UserProfile,
};
pub use types::{BroadcastJob, BroadcastReport, PendingJoinRequest, StoredMessage, UserRecord};
