//! Domain layer: value objects, entities, the store capability and errors.

pub mod entity;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod value_object;

pub use entity::{Participant, Room, RoomConfig, SessionInfo};
pub use error::{RoomError, StoreError, ValueObjectError};
pub use snapshot::{ParticipantSnapshot, RoomSnapshot};
pub use store::{AtomicWrite, CommitOutcome, Entry, KeyValueStore, Mutation, WatchEvent, WatchStream};
pub use value_object::{
    ConnectionId, InstanceId, ParticipantName, RoomId, SessionToken, SubmittedValue, Timestamp,
    Version,
};
