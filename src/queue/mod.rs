//! Offline action queue: the shape of a deferred mutation. Persistence
//! lives in [`crate::store`], replay in [`crate::sync`].

mod action;

pub use action::{ActionType, MutationMethod, QueuedAction};
