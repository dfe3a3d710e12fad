//! Boundary interfaces between the propflow engine and its environment.
//!
//! The engine core never talks to a concrete backend. Everything it needs
//! from the outside world is expressed through three interfaces defined
//! here, plus the wire-level record types they exchange:
//!
//! - **[`ChangeFeedSource`]** — push side: one logical subscription per
//!   [`Collection`], delivering [`ChangeRecord`]s until the transport
//!   drops. [`FeedSubscription`] is the owning handle; dropping it or
//!   calling [`unsubscribe`](FeedSubscription::unsubscribe) synchronously
//!   stops delivery.
//!
//! - **[`EntityRepository`]** — pull side: list/create/update/remove over
//!   JSON payloads. Used for initial loads, periodic reconciliation polls,
//!   and user-initiated mutations.
//!
//! - **[`LocalStore`]** — durable local key/value storage for state that
//!   never touches the remote backend (notification lists, search history).
//!
//! [`MemoryFeed`] and [`MemoryStore`] are complete in-process
//! implementations used by tests and by embeddings without a live backend.
//! [`ReconnectConfig`] and [`backoff_delay`] define the shared
//! exponential-backoff policy consumers apply when a subscription fails.

pub mod backoff;
pub mod error;
pub mod memory;
pub mod record;
pub mod source;
pub mod storage;

pub use backoff::{ReconnectConfig, backoff_delay};
pub use error::FeedError;
pub use memory::MemoryFeed;
pub use record::{ChangeAction, ChangeRecord, Collection, ScopeFilter};
pub use source::{ChangeFeedSource, EntityRepository, FeedSubscription};
pub use storage::{FileStore, LocalStore, MemoryStore};
