//! Real-time distribution of newly indexed blocks, transactions and logs.
//!
//! Delivery is at-most-once: a subscriber whose queue is full loses events
//! and sees its dropped counter grow. Consumers that need completeness
//! re-query the chain store for the heights they missed.

pub mod bus;
pub mod error;
pub mod event;
pub mod filter;

pub use bus::{BusConfig, BusStats, EventBus, SubscriberInfo, SubscriptionHandle};
pub use error::BusError;
pub use event::{EventKind, IndexedEvent, TransactionEvent};
pub use filter::{SubscriptionFilter, TopicFilter};
