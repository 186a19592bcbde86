//! Server-pushed change feed: wire protocol and the subscribing client.

mod client;
pub mod protocol;

pub use client::{ChangeFeedClient, FeedSubscription};
pub use protocol::{ChangeEvent, ChangePayload, FeedMessage};
