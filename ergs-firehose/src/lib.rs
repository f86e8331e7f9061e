//! In-process pub/sub hub (C7) and the streaming firehose endpoint (C8).

mod envelope;
mod error;
mod hub;
mod session;

pub use envelope::{FirehoseEnvelope, SessionMode};
pub use error::FirehoseError;
pub use hub::{Hub, SubscriberId, DEFAULT_CAPACITY};
pub use session::{FirehoseSession, FirehoseSink};
