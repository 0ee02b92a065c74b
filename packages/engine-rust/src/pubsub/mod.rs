//! Topic publish/subscribe with glob patterns and isolated listeners.
//!
//! - [`Broker`]: subscription table, fan-out and failure side channel
//! - [`MessageListener`]: async callback invoked once per delivered message
//! - [`Message`]: the delivered payload with its topic and matched pattern
//!
//! Each subscription owns a bounded queue drained by its own Tokio task, so
//! `publish` never waits on a listener and one slow or failing listener
//! cannot affect another.

pub mod broker;
pub mod error;
pub mod listener;
pub mod message;

pub use broker::*;
pub use error::*;
pub use listener::*;
pub use message::*;
