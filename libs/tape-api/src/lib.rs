//! Shared types and collaborator traits of the capture/replay tool.
//!
//! This crate has no I/O and no runtime dependency: the engine, the
//! transports and the test stubs all build on it.

pub mod error;
pub mod link;
pub mod types;
pub mod util;

pub use error::{ErrorKind, LinkError};
pub use link::{BrokerLink, Clock, LinkFuture, MessageHandler, SystemClock};
pub use types::{Message, PayloadEncoding, QoS, Record, SslConfig};
pub use util::now_secs;
