//! Capture and replay of broker traffic.
//!
//! [`Recorder`] turns inbound messages into a time-annotated log file;
//! [`Replayer`] reads that file back and republishes it with the original
//! pacing. Both talk to the broker only through [`tape_api::BrokerLink`].

pub mod codec;
pub mod error;
pub mod log;
pub mod recorder;
pub mod replayer;

pub use codec::{decode_payload, encode_payload};
pub use error::TapeError;
pub use recorder::{Recorder, WILDCARD};
pub use replayer::{DEFAULT_COOLDOWN, ReplayStats, Replayer};
