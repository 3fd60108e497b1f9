use std::future::Future;
use std::pin::Pin;

use crate::error::LinkError;
use crate::types::{Message, QoS};
use crate::util::now_secs;

/// Boxed future returned by `BrokerLink` methods.
pub type LinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LinkError>> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  Broker link
// ════════════════════════════════════════════════════════════════

/// Connection to a broker as the engine sees it.
///
/// Connecting, authentication and TLS happen before a link is handed to
/// the engine. Inbound messages do not flow through this trait: the link
/// owns its delivery loop and pushes them into a `MessageHandler`.
pub trait BrokerLink: Send + Sync {
    /// Subscribe to a topic filter.
    fn subscribe(&self, filter: &str, qos: QoS) -> LinkFuture<'_, ()>;

    /// Publish one message.
    fn publish(&self, message: Message) -> LinkFuture<'_, ()>;

    /// Halt inbound delivery. No `on_message` call starts after this resolves.
    fn stop_loop(&self) -> LinkFuture<'_, ()>;
}

/// Receiver of inbound messages.
///
/// The transport calls it from its own task, one message at a time.
/// Implementations must not block or perform I/O.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: Message);
}

// ════════════════════════════════════════════════════════════════
//  Clock
// ════════════════════════════════════════════════════════════════

/// Time source for arrival timestamps, in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock (seconds since Unix epoch).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        now_secs()
    }
}
