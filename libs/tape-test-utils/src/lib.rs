//! Test doubles for the tape crates.
//!
//! [`RecordingLink`] stands in for a broker connection and remembers every
//! call made through [`BrokerLink`]; [`ManualClock`] is a [`Clock`] the
//! test moves by hand.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::time::Instant;

use tape_api::{BrokerLink, Clock, LinkError, LinkFuture, Message, QoS};

/// A publish seen by [`RecordingLink`], stamped with tokio time.
#[derive(Debug, Clone)]
pub struct Published {
    pub message: Message,
    pub at: Instant,
}

/// In-memory [`BrokerLink`].
///
/// Publishes succeed until the optional failure budget runs out; after
/// that every publish fails with a protocol error.
#[derive(Default)]
pub struct RecordingLink {
    published: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    stop_calls: AtomicUsize,
    fail_subscribe: bool,
    publish_budget: Option<AtomicU64>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `subscribe` call fails.
    pub fn failing_subscribe() -> Self {
        Self {
            fail_subscribe: true,
            ..Self::default()
        }
    }

    /// Allow `n` publishes, then fail.
    pub fn failing_publish_after(n: u64) -> Self {
        Self {
            publish_budget: Some(AtomicU64::new(n)),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<Published> {
        lock(&self.published).clone()
    }

    /// Just the messages, in publish order.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.published).iter().map(|p| p.message.clone()).collect()
    }

    pub fn publish_count(&self) -> usize {
        lock(&self.published).len()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.subscriptions).clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn take_publish_slot(&self) -> bool {
        match &self.publish_budget {
            None => true,
            Some(budget) => budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok(),
        }
    }
}

impl BrokerLink for RecordingLink {
    fn subscribe(&self, filter: &str, qos: QoS) -> LinkFuture<'_, ()> {
        let filter = filter.to_string();
        Box::pin(async move {
            if self.fail_subscribe {
                return Err(LinkError::protocol(format!("subscribe to {filter} refused")));
            }
            lock(&self.subscriptions).push((filter, qos));
            Ok(())
        })
    }

    fn publish(&self, message: Message) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            if !self.take_publish_slot() {
                return Err(LinkError::io(format!("publish to {} failed", message.topic)));
            }
            lock(&self.published).push(Published {
                message,
                at: Instant::now(),
            });
            Ok(())
        })
    }

    fn stop_loop(&self) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Hand-driven [`Clock`].
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, secs: f64) {
        *lock(&self.now) = secs;
    }

    pub fn advance(&self, secs: f64) {
        *lock(&self.now) += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *lock(&self.now)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
