use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tape_api::{BrokerLink, Clock, Message, MessageHandler, PayloadEncoding, QoS, Record};

use crate::codec::encode_payload;
use crate::error::TapeError;
use crate::log;

/// Filter used when no topics are given.
pub const WILDCARD: &str = "#";

// ═══════════════════════════════════════════════════════════════
//  Capture state
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Capture {
    recording: bool,
    /// Arrival time of the last appended record (or session start).
    last_arrival: f64,
    records: Vec<Record>,
}

// ═══════════════════════════════════════════════════════════════
//  Recorder
// ═══════════════════════════════════════════════════════════════

/// Turns the inbound message stream into a time-annotated log.
///
/// The transport pushes messages through `MessageHandler::on_message`
/// from its own task; `start`/`stop` may run on any other task. All
/// mutable state sits behind one mutex.
pub struct Recorder {
    link: Arc<dyn BrokerLink>,
    clock: Arc<dyn Clock>,
    path: PathBuf,
    encoding: PayloadEncoding,
    state: Mutex<Capture>,
}

impl Recorder {
    pub fn new(
        link: Arc<dyn BrokerLink>,
        clock: Arc<dyn Clock>,
        path: impl Into<PathBuf>,
        encoding: PayloadEncoding,
    ) -> Self {
        Self {
            link,
            clock,
            path: path.into(),
            encoding,
            state: Mutex::new(Capture::default()),
        }
    }

    /// Subscribe and begin a capture session.
    ///
    /// An empty topic list subscribes to every topic. The log of a previous
    /// session is discarded. Fails with `Config` before subscribing when the
    /// log path is empty.
    pub async fn start(&self, topics: &[String], qos: QoS) -> Result<(), TapeError> {
        if self.lock().recording {
            return Err(TapeError::AlreadyRecording);
        }
        log::check_path(&self.path)?;

        if topics.is_empty() {
            self.link.subscribe(WILDCARD, qos).await?;
            tracing::info!(filter = WILDCARD, %qos, "subscribed");
        } else {
            for filter in topics {
                self.link.subscribe(filter, qos).await?;
                tracing::info!(%filter, %qos, "subscribed");
            }
        }

        let mut state = self.lock();
        if state.recording {
            return Err(TapeError::AlreadyRecording);
        }
        state.records.clear();
        state.last_arrival = self.clock.now();
        state.recording = true;
        tracing::info!(file = %self.path.display(), encoding = %self.encoding, "recording started");
        Ok(())
    }

    /// End the session and write the log file.
    ///
    /// Returns the number of rows written. The records stay in memory.
    pub async fn stop(&self) -> Result<u64, TapeError> {
        let records = {
            let mut state = self.lock();
            if !state.recording {
                return Err(TapeError::NotRecording);
            }
            state.recording = false;
            state.records.clone()
        };

        if let Err(e) = self.link.stop_loop().await {
            tracing::warn!(error = %e, "failed to stop inbound loop");
        }
        tracing::info!(messages = records.len(), "recording stopped");

        tracing::info!(file = %self.path.display(), "saving messages to output file");
        let rows = log::save(&self.path, &records)?;
        tracing::info!(file = %self.path.display(), rows, "log saved");
        Ok(rows)
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// Snapshot of the captured records.
    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Capture> {
        // A panic while holding the lock cannot leave `Capture` half-updated:
        // every mutation is a single push or field store.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageHandler for Recorder {
    fn on_message(&self, message: Message) {
        let mut state = self.lock();
        if !state.recording {
            return;
        }

        let now = self.clock.now();
        let payload = match encode_payload(self.encoding, &message.payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "dropping message");
                return;
            }
        };

        // A clock that steps backwards yields zero, never a negative delay.
        let delta = (now - state.last_arrival).max(0.0);
        tracing::debug!(
            topic = %message.topic,
            qos = %message.qos,
            retain = message.retain,
            delta,
            "message received"
        );
        state.records.push(Record {
            topic: message.topic,
            payload,
            qos: message.qos,
            retain: message.retain,
            arrival_time: now,
            delta,
        });
        state.last_arrival = now;
    }
}
