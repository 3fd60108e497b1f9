use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tape_api::{BrokerLink, Message, PayloadEncoding};

use crate::codec::decode_payload;
use crate::error::TapeError;
use crate::log;

/// Pause between the end of one pass and the start of the next.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

/// Outcome of a replay invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Passes started (a cancelled pass counts).
    pub passes: u64,
    /// Messages published across all passes.
    pub published: u64,
}

/// A log row ready to go out: decoded payload plus the pause before it.
struct Entry {
    message: Message,
    delay: Duration,
}

// ═══════════════════════════════════════════════════════════════
//  Replayer
// ═══════════════════════════════════════════════════════════════

/// Republishes a capture log with its original pacing.
pub struct Replayer {
    link: Arc<dyn BrokerLink>,
    path: PathBuf,
    encoding: PayloadEncoding,
    cooldown: Duration,
    progress: bool,
}

impl Replayer {
    pub fn new(link: Arc<dyn BrokerLink>, path: impl Into<PathBuf>, encoding: PayloadEncoding) -> Self {
        Self {
            link,
            path: path.into(),
            encoding,
            cooldown: DEFAULT_COOLDOWN,
            progress: false,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Print a `published/total` counter to stderr while replaying.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Replay the log once, or forever when `looping`.
    pub async fn replay(&self, looping: bool) -> Result<ReplayStats, TapeError> {
        self.replay_until(looping, &CancellationToken::new()).await
    }

    /// Replay the log, stopping early when `token` is cancelled.
    ///
    /// The whole log is loaded and decoded before the first publish: a bad
    /// row fails the call without publishing anything.
    pub async fn replay_until(
        &self,
        looping: bool,
        token: &CancellationToken,
    ) -> Result<ReplayStats, TapeError> {
        log::check_path(&self.path)?;
        let entries = self.load_entries()?;
        tracing::info!(
            file = %self.path.display(),
            messages = entries.len(),
            looping,
            "starting replay"
        );

        let mut stats = ReplayStats::default();
        loop {
            stats.passes += 1;
            if !self.run_pass(&entries, token, &mut stats).await? {
                tracing::info!(published = stats.published, "replay cancelled");
                return Ok(stats);
            }
            tracing::info!(pass = stats.passes, published = stats.published, "end of replay");

            if !looping {
                return Ok(stats);
            }

            tracing::info!("restarting replay");
            if !pause(self.cooldown, token).await {
                tracing::info!(published = stats.published, "replay cancelled");
                return Ok(stats);
            }
        }
    }

    fn load_entries(&self) -> Result<Vec<Entry>, TapeError> {
        log::load(&self.path)?
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                let delay = Duration::try_from_secs_f64(record.delta)
                    .map_err(|e| TapeError::parse(i as u64 + 1, format!("delta out of range: {e}")))?;
                let payload = decode_payload(self.encoding, &record.payload)?;
                Ok(Entry {
                    delay,
                    message: Message {
                        topic: record.topic,
                        payload,
                        qos: record.qos,
                        retain: record.retain,
                    },
                })
            })
            .collect()
    }

    /// One pass over the log. Returns `false` when cancelled.
    async fn run_pass(
        &self,
        entries: &[Entry],
        token: &CancellationToken,
        stats: &mut ReplayStats,
    ) -> Result<bool, TapeError> {
        let total = entries.len();
        for (i, entry) in entries.iter().enumerate() {
            // The first row of every pass goes out immediately.
            if i > 0 && !pause(entry.delay, token).await {
                return Ok(false);
            }
            if token.is_cancelled() {
                return Ok(false);
            }

            tracing::debug!(
                topic = %entry.message.topic,
                qos = %entry.message.qos,
                retain = entry.message.retain,
                "publishing"
            );
            self.link.publish(entry.message.clone()).await?;
            stats.published += 1;

            if self.progress {
                eprint!("\r  MQTT REPLAY {}/{total}", i + 1);
                let _ = std::io::stderr().flush();
            }
        }
        if self.progress && total > 0 {
            eprintln!();
        }
        Ok(true)
    }
}

/// Sleep for `delay`. Returns `false` if cancelled first.
async fn pause(delay: Duration, token: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = token.cancelled() => false,
    }
}
