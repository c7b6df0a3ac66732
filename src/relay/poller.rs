//! Outbox poller: drains pending outbox messages into the event bus.
//!
//! Delivery is at-least-once. A message is marked processed only after every
//! handler accepted it; failures bump the retry count and stamp an earliest
//! next-attempt time, so a backing-off message waits without holding up the
//! rest of the queue. Once the retry budget is exhausted the message is
//! parked: never re-polled, still queryable.

use crate::config::Config;
use crate::db::Repository;
use crate::domain::TimeMs;
use crate::relay::bus::EventBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct OutboxPoller {
    repo: Arc<Repository>,
    bus: Arc<EventBus>,
    config: Config,
    /// Non-reentrancy guard; overlapping polls are skipped, not queued.
    running: AtomicBool,
}

impl OutboxPoller {
    pub fn new(repo: Arc<Repository>, bus: Arc<EventBus>, config: Config) -> Self {
        Self {
            repo,
            bus,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Earliest next attempt after a failure: 2^retries seconds out, capped.
    fn next_attempt(&self, retry_count: i32, now: TimeMs) -> TimeMs {
        let secs = 2u64
            .saturating_pow(retry_count.max(0) as u32)
            .min(self.config.outbox_backoff_cap_secs);
        TimeMs::new(now.as_i64() + secs as i64 * 1000)
    }

    /// Drain one batch of pending messages. Returns how many were delivered.
    /// A no-op when a previous poll is still in flight.
    pub async fn poll_once(&self) -> Result<usize, sqlx::Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(0);
        }
        let result = self.drain_batch().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_batch(&self) -> Result<usize, sqlx::Error> {
        let messages = self
            .repo
            .fetch_pending_outbox(
                self.config.outbox_batch_size,
                self.config.outbox_max_retries,
                TimeMs::now(),
            )
            .await?;

        let mut delivered = 0;
        for message in messages {
            let event = match message.event() {
                Ok(event) => event,
                Err(e) => {
                    error!(message_id = message.id, error = %e, "outbox payload undecodable");
                    let now = TimeMs::now();
                    self.repo
                        .record_outbox_failure(
                            message.id,
                            &format!("bad payload: {e}"),
                            self.next_attempt(message.retry_count + 1, now),
                        )
                        .await?;
                    continue;
                }
            };

            match self.bus.publish(&event).await {
                Ok(()) => {
                    let now = TimeMs::now();
                    self.repo.insert_event_record(&event, None, now).await?;
                    self.repo.mark_outbox_processed(message.id, now).await?;
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        message_id = message.id,
                        event = message.event_type.as_str(),
                        retry_count = message.retry_count,
                        error = %e,
                        "event delivery failed"
                    );
                    let now = TimeMs::now();
                    self.repo
                        .record_outbox_failure(
                            message.id,
                            &e.to_string(),
                            self.next_attempt(message.retry_count + 1, now),
                        )
                        .await?;
                }
            }
        }
        Ok(delivered)
    }

    /// Delete processed messages past the retention window.
    pub async fn purge_processed(&self) -> Result<u64, sqlx::Error> {
        let cutoff = TimeMs::now().minus_days(self.config.outbox_retention_days);
        let deleted = self.repo.delete_processed_outbox_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "purged processed outbox messages");
        }
        Ok(deleted)
    }

    /// Poll loop; runs until the process shuts down.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(self.config.outbox_poll_secs));
            loop {
                interval.tick().await;
                if let Err(e) = self.poll_once().await {
                    error!(error = %e, "outbox poll failed");
                }
            }
        })
    }

    /// Hourly retention sweep.
    pub fn spawn_retention(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                if let Err(e) = self.purge_processed().await {
                    error!(error = %e, "outbox retention sweep failed");
                }
            }
        })
    }
}
