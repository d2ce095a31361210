//! Background loops driving the broker's periodic work.
//!
//! Each loop is an `async fn` taking the shared broker, meant to be handed
//! to `tokio::spawn`. A tick takes the lock, does one bounded pass and
//! releases it.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use super::engine::{Broker, SharedBroker, lock_broker};

/// Queue expiry and redelivery period.
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(100);
pub const MEMORY_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Broker {
    /// Drops expired messages and requeues unconfirmed ones.
    pub async fn start_updater(broker: SharedBroker) {
        let mut interval = ticker(UPDATE_INTERVAL);
        loop {
            interval.tick().await;
            let reclaimed = lock_broker(&broker).process_queues();
            if reclaimed.expired > 0 || reclaimed.requeued > 0 {
                debug!(
                    "Updater: {} expired, {} requeued",
                    reclaimed.expired, reclaimed.requeued
                );
            }
        }
    }

    /// Starts a background snapshot every `period` and reaps finished ones.
    pub async fn start_snapshot_loop(broker: SharedBroker, period: Duration) {
        if period.is_zero() {
            return;
        }
        let mut interval = ticker(period);
        loop {
            interval.tick().await;
            let mut guard = lock_broker(&broker);
            guard.poll_background_save();
            if guard.is_saving() {
                warn!("Previous background snapshot still running, skipping");
                continue;
            }
            // failures are logged by `save`
            let _ = guard.save(true);
        }
    }

    pub async fn start_memory_check(broker: SharedBroker) {
        let mut interval = ticker(MEMORY_CHECK_INTERVAL);
        loop {
            interval.tick().await;
            let mut guard = lock_broker(&broker);
            guard.check_memory();
            guard.poll_background_save();
        }
    }

    /// Closes connections idle for longer than the client timeout.
    pub async fn start_idle_sweep(broker: SharedBroker) {
        if lock_broker(&broker).options().client_timeout_ms == 0 {
            return;
        }
        let mut interval = ticker(IDLE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            lock_broker(&broker).evict_idle();
        }
    }
}
