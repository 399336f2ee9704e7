//! Liveness heartbeat. Purely cosmetic: it reports that an iteration is still
//! running and never influences any decision.

use crate::utils::format_elapsed;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Logs a line every `interval` until `cancel` fires. Returns the number of
/// beats emitted.
pub async fn run_heartbeat(iteration: u32, interval: Duration, cancel: CancellationToken) -> u32 {
    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut beats = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                beats += 1;
                info!(iteration, "⏱ Iteration {} still running ({})", iteration, format_elapsed(start.elapsed()));
            }
        }
    }
    beats
}
