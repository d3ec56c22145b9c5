//! Background loops: the pending-request expiry sweep and the daily
//! earnings counter reset. Both keep running through failures and stop
//! when the shutdown channel flips.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::Gateway;
use crate::engine::RideServices;

/// After this many failures in a row a loop backs off before trying again.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const FAILURE_COOLDOWN: Duration = Duration::from_secs(60);

pub fn spawn_expiry_sweep<G: Gateway>(
    services: RideServices<G>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "expiry sweep started");
        let mut consecutive_failures = 0;
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match services.matching.sweep_expired(Utc::now()).await {
                Ok(_) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        "Expiry sweep failed: {}. ({} / {})",
                        e, consecutive_failures, MAX_CONSECUTIVE_FAILURES
                    );
                }
            }

            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                warn!(
                    "Expiry sweep failed {} times in a row, pausing for {} seconds",
                    consecutive_failures,
                    FAILURE_COOLDOWN.as_secs()
                );
                if sleep_or_shutdown(FAILURE_COOLDOWN, &mut shutdown).await {
                    break;
                }
                consecutive_failures = 0;
            }
        }
        info!("expiry sweep stopped");
    })
}

pub fn spawn_daily_reset<G: Gateway>(services: RideServices<G>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("daily earnings reset scheduled");
        loop {
            if sleep_or_shutdown(until_next_midnight(Utc::now()), &mut shutdown).await {
                break;
            }

            let mut attempt = 0;
            loop {
                attempt += 1;
                match services.earnings.reset_daily(Utc::now()).await {
                    Ok(_) => break,
                    Err(e) if attempt < MAX_CONSECUTIVE_FAILURES => {
                        warn!("Daily reset failed: {}. Retrying ({} / {})", e, attempt, MAX_CONSECUTIVE_FAILURES);
                        if sleep_or_shutdown(Duration::from_secs(5 * u64::from(attempt)), &mut shutdown).await {
                            return;
                        }
                    }
                    Err(e) => {
                        error!("Daily reset gave up after {} attempts: {}", attempt, e);
                        break;
                    }
                }
            }
        }
        info!("daily earnings reset stopped");
    })
}

/// Returns true when shutdown was requested during the wait.
async fn sleep_or_shutdown(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        _ = shutdown.changed() => true,
    }
}

fn until_next_midnight(now: DateTime<Utc>) -> Duration {
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc());
    match next {
        Some(midnight) => (midnight - now).to_std().unwrap_or(Duration::from_secs(1)),
        None => Duration::from_secs(24 * 60 * 60),
    }
}
