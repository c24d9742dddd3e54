//! Periodic per-node maintenance

use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::topology::discover_locked;
use super::{pause, Inner, State};
use crate::events::Event;
use crate::messages::Request;
use crate::packets::Mac;

/// Rediscovery runs every cycle during a MAC's first hour, then at most hourly
const REDISCOVERY_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// What changed in wall-clock time since the previous cycle
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cycle {
    pub(crate) first_run: bool,
    pub(crate) day_changed: bool,
    /// Start of the current hour; node info older than this is refreshed
    pub(crate) hour_start: DateTime<Utc>,
}

fn hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

pub(crate) async fn update_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut first_run = true;
    let mut last_day: NaiveDate = Local::now().date_naive();

    loop {
        let Some(period) = inner.state.lock().await.update_period else {
            return;
        };

        let today = Local::now().date_naive();
        let cycle = Cycle {
            first_run,
            day_changed: today != last_day,
            hour_start: hour_start(Utc::now()),
        };
        last_day = today;

        let events = {
            let mut state = inner.state.lock().await;
            run_cycle(&inner, &mut state, cycle)
        };
        inner.events.emit_all(events).await;
        first_run = false;

        if !pause(&mut shutdown, period).await {
            return;
        }
    }
}

pub(crate) fn run_cycle(inner: &Inner, state: &mut State, cycle: Cycle) -> Vec<Event> {
    let now = Instant::now();
    let mut events = Vec::new();

    let macs: Vec<Mac> = state.nodes.keys().copied().collect();
    for mac in macs {
        let power_pending = state.pending.has_pending(mac, Request::is_power_usage);
        let Some(node) = state.nodes.get_mut(&mac) else {
            continue;
        };
        if !node.is_managed() {
            continue;
        }

        if node.is_sed() {
            if node.get_available() && node.maintenance_overdue(now) {
                tracing::info!("No wake-up from {} within its maintenance interval", mac);
                events.extend(node.set_available(false));
            }
            continue;
        }

        let _ = node.ping();
        if !node.is_metering() {
            continue;
        }
        if cycle.first_run {
            let _ = node.update_power_usage();
            continue;
        }
        if !node.get_available() {
            continue;
        }

        if !power_pending {
            let _ = node.update_power_usage();
        }
        let info_stale = node
            .record()
            .last_info_message
            .map_or(true, |t| t < cycle.hour_start);
        if info_stale {
            let _ = node.request_info(true);
        }
        if !node.last_log_collected() {
            let _ = node.request_power_buffer();
        }
        if cycle.day_changed {
            let _ = node.sync_clock();
        }
    }

    if !state.discovering {
        let due: Vec<Mac> = state
            .not_discovered
            .iter()
            .filter(|(_, a)| {
                now.duration_since(a.first) < REDISCOVERY_BACKOFF
                    || now.duration_since(a.last) >= REDISCOVERY_BACKOFF
            })
            .map(|(mac, _)| *mac)
            .collect();
        for mac in due {
            discover_locked(inner, state, mac, false, false);
        }
    }
    events
}
