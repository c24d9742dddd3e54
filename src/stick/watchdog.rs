//! Supervision of the worker loops and coordinator discovery retries

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::topology::discover_locked;
use super::{feed_loop, pause, sequencer, update, Inner, Stick};
use crate::pending::Completion;

/// Slow coordinator retry interval once the fast attempts are used up
const COORDINATOR_BACKOFF: Duration = Duration::from_secs(60 * 60);

pub(crate) async fn watchdog_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    if !pause(&mut shutdown, inner.config.watchdog_start_delay).await {
        return;
    }
    loop {
        check_transport(&inner);
        supervise(&inner).await;
        retry_coordinator(&inner).await;
        if !pause(&mut shutdown, inner.config.watchdog_period).await {
            return;
        }
    }
}

fn check_transport(inner: &Inner) {
    let transport = &inner.transport;
    if !transport.is_connected() {
        tracing::warn!("Connection to stick lost");
        return;
    }
    if !transport.reader_alive() {
        tracing::warn!("Transport reader stopped");
    }
    if !transport.writer_alive() {
        tracing::warn!("Transport writer stopped");
    }
}

/// Respawn `slot` when its task finished, logging how it ended
async fn revive<F>(slot: &mut Option<JoinHandle<()>>, name: &str, spawn: F)
where
    F: FnOnce() -> JoinHandle<()>,
{
    if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
        return;
    }
    if let Some(handle) = slot.take() {
        match handle.await {
            Ok(()) => tracing::warn!("{} loop stopped, restarting", name),
            Err(e) => tracing::warn!("{} loop died ({}), restarting", name, e),
        }
    }
    *slot = Some(spawn());
}

pub(crate) async fn supervise(inner: &Arc<Inner>) {
    let update_enabled = inner.state.lock().await.update_period.is_some();
    let connected = inner.transport.is_connected();

    let mut workers = inner.workers.lock().await;
    revive(&mut workers.sender, "Sender", || {
        tokio::spawn(sequencer::sender_loop(inner.clone()))
    })
    .await;
    revive(&mut workers.sweeper, "Sweeper", || {
        tokio::spawn(sequencer::sweeper_loop(inner.clone()))
    })
    .await;
    if connected {
        revive(&mut workers.feed, "Feed", || tokio::spawn(feed_loop(inner.clone()))).await;
    }
    if update_enabled {
        revive(&mut workers.update, "Update", || {
            tokio::spawn(update::update_loop(inner.clone()))
        })
        .await;
    }
}

/// Retry coordinator discovery every period at first, then hourly; a successful
/// discovery is followed by a scan
pub(crate) async fn retry_coordinator(inner: &Arc<Inner>) {
    let reply = {
        let mut state = inner.state.lock().await;
        let Some(coordinator) = state.circle_plus_mac else {
            return;
        };
        if state.circle_plus_discovered {
            return;
        }
        let now = Instant::now();
        let due = state.circle_plus_retries < inner.config.coordinator_fast_retries
            || state
                .circle_plus_last_try
                .map_or(true, |t| now.duration_since(t) >= COORDINATOR_BACKOFF);
        if !due {
            return;
        }
        state.circle_plus_retries = state.circle_plus_retries.saturating_add(1);
        state.circle_plus_last_try = Some(now);
        tracing::info!(
            "Retry Circle+ {} discovery (attempt {})",
            coordinator,
            state.circle_plus_retries
        );
        discover_locked(inner, &mut state, coordinator, true, false)
    };

    if let Some(reply) = reply {
        let stick = Stick {
            inner: inner.clone(),
        };
        tokio::spawn(async move {
            if let Ok(Completion::Done(_)) = reply.await {
                if let Err(e) = stick.scan().await {
                    tracing::warn!("Scan after Circle+ discovery failed: {}", e);
                }
            }
        });
    }
}
