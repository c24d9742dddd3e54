//! Sender and timeout sweeper loops
//!
//! Exactly one request is in flight: the sender writes it, then waits for the stick
//! to confirm the sequence id it was given before taking the next one off the queue.

use std::sync::Arc;
use tokio::time::Instant;

use super::{pause, Inner, State};
use crate::events::Event;
use crate::pending::{Completion, Outbound, PendingRequest, SlotKey};

/// Why a pending request is being resent or dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    /// Error, timeout or negative acknowledgement
    Nack,
    /// The stick never confirmed the sequence id
    LinkAckTimeout,
    /// No response within the message timeout
    ResponseTimeout,
}

pub(crate) async fn sender_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut queue = inner.outbox_rx.lock().await;
    loop {
        let outbound = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return,
            next = queue.recv() => match next {
                Some(outbound) => outbound,
                None => return,
            },
        };
        transmit(&inner, outbound).await;
    }
}

async fn transmit(inner: &Arc<Inner>, outbound: Outbound) {
    let key = match *inner.cursor.borrow() {
        Some(cursor) => SlotKey::Seq(cursor.next()),
        None => SlotKey::Placeholder,
    };
    let frame = outbound.request.frame();
    let name = outbound.request.name();
    let retries = outbound.retries;

    {
        let mut state = inner.state.lock().await;
        let now = Instant::now();
        if let Some(node) = outbound
            .request
            .mac()
            .and_then(|mac| state.nodes.get_mut(&mac))
        {
            node.record_mut().last_request = Some(now);
        }
        let mut pending = PendingRequest::new(outbound);
        pending.sent_at = Some(now);
        state.pending.insert(key, pending);
    }

    tracing::info!("Send {} with seq_id {} (retry {})", name, key, retries);
    if let Err(e) = inner.transport.send(&frame).await {
        // left pending; the sweeper resends or drops it
        tracing::warn!("Failed to write {}: {}", name, e);
    }
    tokio::time::sleep(inner.config.send_pacing).await;

    let mut cursor = inner.cursor.subscribe();
    let accepted = tokio::time::timeout(
        inner.config.link_ack_timeout,
        cursor.wait_for(|c| match (key, c) {
            (SlotKey::Placeholder, c) => c.is_some(),
            (SlotKey::Seq(seq), Some(c)) => c.has_reached(seq),
            (SlotKey::Seq(_), None) => false,
        }),
    )
    .await
    .is_ok();

    if !accepted {
        let mut state = inner.state.lock().await;
        if state.pending.contains(&key) {
            tracing::info!(
                "Resend {} with seq_id {}: stick did not acknowledge",
                name,
                key
            );
            let events = retry_or_drop(inner, &mut state, key, Failure::LinkAckTimeout);
            drop(state);
            inner.events.emit_all(events).await;
        }
    }
}

/// Resend the request at `key` if its retry budget allows, otherwise drop it
///
/// A dropped request never completes; its caller sees the reply channel close.
pub(crate) fn retry_or_drop(
    inner: &Inner,
    state: &mut State,
    key: SlotKey,
    failure: Failure,
) -> Vec<Event> {
    let mut events = Vec::new();
    let Some(entry) = state.pending.remove(&key) else {
        return events;
    };
    let outbound = entry.outbound;
    let request = outbound.request.clone();
    let mac = request.mac();

    if failure == Failure::Nack && outbound.fast_fail && state.discovering {
        tracing::info!(
            "Node {} did not answer during discovery",
            mac.map(|m| m.to_string()).unwrap_or_default()
        );
        outbound.complete(Completion::Offline);
        return events;
    }

    let informational = request.is_node_info() || request.is_ping();
    if outbound.retries < inner.config.max_retries {
        if failure == Failure::Nack && !informational {
            let reachable = mac
                .and_then(|m| state.nodes.get(&m))
                .is_some_and(|n| n.get_available());
            if !reachable {
                tracing::info!("Drop {} with seq_id {}: node unreachable", request.name(), key);
                return events;
            }
        }
        tracing::debug!(
            "Requeue {} ({:?}), retry {} of {}",
            request.name(),
            failure,
            outbound.retries + 1,
            inner.config.max_retries
        );
        inner.outbox.push(outbound.retry());
        return events;
    }

    tracing::info!(
        "Drop {} with seq_id {} after {} retries",
        request.name(),
        key,
        outbound.retries
    );
    drop(outbound);

    if let Some(node) = mac.and_then(|m| state.nodes.get_mut(&m)) {
        if node.is_sed() {
            return events;
        }
        if informational {
            events.extend(node.set_available(false));
        } else {
            let _ = node.ping();
        }
    }
    events
}

pub(crate) async fn sweeper_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let timeout = inner.config.message_timeout;
    while pause(&mut shutdown, inner.config.sweep_interval).await {
        let mut state = inner.state.lock().await;
        let mut events = Vec::new();
        for key in state.pending.expired(Instant::now(), timeout) {
            tracing::info!("No response for seq_id {} within {:?}", key, timeout);
            events.extend(retry_or_drop(&inner, &mut state, key, Failure::ResponseTimeout));
        }
        drop(state);
        inner.events.emit_all(events).await;
    }
}
