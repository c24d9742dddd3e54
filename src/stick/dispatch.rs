//! Inbound message classification and routing

use std::sync::Arc;

use super::sequencer::{retry_or_drop, Failure};
use super::topology::discover_locked;
use super::{Inner, State};
use crate::events::{Event, EventType};
use crate::messages::{Payload, Request, Response};
use crate::nodes::Node;
use crate::packets::{AckCode, AckOutcome, AckSize, Mac, NodeType, SeqId};
use crate::pending::{Completion, SlotKey};

/// Sole entry point for decoded messages
pub(crate) async fn handle(inner: &Arc<Inner>, response: Response) {
    tracing::debug!(
        "Received {} with seq_id {} from {}",
        response.name(),
        response.seq_id,
        response
            .mac
            .map(|m| m.to_string())
            .unwrap_or_else(|| "stick".to_string())
    );
    let mut events = Vec::new();
    {
        let mut state = inner.state.lock().await;
        update_cursor(inner, &mut state, response.seq_id);
        route(inner, &mut state, response, &mut events);
    }
    inner.events.emit_all(events).await;
}

fn update_cursor(inner: &Inner, state: &mut State, seq: SeqId) {
    if !seq.is_assignable() {
        return;
    }
    let current = *inner.cursor.borrow();
    match current {
        None => {
            if state.pending.seed(seq) {
                tracing::debug!("First request now tracked as seq_id {}", seq);
            }
            inner.cursor.send_replace(Some(seq));
        }
        Some(cursor) if cursor.advanced_by(seq) => {
            inner.cursor.send_replace(Some(seq));
        }
        Some(_) => {}
    }
}

fn route(inner: &Inner, state: &mut State, response: Response, events: &mut Vec<Event>) {
    let key = SlotKey::Seq(response.seq_id);
    match response.payload {
        Payload::Ack { code, size } => on_ack(inner, state, response, code, size, events),
        Payload::StickInit {
            network_online,
            circle_plus_mac,
            network_id,
        } => {
            let coordinator = circle_plus_mac.with_coordinator_prefix();
            state.mac_stick = response.mac;
            state.network_online = network_online;
            state.circle_plus_mac = Some(coordinator);
            state.network_id = Some(network_id);
            state.stick_initialized = true;
            tracing::info!(
                "Stick initialized: network {} ({:04X}), Circle+ {}",
                if network_online { "online" } else { "offline" },
                network_id,
                coordinator
            );
            resolve(state, key, response);
        }
        Payload::NodeInfo { node_type, .. } => {
            let Some(mac) = response.mac else {
                return;
            };
            let created = !state.nodes.contains_key(&mac);
            if created {
                create_node(inner, state, mac, node_type, events);
            }
            deliver(state, mac, &response, events);
            resolve(state, key, response);
            if created {
                replay(inner, state, mac, events);
            }
        }
        Payload::Awake { awake_type } => {
            let Some(mac) = response.mac else {
                return;
            };
            if state.nodes.contains_key(&mac) {
                deliver(state, mac, &response, events);
            } else {
                tracing::info!("Awake ({}) from unknown node {}, discover it", awake_type, mac);
                discover_locked(inner, state, mac, true, false);
            }
        }
        Payload::JoinAvailable => {
            let Some(mac) = response.mac else {
                return;
            };
            if state.accept_join_requests {
                tracing::info!("Accept join request from {}", mac);
                let _ = inner.outbox.enqueue(Request::NodeAdd { mac, accept: true });
                discover_locked(inner, state, mac, false, false);
            } else {
                tracing::info!("Node {} asks to join the network", mac);
                events.push(Event::node(EventType::JoinRequest, mac));
            }
        }
        Payload::JoinAck => {
            let Some(mac) = response.mac else {
                return;
            };
            if state.nodes.contains_key(&mac) {
                deliver(state, mac, &response, events);
            } else {
                tracing::info!("Node {} joined the network, discover it", mac);
                discover_locked(inner, state, mac, true, false);
            }
        }
        Payload::NodeRemoved { removed, success } => {
            if success {
                if state.nodes.remove(&removed).is_some() {
                    tracing::info!("Node {} removed from the network", removed);
                    events.push(Event::node(EventType::NodeRemoved, removed));
                }
                state.registered.retain(|m| *m != removed);
                state.not_discovered.remove(&removed);
            } else {
                tracing::warn!("Circle+ failed to remove node {}", removed);
            }
            resolve(state, key, response);
        }
        _ => match response.mac {
            Some(mac) if state.nodes.contains_key(&mac) => {
                deliver(state, mac, &response, events);
                resolve(state, key, response);
            }
            Some(mac) => {
                tracing::info!(
                    "Queue {} from unknown node {} until it is discovered",
                    response.name(),
                    mac
                );
                state.undelivered.push(response);
                discover_locked(inner, state, mac, false, false);
            }
            None => resolve(state, key, response),
        },
    }
}

fn on_ack(
    inner: &Inner,
    state: &mut State,
    response: Response,
    code: AckCode,
    size: AckSize,
    events: &mut Vec<Event>,
) {
    let key = SlotKey::Seq(response.seq_id);
    match code.outcome(size) {
        AckOutcome::LinkAccepted => {
            tracing::debug!("Stick accepted seq_id {}", response.seq_id);
        }
        AckOutcome::Complete => {
            if let Some(mac) = response.mac {
                if state.nodes.contains_key(&mac) {
                    deliver(state, mac, &response, events);
                } else {
                    tracing::debug!("{:?} ack from unknown node {}", code, mac);
                }
            }
            resolve(state, key, response);
        }
        AckOutcome::Retry => {
            if state.pending.contains(&key) {
                tracing::info!("{:?} ack for seq_id {}", code, key);
                events.extend(retry_or_drop(inner, state, key, Failure::Nack));
            } else {
                tracing::debug!("{:?} ack for seq_id {} without pending request", code, key);
            }
        }
        AckOutcome::Unmanaged => {
            tracing::warn!("Unmanaged ack code {:?} for seq_id {}", code, key);
        }
    }
}

fn deliver(state: &mut State, mac: Mac, response: &Response, events: &mut Vec<Event>) {
    if let Some(node) = state.nodes.get_mut(&mac) {
        events.extend(node.on_message(response));
    }
}

fn create_node(
    inner: &Inner,
    state: &mut State,
    mac: Mac,
    node_type: NodeType,
    events: &mut Vec<Event>,
) {
    let address = state.to_discover.remove(&mac);
    state.not_discovered.remove(&mac);
    if state.circle_plus_mac == Some(mac) {
        state.circle_plus_discovered = true;
    }

    let node = Node::new(mac, address, node_type, inner.outbox.clone());
    if node.is_managed() {
        tracing::info!("New {:?} node {}", node_type, mac);
        events.push(Event::node(EventType::NewNode, mac));
    } else {
        tracing::warn!("Unsupported node type {:?} for {}", node_type, mac);
    }
    state.nodes.insert(mac, node);
}

/// Route buffered messages for a freshly created node, oldest first
fn replay(inner: &Inner, state: &mut State, mac: Mac, events: &mut Vec<Event>) {
    let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.undelivered)
        .into_iter()
        .partition(|r| r.mac == Some(mac));
    state.undelivered = waiting;
    if !ready.is_empty() {
        tracing::debug!("Replay {} queued messages for {}", ready.len(), mac);
    }
    for response in ready {
        route(inner, state, response, events);
    }
}

/// Complete the pending request at `key` when `response` answers it
fn resolve(state: &mut State, key: SlotKey, response: Response) {
    let accepted = state.pending.get(&key).map(|p| p.accepts(&response));
    match accepted {
        Some(true) => {
            if let Some(entry) = state.pending.remove(&key) {
                tracing::debug!("{} completes {}", response.name(), entry.request().name());
                entry.outbound.complete(Completion::Done(response));
            }
        }
        Some(false) => {
            tracing::debug!("{} does not answer pending seq_id {}", response.name(), key);
        }
        None => {
            tracing::debug!("No pending request for {} with seq_id {}", response.name(), key);
        }
    }
}
