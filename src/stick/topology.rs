//! Coordinator discovery, mesh scan, join and unjoin

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::time::Instant;

use super::{DiscoveryAttempts, Inner, State, Stick};
use crate::error::Error;
use crate::events::{Event, ScanSummary};
use crate::messages::{Payload, Request, Response};
use crate::packets::{Mac, CIRCLE_PLUS_SLOTS};
use crate::pending::{Completion, Reply};
use crate::Result;

/// Send a node-info request to an unidentified MAC
///
/// Without `force`, a request is skipped while an earlier one for the same MAC is
/// younger than the message timeout. `fast_fail` requests complete with
/// [`Completion::Offline`] on a negative answer during a scan.
pub(crate) fn discover_locked(
    inner: &Inner,
    state: &mut State,
    mac: Mac,
    force: bool,
    fast_fail: bool,
) -> Option<Reply> {
    if state.nodes.contains_key(&mac) {
        return None;
    }
    let now = Instant::now();
    match state.not_discovered.get_mut(&mac) {
        Some(attempts) => {
            if !force && now.duration_since(attempts.last) < inner.config.message_timeout {
                tracing::debug!("Discovery of {} already in progress", mac);
                return None;
            }
            attempts.last = now;
        }
        None => {
            state.not_discovered.insert(
                mac,
                DiscoveryAttempts {
                    first: now,
                    last: now,
                },
            );
        }
    }

    tracing::info!("Discover node {}", mac);
    Some(if fast_fail {
        inner.outbox.enqueue_discovery(mac)
    } else {
        inner.outbox.enqueue(Request::NodeInfo { mac })
    })
}

impl Stick {
    /// Discover the Circle+ coordinator reported by the stick
    pub async fn initialize_circle_plus(&self) -> Result<()> {
        let inner = &self.inner;
        let (coordinator, reply) = {
            let mut state = inner.state.lock().await;
            let coordinator = state.circle_plus_mac.ok_or(Error::StickInit)?;
            match discover_locked(inner, &mut state, coordinator, true, false) {
                Some(reply) => (coordinator, reply),
                None => return Ok(()),
            }
        };

        match tokio::time::timeout(inner.config.discovery_timeout(1), reply).await {
            Ok(Ok(Completion::Done(_))) => {
                tracing::info!("Circle+ {} discovered", coordinator);
                Ok(())
            }
            _ => {
                tracing::error!("Circle+ {} did not answer", coordinator);
                Err(Error::CirclePlus(coordinator.to_string()))
            }
        }
    }

    /// Read the coordinator link table and identify every linked node
    ///
    /// Resolves once every node answered or was reported off-line, or when the
    /// discovery timer fires; unresolved MACs are retried by the update scheduler.
    pub async fn scan(&self) -> Result<ScanSummary> {
        let inner = &self.inner;
        let coordinator = {
            let mut state = inner.state.lock().await;
            let coordinator = state.circle_plus_mac.ok_or(Error::StickInit)?;
            if !state.nodes.contains_key(&coordinator) {
                discover_locked(inner, &mut state, coordinator, false, false);
                return Err(Error::CirclePlus(format!(
                    "{} not discovered yet",
                    coordinator
                )));
            }
            coordinator
        };

        tracing::info!("Scan Circle+ {} for linked nodes", coordinator);
        let replies = (0..CIRCLE_PLUS_SLOTS).map(|address| {
            inner.outbox.enqueue(Request::CirclePlusScan {
                mac: coordinator,
                address,
            })
        });
        let timeout = inner.config.discovery_timeout(CIRCLE_PLUS_SLOTS as usize);
        let results = tokio::time::timeout(timeout, futures::future::join_all(replies))
            .await
            .map_err(|_| Error::timeout("Circle+ link table"))?;

        let mut linked = HashMap::new();
        for result in results {
            if let Ok(Completion::Done(Response {
                payload: Payload::CirclePlusScan {
                    linked_mac,
                    address,
                },
                ..
            })) = result
            {
                if !linked_mac.is_empty_slot() {
                    linked.insert(linked_mac, address);
                }
            }
        }
        tracing::info!("Circle+ has {} linked nodes", linked.len());

        let mut discoveries = FuturesUnordered::new();
        {
            let mut state = inner.state.lock().await;
            let mut registered: Vec<Mac> = linked.keys().copied().collect();
            registered.sort();
            state.registered = registered;
            state.discovering = true;
            for (mac, address) in &linked {
                if let Some(node) = state.nodes.get_mut(mac) {
                    node.record_mut().address = Some(*address);
                    continue;
                }
                state.to_discover.insert(*mac, *address);
                if let Some(reply) = discover_locked(inner, &mut state, *mac, true, true) {
                    discoveries.push(reply);
                }
            }
        }

        let deadline = tokio::time::sleep(inner.config.discovery_timeout(discoveries.len()));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::info!("Discovery timer fired");
                    break;
                }
                next = discoveries.next() => {
                    if next.is_none() {
                        break;
                    }
                }
            }
        }

        let summary = {
            let mut state = inner.state.lock().await;
            let mut not_discovered: Vec<Mac> = state.to_discover.drain().map(|(m, _)| m).collect();
            not_discovered.sort();
            for mac in &not_discovered {
                tracing::info!("Node {} not discovered, retry later", mac);
            }
            state.discovering = false;
            ScanSummary {
                registered: state.registered.len(),
                discovered: state
                    .registered
                    .iter()
                    .filter(|m| state.nodes.contains_key(*m))
                    .count(),
                not_discovered,
            }
        };
        tracing::info!(
            "Scan finished: {} of {} nodes discovered",
            summary.discovered,
            summary.registered
        );
        inner.events.emit(Event::scan_finished(summary.clone())).await;
        Ok(summary)
    }

    /// Ask for a node-info message from `mac`
    ///
    /// Returns `None` when the node is already known or, without `force`, a recent
    /// discovery request for it is still outstanding.
    pub async fn discover_node(&self, mac: &str, force: bool) -> Result<Option<Reply>> {
        let mac = Mac::parse(mac)?;
        let mut state = self.inner.state.lock().await;
        Ok(discover_locked(&self.inner, &mut state, mac, force, false))
    }

    /// Add a node to the coordinator memory
    pub async fn node_join(&self, mac: &str) -> Result<()> {
        let mac = Mac::parse(mac)?;
        tracing::info!("Join node {}", mac);
        let _ = self.send(Request::NodeAdd { mac, accept: true });
        Ok(())
    }

    /// Remove a node from the network through the coordinator
    pub async fn node_unjoin(&self, mac: &str) -> Result<()> {
        let mac = Mac::parse(mac)?;
        let coordinator = self
            .circle_plus_mac()
            .await
            .ok_or_else(|| Error::CirclePlus("unknown, initialize the stick first".into()))?;
        tracing::info!("Unjoin node {}", mac);
        let _ = self.send(Request::NodeRemove { coordinator, mac });
        Ok(())
    }

    /// Open or close the network for new nodes
    ///
    /// With `auto_accept`, join requests are answered without raising an event.
    /// Closing the network always turns auto-accept off.
    pub async fn allow_join_requests(&self, enable: bool, auto_accept: bool) {
        self.inner.state.lock().await.accept_join_requests = enable && auto_accept;
        tracing::info!(
            "Join requests {}",
            if enable { "allowed" } else { "refused" }
        );
        let _ = self.send(Request::AllowJoining { enable });
    }
}
