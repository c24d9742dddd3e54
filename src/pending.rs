//! Outbound queue and the table of requests awaiting an answer

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::messages::{Request, Response};
use crate::packets::{Mac, ResponseId, SeqId};

/// How a request finished
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The terminal response or acknowledgement
    Done(Response),
    /// The node did not answer during discovery and was reported off-line
    Offline,
}

/// Completion handle handed to callers; dropping it cancels interest, and a closed
/// channel means the request was dropped after its retries ran out
pub type Reply = oneshot::Receiver<Completion>;

/// Slot of a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey {
    /// Used for the first request, before the stick has told us any sequence id
    Placeholder,
    Seq(SeqId),
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKey::Placeholder => write!(f, "<placeholder>"),
            SlotKey::Seq(seq) => write!(f, "{}", seq),
        }
    }
}

/// A request on its way to the stick
#[derive(Debug)]
pub struct Outbound {
    pub request: Request,
    pub reply: Option<oneshot::Sender<Completion>>,
    /// Transmissions made so far, minus one
    pub retries: u8,
    /// Discovery request: a negative answer reports the node off-line right away
    pub fast_fail: bool,
}

impl Outbound {
    pub fn new(request: Request) -> (Self, Reply) {
        let (tx, rx) = oneshot::channel();
        let outbound = Self {
            request,
            reply: Some(tx),
            retries: 0,
            fast_fail: false,
        };
        (outbound, rx)
    }

    /// Same request, counted as one more attempt
    pub fn retry(mut self) -> Self {
        self.retries += 1;
        self
    }

    /// Fire the completion; a no-op when the caller stopped listening
    pub fn complete(mut self, completion: Completion) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(completion);
        }
    }
}

/// Sending half of the outbound queue
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a request; never blocks
    pub fn enqueue(&self, request: Request) -> Reply {
        let (outbound, reply) = Outbound::new(request);
        self.push(outbound);
        reply
    }

    /// Queue a discovery request that fails fast
    pub fn enqueue_discovery(&self, mac: Mac) -> Reply {
        let (mut outbound, reply) = Outbound::new(Request::NodeInfo { mac });
        outbound.fast_fail = true;
        self.push(outbound);
        reply
    }

    pub fn push(&self, outbound: Outbound) {
        if let Err(e) = self.tx.send(outbound) {
            tracing::debug!("Dropping {}: send queue closed", e.0.request.name());
        }
    }
}

/// A transmitted request waiting for its answer
#[derive(Debug)]
pub struct PendingRequest {
    pub expected: Option<ResponseId>,
    pub outbound: Outbound,
    pub sent_at: Option<Instant>,
}

impl PendingRequest {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            expected: outbound.request.expected_response(),
            outbound,
            sent_at: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.outbound.request
    }

    pub fn retries(&self) -> u8 {
        self.outbound.retries
    }

    /// Whether `response` is the kind this request waits for
    pub fn accepts(&self, response: &Response) -> bool {
        match self.expected {
            None => true,
            Some(expected) => {
                let id = response.payload.id();
                id == expected || matches!(id, ResponseId::Ack | ResponseId::NodeAck)
            }
        }
    }
}

/// Sequence id -> pending request
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<SlotKey, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: SlotKey, request: PendingRequest) {
        if let Some(old) = self.entries.insert(key, request) {
            tracing::warn!(
                "Replaced pending {} at seq_id {}",
                old.request().name(),
                key
            );
        }
    }

    pub fn get(&self, key: &SlotKey) -> Option<&PendingRequest> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &SlotKey) -> Option<PendingRequest> {
        self.entries.remove(key)
    }

    /// Move the placeholder entry to the first real sequence id
    pub fn seed(&mut self, seq: SeqId) -> bool {
        match self.entries.remove(&SlotKey::Placeholder) {
            Some(entry) => {
                self.entries.insert(SlotKey::Seq(seq), entry);
                true
            }
            None => false,
        }
    }

    /// Keys of requests sent more than `timeout` before `now`
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<SlotKey> {
        self.entries
            .iter()
            .filter(|(_, p)| p.sent_at.is_some_and(|t| now.duration_since(t) > timeout))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Whether a request matching `kind` is pending for `mac`
    pub fn has_pending(&self, mac: Mac, kind: fn(&Request) -> bool) -> bool {
        self.entries
            .values()
            .any(|p| p.request().mac() == Some(mac) && kind(p.request()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything; awaiting callers see their reply channel close
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
