//! Main stick controller implementation

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::StickConfig;
use crate::connection::Transport;
use crate::error::Error;
use crate::events::*;
use crate::messages::{Request, Response};
use crate::nodes::Node;
use crate::packets::{Mac, SeqId};
use crate::pending::{Completion, Outbound, Outbox, PendingTable, Reply};
use crate::reader::MessageReader;
use crate::Result;

mod dispatch;
mod sequencer;
mod topology;
mod update;
mod watchdog;

#[cfg(feature = "serial")]
pub mod serial;
#[cfg(feature = "tcp")]
pub mod tcp;

/// Delay between update cycles per known node when no period is given
const UPDATE_PERIOD_PER_NODE: Duration = Duration::from_secs(3);

/// First and most recent discovery request for a MAC that has not answered yet
#[derive(Debug, Clone, Copy)]
pub(crate) struct DiscoveryAttempts {
    pub(crate) first: Instant,
    pub(crate) last: Instant,
}

/// Everything guarded by the controller lock
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) pending: PendingTable,
    pub(crate) nodes: HashMap<Mac, Node>,
    /// Linked MACs from the last scan, not yet identified, with their slot
    pub(crate) to_discover: HashMap<Mac, u8>,
    pub(crate) not_discovered: HashMap<Mac, DiscoveryAttempts>,
    /// Messages from MACs without a node record, in arrival order
    pub(crate) undelivered: Vec<Response>,
    /// MACs linked to the coordinator, excluding the coordinator itself
    pub(crate) registered: Vec<Mac>,
    pub(crate) discovering: bool,
    pub(crate) mac_stick: Option<Mac>,
    pub(crate) network_online: bool,
    pub(crate) circle_plus_mac: Option<Mac>,
    pub(crate) network_id: Option<u16>,
    pub(crate) stick_initialized: bool,
    pub(crate) circle_plus_discovered: bool,
    pub(crate) circle_plus_retries: u32,
    pub(crate) circle_plus_last_try: Option<Instant>,
    pub(crate) accept_join_requests: bool,
    /// `None` while the update scheduler is disabled
    pub(crate) update_period: Option<Duration>,
}

/// Handles of the worker loops
#[derive(Debug, Default)]
pub(crate) struct Workers {
    pub(crate) sender: Option<JoinHandle<()>>,
    pub(crate) sweeper: Option<JoinHandle<()>>,
    pub(crate) feed: Option<JoinHandle<()>>,
    pub(crate) update: Option<JoinHandle<()>>,
    pub(crate) watchdog: Option<JoinHandle<()>>,
}

impl Workers {
    fn abort_all(&mut self) {
        for handle in [
            self.sender.take(),
            self.sweeper.take(),
            self.feed.take(),
            self.update.take(),
            self.watchdog.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

pub(crate) struct Inner {
    pub(crate) config: StickConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) state: Mutex<State>,
    pub(crate) events: Arc<EventDispatcher>,
    pub(crate) outbox: Outbox,
    /// Held by the running sender loop
    pub(crate) outbox_rx: Mutex<mpsc::UnboundedReceiver<Outbound>>,
    /// Bytes from the transport; held by the running feed loop
    pub(crate) inbound: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    pub(crate) reader: Mutex<MessageReader>,
    /// Last sequence id confirmed by the stick
    pub(crate) cursor: watch::Sender<Option<SeqId>>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) workers: Mutex<Workers>,
}

/// Sleep for `period`; returns false when shutdown was requested meanwhile
pub(crate) async fn pause(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        _ = shutdown.wait_for(|stop| *stop) => false,
        _ = tokio::time::sleep(period) => true,
    }
}

/// Controller for a Plugwise USB stick and the nodes of its network
///
/// Cloning is cheap; all clones drive the same stick.
#[derive(Clone)]
pub struct Stick {
    pub(crate) inner: Arc<Inner>,
}

impl Stick {
    /// Create a controller over `transport`; nothing is opened until [`Stick::connect`]
    pub fn new(transport: Arc<dyn Transport>, config: StickConfig) -> Self {
        let (outbox, outbox_rx) = Outbox::new();
        let (cursor, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        let state = State {
            accept_join_requests: config.accept_join_requests,
            ..Default::default()
        };

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state: Mutex::new(state),
                events: Arc::new(EventDispatcher::new()),
                outbox,
                outbox_rx: Mutex::new(outbox_rx),
                inbound: Mutex::new(None),
                reader: Mutex::new(MessageReader::new()),
                cursor,
                shutdown,
                workers: Mutex::new(Workers::default()),
            }),
        }
    }

    /// Create and connect a controller, using TCP when `port` looks like
    /// `host:port` and a serial port otherwise
    #[cfg(all(feature = "serial", feature = "tcp"))]
    pub async fn open(port: &str, config: StickConfig) -> Result<Stick> {
        if port.contains(':') {
            Stick::tcp(port, config).await
        } else {
            Stick::serial(port, config).await
        }
    }

    /// Open the transport and start the sender, sweeper and feed loops
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let (sink, inbound) = mpsc::unbounded_channel();
        inner.transport.connect(sink).await?;

        inner.shutdown.send_replace(false);
        let mut workers = inner.workers.lock().await;
        workers.abort_all();
        *inner.inbound.lock().await = Some(inbound);
        workers.sender = Some(tokio::spawn(sequencer::sender_loop(inner.clone())));
        workers.sweeper = Some(tokio::spawn(sequencer::sweeper_loop(inner.clone())));
        workers.feed = Some(tokio::spawn(feed_loop(inner.clone())));
        tracing::info!("Connected to stick");
        Ok(())
    }

    /// Ask the stick for its network state, then start supervision and look for
    /// the Circle+ coordinator
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let reply = inner.outbox.enqueue(Request::StickInit);
        match tokio::time::timeout(inner.config.message_timeout, reply).await {
            Ok(Ok(Completion::Done(_))) => {}
            _ => {
                tracing::error!("Stick did not answer the initialization request");
                return Err(Error::StickInit);
            }
        }

        {
            let mut state = inner.state.lock().await;
            if !state.network_online {
                tracing::error!("Stick reports the Zigbee network as offline");
                return Err(Error::NetworkDown);
            }
            if let Some(coordinator) = state.circle_plus_mac {
                topology::discover_locked(inner, &mut state, coordinator, false, false);
            }
        }

        let mut workers = inner.workers.lock().await;
        if workers.watchdog.as_ref().map_or(true, |w| w.is_finished()) {
            workers.watchdog = Some(tokio::spawn(watchdog::watchdog_loop(inner.clone())));
        }
        Ok(())
    }

    /// Connect, initialize, find the coordinator and scan the network
    pub async fn auto_initialize(&self) -> Result<ScanSummary> {
        if let Err(e) = self.connect().await {
            tracing::error!("Failed to connect: {}", e);
            return Err(e);
        }
        if let Err(e) = self.initialize().await {
            tracing::error!("Failed to initialize stick: {}", e);
            return Err(e);
        }
        if let Err(e) = self.initialize_circle_plus().await {
            tracing::error!("Failed to discover Circle+: {}", e);
            return Err(e);
        }
        self.scan().await.inspect_err(|e| tracing::error!("Network scan failed: {}", e))
    }

    /// Stop all loops, forget pending requests and close the transport
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.shutdown.send_replace(true);
        inner.workers.lock().await.abort_all();
        inner.state.lock().await.pending.clear();
        inner.cursor.send_replace(None);
        let result = inner.transport.disconnect().await;

        inner.events.emit(Event::disconnected()).await;
        result
    }

    /// Queue a request; the returned [`Reply`] resolves with its answer
    pub fn send(&self, request: Request) -> Reply {
        self.inner.outbox.enqueue(request)
    }

    /// Switch the relay of a metering node
    pub async fn switch_relay(&self, mac: Mac, on: bool) -> Result<Reply> {
        let state = self.inner.state.lock().await;
        let node = state
            .nodes
            .get(&mac)
            .ok_or_else(|| Error::protocol(format!("Unknown node {}", mac)))?;
        node.switch_relay(on)
            .ok_or_else(|| Error::protocol(format!("Node {} has no relay", mac)))
    }

    /// Enable or disable the update scheduler
    ///
    /// `Some(Duration::ZERO)` disables it; `None` picks three seconds per known node.
    pub async fn auto_update(&self, period: Option<Duration>) {
        let inner = &self.inner;
        let period = {
            let mut state = inner.state.lock().await;
            state.update_period = match period {
                Some(p) if p.is_zero() => None,
                Some(p) => Some(p),
                None => Some(UPDATE_PERIOD_PER_NODE * (state.nodes.len().max(1) as u32)),
            };
            state.update_period
        };

        let mut workers = inner.workers.lock().await;
        match period {
            None => {
                if let Some(handle) = workers.update.take() {
                    handle.abort();
                }
                tracing::info!("Auto update disabled");
            }
            Some(p) => {
                tracing::info!("Auto update every {:?}", p);
                if workers.update.as_ref().map_or(true, |w| w.is_finished()) {
                    workers.update = Some(tokio::spawn(update::update_loop(inner.clone())));
                }
            }
        }
    }

    /// Snapshot of all managed nodes, ordered by MAC
    pub async fn nodes(&self) -> Vec<Node> {
        let state = self.inner.state.lock().await;
        let mut nodes: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| n.is_managed())
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.mac());
        nodes
    }

    /// Snapshot of one node
    pub async fn node(&self, mac: Mac) -> Option<Node> {
        self.inner.state.lock().await.nodes.get(&mac).cloned()
    }

    /// Nodes registered in the coordinator memory, including the coordinator
    pub async fn registered_nodes(&self) -> usize {
        self.inner.state.lock().await.registered.len() + 1
    }

    pub async fn mac_stick(&self) -> Option<Mac> {
        self.inner.state.lock().await.mac_stick
    }

    pub async fn circle_plus_mac(&self) -> Option<Mac> {
        self.inner.state.lock().await.circle_plus_mac
    }

    pub async fn network_id(&self) -> Option<u16> {
        self.inner.state.lock().await.network_id
    }

    pub async fn network_online(&self) -> bool {
        self.inner.state.lock().await.network_online
    }

    /// Requests transmitted and still waiting for an answer
    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Feed raw bytes as if they came from the transport
    pub async fn feed(&self, data: &[u8]) {
        feed_bytes(&self.inner, data).await;
    }

    /// Dispatch an already decoded message
    pub async fn process_message(&self, response: Response) {
        dispatch::handle(&self.inner, response).await;
    }

    /// Register a callback for events of `event_type` matching `filters`
    pub async fn subscribe<F>(
        &self,
        event_type: EventType,
        filters: HashMap<String, String>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.inner
            .events
            .subscribe(event_type, filters, callback)
            .await
    }

    /// First matching event within `timeout`
    pub async fn wait_for_event(
        &self,
        event_type: EventType,
        filters: HashMap<String, String>,
        timeout: Duration,
    ) -> Option<Event> {
        self.inner
            .events
            .wait_for_event(event_type, filters, timeout)
            .await
    }

    /// Dispatcher shared by all clones of this handle
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.inner.events
    }

    /// Every event emitted from now on, as a stream
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::StreamExt;
    ///
    /// let mut stream = stick.event_stream();
    /// while let Some(event) = stream.next().await {
    ///     println!("{:?} {:?}", event.event_type, event.mac());
    /// }
    /// ```
    pub fn event_stream(&self) -> impl futures::Stream<Item = Event> + Unpin {
        BroadcastStream::new(self.inner.events.receiver())
            .filter_map(|result| std::future::ready(result.ok()))
    }

    /// Stream of the events of one type
    pub fn event_stream_filtered(
        &self,
        event_type: EventType,
    ) -> impl futures::Stream<Item = Event> + Unpin {
        BroadcastStream::new(self.inner.events.receiver()).filter_map(move |result| {
            std::future::ready(result.ok().filter(|event| event.event_type == event_type))
        })
    }
}

async fn feed_bytes(inner: &Arc<Inner>, data: &[u8]) {
    let responses = inner.reader.lock().await.feed(data);
    for response in responses {
        dispatch::handle(inner, response).await;
    }
}

/// Pass received bytes through the reader into the dispatcher until the link closes
pub(crate) async fn feed_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut inbound = inner.inbound.lock().await;
    loop {
        let Some(rx) = inbound.as_mut() else {
            return;
        };
        let data = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return,
            data = rx.recv() => data,
        };
        match data {
            Some(data) => feed_bytes(&inner, &data).await,
            None => {
                *inbound = None;
                tracing::warn!("Connection to stick lost");
                inner.events.emit(Event::disconnected()).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_util::NullTransport;
    use crate::messages::Payload;
    use crate::packets::{AckCode, AckSize, NodeType};

    fn stick() -> Stick {
        Stick::new(NullTransport::offline(), StickConfig::default())
    }

    fn mac(s: &str) -> Mac {
        Mac::parse(s).unwrap()
    }

    fn info(seq: u16, m: Mac, node_type: NodeType) -> Response {
        Response::new(
            SeqId(seq),
            Some(m),
            Payload::NodeInfo {
                node_type,
                relay_state: false,
                last_log_address: 0x00044000,
                frequency: 0x85,
                hardware: "000000470000".to_string(),
                firmware: 0,
            },
        )
    }

    #[tokio::test]
    async fn test_first_message_seeds_cursor() {
        let stick = stick();
        assert_eq!(*stick.inner.cursor.borrow(), None);
        stick
            .process_message(Response::new(
                SeqId(0xFFFD),
                Some(mac("000D6F0000B1B64B")),
                Payload::JoinAck,
            ))
            .await;
        assert_eq!(*stick.inner.cursor.borrow(), None);

        let ack = Response::new(
            SeqId(0x0010),
            None,
            Payload::Ack {
                code: AckCode::Success,
                size: AckSize::Small,
            },
        );
        stick.process_message(ack.clone()).await;
        assert_eq!(*stick.inner.cursor.borrow(), Some(SeqId(0x0010)));

        // stale ids never move the cursor back
        stick
            .process_message(Response { seq_id: SeqId(0x000F), ..ack })
            .await;
        assert_eq!(*stick.inner.cursor.borrow(), Some(SeqId(0x0010)));
    }

    #[tokio::test]
    async fn test_unmanaged_nodes_are_hidden() {
        let stick = stick();
        stick
            .process_message(info(1, mac("000D6F0000000001"), NodeType::Circle))
            .await;
        stick
            .process_message(info(2, mac("000D6F0000000002"), NodeType::Switch))
            .await;
        let nodes = stick.nodes().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].mac(), mac("000D6F0000000001"));
        assert!(stick.node(mac("000D6F0000000002")).await.is_some());
    }

    #[tokio::test]
    async fn test_auto_update_period() {
        let stick = stick();
        stick.auto_update(None).await;
        assert_eq!(
            stick.inner.state.lock().await.update_period,
            Some(Duration::from_secs(3))
        );
        stick.auto_update(Some(Duration::ZERO)).await;
        assert_eq!(stick.inner.state.lock().await.update_period, None);
        assert!(stick.inner.workers.lock().await.update.is_none());
    }

    #[tokio::test]
    async fn test_initialize_requires_connection() {
        let stick = stick();
        assert!(matches!(stick.initialize().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_switch_relay_unknown_node() {
        let stick = stick();
        assert!(stick
            .switch_relay(mac("000D6F0000B1B64B"), true)
            .await
            .is_err());
    }
}
