//! Transports carrying the raw byte stream to and from the stick
//!
//! This module provides async transport implementations for a USB serial port and
//! for a TCP socket (e.g. a serial-to-network bridge).

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::Result;

/// Where a transport delivers received bytes; closed by the transport when the
/// stream ends
pub type ByteSink = mpsc::UnboundedSender<Vec<u8>>;

/// Transport trait for the different link types
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link and start delivering received bytes to `sink`
    async fn connect(&self, sink: ByteSink) -> Result<()>;

    /// Close the link
    async fn disconnect(&self) -> Result<()>;

    /// Queue raw bytes for transmission
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Whether the task reading from the link still runs
    fn reader_alive(&self) -> bool;

    /// Whether the task writing to the link still runs
    fn writer_alive(&self) -> bool;
}

struct IoTasks {
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Reader/writer task pair over any async byte stream
#[derive(Default)]
pub struct StreamLink {
    connected: Arc<AtomicBool>,
    tasks: Mutex<Option<IoTasks>>,
}

impl StreamLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, Option<IoTasks>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Split `stream` and spawn its reader and writer tasks
    pub fn start<S>(&self, stream: S, sink: ByteSink)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut rd, mut wr) = tokio::io::split(stream);
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.connected.store(true, Ordering::SeqCst);

        let connected = self.connected.clone();
        let reader = tokio::spawn(async move {
            let mut read_buf = [0u8; 1024];
            loop {
                match rd.read(&mut read_buf).await {
                    Ok(0) => {
                        tracing::info!("Stick closed the connection");
                        break;
                    }
                    Ok(n) => {
                        if sink.send(read_buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Read error: {}", e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        let connected = self.connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(data) = writer_rx.recv().await {
                let result = match wr.write_all(&data).await {
                    Ok(()) => wr.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::warn!("Write error: {}", e);
                    connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        *self.tasks() = Some(IoTasks {
            writer_tx,
            reader,
            writer,
        });
    }

    /// Stop both tasks
    pub fn stop(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(tasks) = self.tasks().take() {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }

    pub fn send(&self, data: &[u8]) -> Result<()> {
        let tasks = self.tasks();
        let tasks = tasks.as_ref().ok_or(Error::NotConnected)?;
        tasks
            .writer_tx
            .send(data.to_vec())
            .map_err(|_| Error::connection("Writer task stopped"))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn reader_alive(&self) -> bool {
        self.tasks()
            .as_ref()
            .is_some_and(|t| !t.reader.is_finished())
    }

    pub fn writer_alive(&self) -> bool {
        self.tasks()
            .as_ref()
            .is_some_and(|t| !t.writer.is_finished())
    }
}

/// USB serial transport
#[cfg(feature = "serial")]
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    link: StreamLink,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    /// Create a new serial transport
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            link: StreamLink::new(),
        }
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&self, sink: ByteSink) -> Result<()> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(&self.port_name, self.baud_rate)
            .open_native_async()
            .map_err(|e| Error::connection(format!("Failed to open serial port: {}", e)))?;
        tracing::debug!("Opened serial port {}", self.port_name);
        self.link.start(port, sink);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.stop();
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        self.link.send(data)
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn reader_alive(&self) -> bool {
        self.link.reader_alive()
    }

    fn writer_alive(&self) -> bool {
        self.link.writer_alive()
    }
}

/// TCP transport
#[cfg(feature = "tcp")]
pub struct TcpTransport {
    addr: String,
    link: StreamLink,
}

#[cfg(feature = "tcp")]
impl TcpTransport {
    /// Create a new TCP transport for `host:port`
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            link: StreamLink::new(),
        }
    }
}

#[cfg(feature = "tcp")]
#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, sink: ByteSink) -> Result<()> {
        let stream = tokio::net::TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", self.addr, e)))?;
        tracing::debug!("Connected to {}", self.addr);
        self.link.start(stream, sink);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.stop();
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        self.link.send(data)
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn reader_alive(&self) -> bool {
        self.link.reader_alive()
    }

    fn writer_alive(&self) -> bool {
        self.link.writer_alive()
    }
}
