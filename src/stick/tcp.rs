use std::sync::Arc;

use crate::config::StickConfig;
use crate::connection::TcpTransport;
use crate::Stick;

impl Stick {
    /// Create a controller connected to a serial-over-TCP bridge at `addr`
    /// (`host:port`)
    pub async fn tcp(addr: &str, config: StickConfig) -> crate::Result<Stick> {
        let transport = Arc::new(TcpTransport::new(addr));
        let stick = Stick::new(transport, config);
        stick.connect().await?;
        tracing::info!("Opened stick at {}", addr);
        Ok(stick)
    }
}
