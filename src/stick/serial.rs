use std::sync::Arc;

use crate::config::StickConfig;
use crate::connection::SerialTransport;
use crate::packets::DEFAULT_BAUD_RATE;
use crate::Stick;

impl Stick {
    /// Create a controller connected via serial port
    pub async fn serial(port: &str, config: StickConfig) -> crate::Result<Stick> {
        let transport = Arc::new(SerialTransport::new(port, DEFAULT_BAUD_RATE));
        let stick = Stick::new(transport, config);
        stick.connect().await?;
        tracing::info!("Opened stick on {}", port);
        Ok(stick)
    }
}
