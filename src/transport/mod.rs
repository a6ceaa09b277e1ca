mod frame;
mod udp;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub use frame::{decode_csi, mean_magnitude};
pub use udp::UdpTransport;

#[cfg(test)]
pub(crate) use frame::encode_csi;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot resolve transport address {0}")]
    Resolve(String),
}

/// Channel to the signal-processing collaborator.
///
/// `send` is fire-and-forget. `receive` gives up after `timeout` and returns
/// `None`; a missing frame is an ordinary outcome, not a failure.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, payload: &[u8]);
    async fn receive(&mut self, timeout: Duration) -> Option<Vec<u8>>;
}

/// UDP endpoints of the collaborator: payloads go out to `address:tx_port`,
/// CSI frames come back on `address:rx_port`, one datagram per message.
///
/// This is plain UDP. A collaborator built around ZeroMQ PUSH/PULL sockets
/// needs a UDP source and sink in its flowgraph to talk to this side.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_tx_port")]
    pub tx_port: u16,
    #[serde(default = "default_rx_port")]
    pub rx_port: u16,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_tx_port() -> u16 {
    64001
}

fn default_rx_port() -> u16 {
    64000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            tx_port: default_tx_port(),
            rx_port: default_rx_port(),
        }
    }
}
