use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::net::{lookup_host, UdpSocket};

use super::{Transport, TransportConfig, TransportError};

const MAX_DATAGRAM: usize = 65_536;

/// Push/pull datagram pair towards the signal-processing program: frames go
/// out to `address:tx_port` and come back on `address:rx_port`.
pub struct UdpTransport {
    tx: UdpSocket,
    rx: UdpSocket,
    target: SocketAddr,
    buf: Vec<u8>,
}

impl UdpTransport {
    pub async fn bind(config: &TransportConfig) -> Result<Self, TransportError> {
        let target = lookup_host((config.address.as_str(), config.tx_port))
            .await?
            .next()
            .ok_or_else(|| TransportError::Resolve(config.address.clone()))?;
        let rx = UdpSocket::bind((config.address.as_str(), config.rx_port)).await?;
        let tx = if target.is_ipv4() {
            UdpSocket::bind("0.0.0.0:0").await?
        } else {
            UdpSocket::bind("[::]:0").await?
        };
        debug!(
            "Transport ready: tx -> {}, rx <- {}",
            target,
            rx.local_addr()?
        );
        Ok(Self {
            tx,
            rx,
            target,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn rx_addr(&self) -> std::io::Result<SocketAddr> {
        self.rx.local_addr()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, payload: &[u8]) {
        if let Err(e) = self.tx.send_to(payload, self.target).await {
            warn!("Failed to send {} byte frame to {}: {}", payload.len(), self.target, e);
        }
    }

    async fn receive(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        match tokio::time::timeout(timeout, self.rx.recv_from(&mut self.buf)).await {
            Ok(Ok((len, _from))) => Some(self.buf[..len].to_vec()),
            Ok(Err(e)) => {
                warn!("Receive failed: {}", e);
                None
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn loopback() -> UdpTransport {
        UdpTransport::bind(&TransportConfig {
            address: "127.0.0.1".to_string(),
            tx_port: 9,
            rx_port: 0,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn receive_without_data_waits_for_the_timeout() {
        let mut transport = loopback().await;
        for timeout_ms in [7u64, 50] {
            let timeout = Duration::from_millis(timeout_ms);
            let started = Instant::now();
            assert_eq!(transport.receive(timeout).await, None);
            let elapsed = started.elapsed();
            assert!(elapsed >= timeout, "returned after {:?}", elapsed);
            assert!(elapsed < timeout + Duration::from_millis(250), "overshoot {:?}", elapsed);
        }
    }

    #[tokio::test]
    async fn frames_pass_through_byte_exact() {
        let mut transport = loopback().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let frame: Vec<u8> = (0..=255u8).chain(0..=255u8).collect();
        peer.send_to(&frame, transport.rx_addr().unwrap())
            .await
            .unwrap();
        let received = transport.receive(Duration::from_secs(2)).await;
        assert_eq!(received, Some(frame));
    }

    #[tokio::test]
    async fn send_reaches_the_tx_port() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut transport = UdpTransport::bind(&TransportConfig {
            address: "127.0.0.1".to_string(),
            tx_port: peer.local_addr().unwrap().port(),
            rx_port: 0,
        })
        .await
        .unwrap();
        transport.send(b"HELLO BEAMSCAN").await;
        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"HELLO BEAMSCAN");
    }
}
