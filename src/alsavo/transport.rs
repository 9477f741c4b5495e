//! UDP transport to a single device endpoint with timeout handling.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::{AlsavoError, Result};

/// Largest datagram the pump is expected to send.
const MAX_DATAGRAM: usize = 1024;

/// Datagram client pinned to one remote endpoint.
///
/// `send` is fire-and-forget; `send_and_receive` retransmits the request a
/// bounded number of times, each wait capped by the receive timeout. The
/// two are separate operations because their failure semantics differ: a
/// lost fire-and-forget datagram is invisible, a lost request surfaces as
/// [`AlsavoError::Timeout`].
#[derive(Debug)]
pub struct UdpClient {
    socket: UdpSocket,
    timeout: Duration,
    tries: u32,
}

impl UdpClient {
    /// Bind an ephemeral local port and pin the socket to the device.
    pub async fn connect(host: &str, port: u16, timeout: Duration, tries: u32) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((host, port)).await?;
        debug!("UDP socket bound to {:?} for {host}:{port}", socket.local_addr()?);
        Ok(Self {
            socket,
            timeout,
            tries: tries.max(1),
        })
    }

    /// Fire-and-forget datagram send.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.socket.send(data).await?;
        Ok(())
    }

    /// Send a request and wait for the next datagram from the device.
    pub async fn send_and_receive(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        for attempt in 1..=self.tries {
            self.socket.send(data).await?;
            match timeout(self.timeout, self.socket.recv(&mut buf)).await {
                Ok(Ok(n)) => {
                    debug!("received {n} bytes");
                    return Ok(buf[..n].to_vec());
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(
                        "no reply within {:?} (attempt {attempt}/{})",
                        self.timeout, self.tries
                    );
                }
            }
        }
        Err(AlsavoError::Timeout)
    }
}
