use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Received {
    Datagram { len: usize, from: SocketAddr },
    TimedOut,
}

/// The datagram operations the protocol needs, abstracted for testing. Errors returned from
///  here are fatal for the transfer: anything that can be handled by retrying is reported as
///  [Received::TimedOut] instead.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    /// `None` waits indefinitely. A datagram that is longer than `buf` is truncated.
    async fn recv_from(&self, buf: &mut [u8], timeout: Option<Duration>) -> anyhow::Result<Received>;

    fn local_addr(&self) -> anyhow::Result<SocketAddr>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);
        UdpSocket::send_to(self, buf, to).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8], timeout: Option<Duration>) -> anyhow::Result<Received> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let result = match deadline {
                None => UdpSocket::recv_from(self, buf).await,
                Some(deadline) => match tokio::time::timeout_at(deadline, UdpSocket::recv_from(self, buf)).await {
                    Ok(result) => result,
                    Err(_) => return Ok(Received::TimedOut),
                },
            };

            match result {
                Ok((len, from)) => {
                    trace!("UDP socket: received {} bytes from {:?}", len, from);
                    return Ok(Received::Datagram { len, from });
                }
                Err(e) if is_transient(e.kind()) => {
                    // ICMP 'port unreachable' surfaces here on some platforms, e.g. when the
                    //  peer is not listening yet
                    debug!("UDP socket: transient error {} - continuing to wait", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(UdpSocket::local_addr(self)?)
    }
}

/// Waits for a datagram until `deadline` rather than for a fixed duration, so that callers
///  can ignore unrelated datagrams without extending their timeout.
pub async fn recv_before<S: DatagramSocket + ?Sized>(socket: &S, buf: &mut [u8], deadline: Instant) -> anyhow::Result<Received> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Ok(Received::TimedOut);
    }
    socket.recv_from(buf, Some(remaining)).await
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset)
}
