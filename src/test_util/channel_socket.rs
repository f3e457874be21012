use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;
use crate::socket::{DatagramSocket, Received};

/// What happens to a single datagram sent through a [ChannelSocket]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Fault {
    Deliver,
    Drop,
    Duplicate,
}

type FaultFn = Box<dyn FnMut(&[u8]) -> Fault + Send>;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SentDatagram {
    pub at: Instant,
    pub to: SocketAddr,
    pub data: Vec<u8>,
    pub fault: Fault,
}

/// Every datagram a [ChannelSocket] was asked to send, including those it dropped
#[derive(Clone, Default)]
pub struct SendLog(Arc<Mutex<Vec<SentDatagram>>>);
impl SendLog {
    pub fn snapshot(&self) -> Vec<SentDatagram> {
        self.0.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, sent: SentDatagram) {
        self.0.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sent);
    }
}

/// Puts datagrams into a [ChannelSocket]'s receive queue, e.g. to simulate a third party
#[derive(Clone)]
pub struct Inbox(mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>);
impl Inbox {
    pub fn push(&self, from: SocketAddr, data: &[u8]) {
        let _ = self.0.send((from, data.to_vec()));
    }
}

/// An in-memory [DatagramSocket] connected to exactly one other `ChannelSocket`. Datagrams to
///  any other address are silently lost, as are datagrams sent after the peer was dropped.
///
/// Each sent datagram passes a fault function which decides whether it is delivered, dropped
///  or duplicated. Delivery is in order and without delay, so combined with tokio's paused
///  clock, tests are deterministic.
pub struct ChannelSocket {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    outgoing: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
    inbox: Inbox,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>>,
    fault: Mutex<FaultFn>,
    send_log: SendLog,
}

impl ChannelSocket {
    pub fn pair(addr_a: SocketAddr, addr_b: SocketAddr) -> (ChannelSocket, ChannelSocket) {
        let (send_a, recv_a) = mpsc::unbounded_channel();
        let (send_b, recv_b) = mpsc::unbounded_channel();

        let a = ChannelSocket::new(addr_a, addr_b, send_b.clone(), send_a.clone(), recv_a);
        let b = ChannelSocket::new(addr_b, addr_a, send_a, send_b, recv_b);
        (a, b)
    }

    fn new(
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        outgoing: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
        own_queue: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
        incoming: mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>,
    ) -> ChannelSocket {
        let deliver_all: FaultFn = Box::new(|_: &[u8]| Fault::Deliver);
        ChannelSocket {
            local_addr,
            peer_addr,
            outgoing,
            inbox: Inbox(own_queue),
            incoming: tokio::sync::Mutex::new(incoming),
            fault: Mutex::new(deliver_all),
            send_log: SendLog::default(),
        }
    }

    pub fn with_fault(self, fault: impl FnMut(&[u8]) -> Fault + Send + 'static) -> ChannelSocket {
        let fault: FaultFn = Box::new(fault);
        ChannelSocket {
            fault: Mutex::new(fault),
            ..self
        }
    }

    pub fn send_log(&self) -> SendLog {
        self.send_log.clone()
    }

    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    fn apply_fault(&self, buf: &[u8]) -> Fault {
        let mut fault = self.fault.lock()
            .unwrap_or_else(PoisonError::into_inner);
        (*fault)(buf)
    }
}

#[async_trait]
impl DatagramSocket for ChannelSocket {
    async fn send_to(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        let fault = if to == self.peer_addr {
            self.apply_fault(buf)
        }
        else {
            Fault::Drop
        };
        trace!("channel socket {:?}: sending {} bytes to {:?} - {:?}", self.local_addr, buf.len(), to, fault);

        self.send_log.push(SentDatagram {
            at: Instant::now(),
            to,
            data: buf.to_vec(),
            fault,
        });

        let num_copies = match fault {
            Fault::Deliver => 1,
            Fault::Drop => 0,
            Fault::Duplicate => 2,
        };
        for _ in 0..num_copies {
            // the peer may be gone already, which is a loss like any other
            let _ = self.outgoing.send((self.local_addr, buf.to_vec()));
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8], timeout: Option<Duration>) -> anyhow::Result<Received> {
        let mut incoming = self.incoming.lock().await;

        let received = match timeout {
            None => incoming.recv().await,
            Some(timeout) => match tokio::time::timeout(timeout, incoming.recv()).await {
                Ok(received) => received,
                Err(_) => return Ok(Received::TimedOut),
            },
        };

        match received {
            Some((from, data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(Received::Datagram { len, from })
            }
            None => {
                // all senders are gone, so nothing will ever arrive
                match timeout {
                    None => std::future::pending().await,
                    Some(timeout) => {
                        tokio::time::sleep(timeout).await;
                        Ok(Received::TimedOut)
                    }
                }
            }
        }
    }

    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
