//! Three-way handshake establishing a [Session].
//!
//! Handshake packets are retransmitted with exponential backoff, and there is no retry limit:
//!  the initiator keeps sending (freshly randomized) `Syn`s until it gets an answer, and the
//!  responder keeps resending its `SynAck` until it sees the matching `Ack` or a data packet.

use std::collections::VecDeque;
use std::net::SocketAddr;
use anyhow::Context;
use bytes::BytesMut;
use tokio::time::Instant;
use tracing::{debug, info, span, trace, Instrument, Level};
use uuid::Uuid;
use crate::backoff::ExponentialBackoff;
use crate::config::TransferConfig;
use crate::control_messages::{HandshakeAck, Syn, SynAck};
use crate::packet_header::DataHeader;
use crate::random::Random;
use crate::session::{Role, Session};
use crate::socket::{recv_before, DatagramSocket, Received};

/// The responder's side of an established session
#[derive(Debug)]
pub struct Accepted {
    pub session: Session,
    /// If the initiator's final `Ack` is lost, its first data packet is the responder's proof
    ///  that the handshake completed. That packet is passed on here to be processed as the first
    ///  packet of the transfer.
    pub early_data: Option<Vec<u8>>,
}

/// IDLE -> SYN_SENT -> ESTABLISHED
pub async fn initiate<R: Random, S: DatagramSocket + ?Sized>(socket: &S, peer_addr: SocketAddr, config: &TransferConfig) -> anyhow::Result<Session> {
    let session_id = Uuid::new_v4();
    let span = span!(Level::INFO, "handshake", %session_id, role = %Role::Initiator);
    do_initiate::<R, S>(socket, peer_addr, config, session_id)
        .instrument(span)
        .await
}

async fn do_initiate<R: Random, S: DatagramSocket + ?Sized>(socket: &S, peer_addr: SocketAddr, config: &TransferConfig, session_id: Uuid) -> anyhow::Result<Session> {
    let mut backoff = ExponentialBackoff::capped(config.handshake_initial_timeout, config.handshake_max_timeout);
    let mut recv_buf = vec![0u8; config.max_datagram_len()];
    let mut send_buf = BytesMut::with_capacity(SynAck::SERIALIZED_LEN);

    // A SynAck may answer any of our recent Syns if the responder was slow or started late
    let mut sent_isns = SentIsns::default();

    loop {
        let syn = Syn { sequence_number: R::initial_sequence_number() };
        sent_isns.push(syn.sequence_number);

        send_buf.clear();
        syn.ser(&mut send_buf);
        socket.send_to(peer_addr, &send_buf).await
            .with_context(|| format!("sending Syn to {}", peer_addr))?;
        debug!("sent {:?} to {:?}, waiting {:?}", syn, peer_addr, backoff.current());

        let deadline = Instant::now() + backoff.current();
        loop {
            let len = match recv_before(socket, &mut recv_buf, deadline).await.context("waiting for SynAck")? {
                Received::TimedOut => break,
                Received::Datagram { len, from } if from == peer_addr => len,
                Received::Datagram { from, .. } => {
                    debug!("ignoring datagram from {:?} - waiting for {:?}", from, peer_addr);
                    continue;
                }
            };

            let syn_ack = match SynAck::deser(&mut &recv_buf[..len]) {
                Ok(syn_ack) => syn_ack,
                Err(e) => {
                    debug!("ignoring datagram while waiting for SynAck: {}", e);
                    continue;
                }
            };

            let initiator_isn = syn_ack.ack_number.wrapping_sub(1);
            if !sent_isns.contains(initiator_isn) {
                debug!("ignoring {:?} - it does not acknowledge a Syn of this session", syn_ack);
                continue;
            }

            let ack = HandshakeAck { ack_number: syn_ack.sequence_number.wrapping_add(1) };
            send_buf.clear();
            ack.ser(&mut send_buf);
            socket.send_to(peer_addr, &send_buf).await
                .with_context(|| format!("sending handshake Ack to {}", peer_addr))?;

            info!("session established with {:?}", peer_addr);
            return Ok(Session {
                id: session_id,
                role: Role::Initiator,
                peer_addr,
                initiator_isn,
                responder_isn: syn_ack.sequence_number,
            });
        }

        let timeout = backoff.on_timeout();
        debug!("no SynAck from {:?} - retrying with timeout {:?}", peer_addr, timeout);
    }
}

/// The initial sequence numbers of the most recent Syns. Older ones are forgotten: at the
///  backoff ceiling, the window still spans many seconds.
#[derive(Default)]
struct SentIsns(VecDeque<u32>);
impl SentIsns {
    const CAPACITY: usize = 16;

    fn push(&mut self, isn: u32) {
        if self.0.len() == Self::CAPACITY {
            self.0.pop_front();
        }
        self.0.push_back(isn);
    }

    fn contains(&self, isn: u32) -> bool {
        self.0.contains(&isn)
    }
}

/// LISTEN -> SYN_RCVD -> ESTABLISHED
pub async fn accept<R: Random, S: DatagramSocket + ?Sized>(socket: &S, config: &TransferConfig) -> anyhow::Result<Accepted> {
    let session_id = Uuid::new_v4();
    let span = span!(Level::INFO, "handshake", %session_id, role = %Role::Responder);
    do_accept::<R, S>(socket, config, session_id)
        .instrument(span)
        .await
}

async fn do_accept<R: Random, S: DatagramSocket + ?Sized>(socket: &S, config: &TransferConfig, session_id: Uuid) -> anyhow::Result<Accepted> {
    let mut backoff = ExponentialBackoff::capped(config.handshake_initial_timeout, config.handshake_max_timeout);
    let mut recv_buf = vec![0u8; config.max_datagram_len()];

    let (peer_addr, syn) = listen(socket, &mut recv_buf, &mut backoff).await?;
    debug!("received {:?} from {:?}", syn, peer_addr);

    let syn_ack = SynAck {
        sequence_number: R::initial_sequence_number(),
        ack_number: syn.sequence_number.wrapping_add(1),
    };
    let expected_ack_number = syn_ack.sequence_number.wrapping_add(1);
    let mut send_buf = BytesMut::with_capacity(SynAck::SERIALIZED_LEN);
    syn_ack.ser(&mut send_buf);

    let session = Session {
        id: session_id,
        role: Role::Responder,
        peer_addr,
        initiator_isn: syn.sequence_number,
        responder_isn: syn_ack.sequence_number,
    };

    backoff.reset();
    loop {
        socket.send_to(peer_addr, &send_buf).await
            .with_context(|| format!("sending SynAck to {}", peer_addr))?;
        debug!("sent {:?} to {:?}, waiting {:?}", syn_ack, peer_addr, backoff.current());

        let deadline = Instant::now() + backoff.current();
        loop {
            let len = match recv_before(socket, &mut recv_buf, deadline).await.context("waiting for handshake Ack")? {
                Received::TimedOut => break,
                Received::Datagram { len, from } if from == peer_addr => len,
                Received::Datagram { from, .. } => {
                    debug!("ignoring datagram from {:?} - waiting for {:?}", from, peer_addr);
                    continue;
                }
            };

            if len >= DataHeader::SERIALIZED_LEN {
                info!("session established with {:?} by a data packet - the handshake Ack was lost", peer_addr);
                return Ok(Accepted {
                    session,
                    early_data: Some(recv_buf[..len].to_vec()),
                });
            }

            match HandshakeAck::deser(&mut &recv_buf[..len]) {
                Ok(ack) if ack.ack_number == expected_ack_number => {
                    info!("session established with {:?}", peer_addr);
                    return Ok(Accepted {
                        session,
                        early_data: None,
                    });
                }
                Ok(ack) => debug!("ignoring {:?} - expected ack number {}", ack, expected_ack_number),
                Err(e) => debug!("ignoring datagram while waiting for handshake Ack: {}", e),
            }
        }

        let timeout = backoff.on_timeout();
        debug!("no Ack from {:?} - resending SynAck with timeout {:?}", peer_addr, timeout);
    }
}

/// Waits for a Syn from anybody. The timeout only paces the idle loop's logging, there is
///  nothing to resend while listening.
async fn listen<S: DatagramSocket + ?Sized>(socket: &S, recv_buf: &mut [u8], backoff: &mut ExponentialBackoff) -> anyhow::Result<(SocketAddr, Syn)> {
    loop {
        let deadline = Instant::now() + backoff.current();
        loop {
            match recv_before(socket, recv_buf, deadline).await.context("waiting for Syn")? {
                Received::TimedOut => break,
                Received::Datagram { len, from } => match Syn::deser(&mut &recv_buf[..len]) {
                    Ok(syn) => return Ok((from, syn)),
                    Err(e) => debug!("ignoring datagram from {:?} while listening: {}", from, e),
                },
            }
        }

        let timeout = backoff.on_timeout();
        trace!("no Syn yet, listening for another {:?}", timeout);
    }
}
