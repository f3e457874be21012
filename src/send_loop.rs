use std::cmp::min;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use anyhow::Context;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use crate::backoff::ExponentialBackoff;
use crate::config::TransferConfig;
use crate::control_messages::DataAck;
use crate::packet_header::DataHeader;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::session::Session;
use crate::socket::{recv_before, DatagramSocket, Received};

/// A data packet remained unacknowledged after the maximum number of retransmissions. This
///  is fatal for the transfer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetriesExhausted {
    pub sequence_number: u32,
    pub retries: u32,
}
impl Display for RetriesExhausted {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "data packet {} was not acknowledged after {} retransmissions", self.sequence_number, self.retries)
    }
}
impl std::error::Error for RetriesExhausted {}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SendStats {
    pub bytes_sent: u64,
    /// distinct data packets, not counting retransmissions
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub elapsed: Duration,
}
impl SendStats {
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.bytes_sent as f64 / self.elapsed.as_secs_f64()
    }
}

enum AckOutcome {
    Acknowledged,
    Mismatch(u32),
    TimedOut,
}

/// Sends the first `bytes_to_transfer` bytes of `source` to the session's peer, one packet at
///  a time: a packet is sent, and the next one is only read after the peer acknowledged it.
///
/// The packet that brings the total to `bytes_to_transfer` is flagged as the last packet. If
///  `source` ends early, the packet with the remaining bytes is the last packet instead, so
///  the receiver always gets a proper end of stream. A transfer of 0 bytes consists of a single
///  empty last packet.
pub async fn send_loop<S, R>(
    socket: &S,
    session: &Session,
    source: &mut R,
    bytes_to_transfer: u64,
    config: &TransferConfig,
) -> anyhow::Result<SendStats>
where
    S: DatagramSocket + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    let span = span!(Level::INFO, "send", session_id = %session.id);
    do_send_loop(socket, session, source, bytes_to_transfer, config)
        .instrument(span)
        .await
}

async fn do_send_loop<S, R>(
    socket: &S,
    session: &Session,
    source: &mut R,
    bytes_to_transfer: u64,
    config: &TransferConfig,
) -> anyhow::Result<SendStats>
where
    S: DatagramSocket + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    info!("sending {} bytes to {:?}", bytes_to_transfer, session.peer_addr);

    let started = Instant::now();
    let mut stats = SendStats::default();

    let mut sequence_number = session.first_data_sequence_number();
    let mut backoff = ExponentialBackoff::uncapped(config.data_ack_timeout);
    let mut payload_buf = vec![0u8; config.max_payload_len];
    let mut packet = BytesMut::with_capacity(config.max_datagram_len());
    let mut recv_buf = [0u8; 16];

    loop {
        let remaining = bytes_to_transfer - stats.bytes_sent;
        let chunk_len: usize = min(config.max_payload_len.safe_cast(), remaining).prechecked_cast();

        let num_read = read_chunk(source, &mut payload_buf[..chunk_len]).await
            .with_context(|| format!("reading data packet {} from source", sequence_number))?;
        let bytes_sent_after: u64 = stats.bytes_sent + SafeCast::<u64>::safe_cast(num_read);
        let reached_eof = num_read < chunk_len;
        if reached_eof {
            warn!("source ended after {} of {} bytes - ending the transfer", bytes_sent_after, bytes_to_transfer);
        }
        let last_packet = reached_eof || bytes_sent_after >= bytes_to_transfer;

        let header = DataHeader::new(sequence_number, num_read, last_packet);
        packet.clear();
        header.ser(&mut packet);
        packet.extend_from_slice(&payload_buf[..num_read]);

        // A retransmission is the identical datagram
        backoff.reset();
        let mut retries = 0;
        loop {
            trace!("sending {:?}", header);
            socket.send_to(session.peer_addr, &packet).await
                .with_context(|| format!("sending data packet {} to {}", sequence_number, session.peer_addr))?;

            match wait_for_ack(socket, session, sequence_number, &mut recv_buf, backoff.current()).await? {
                AckOutcome::Acknowledged => break,
                AckOutcome::Mismatch(acked) => debug!("received DataAck for {} while waiting for {}", acked, sequence_number),
                AckOutcome::TimedOut => debug!("no DataAck for {} after {:?}", sequence_number, backoff.current()),
            }

            retries += 1;
            if retries > config.max_data_retries {
                return Err(RetriesExhausted {
                    sequence_number,
                    retries: config.max_data_retries,
                }.into());
            }
            let timeout = backoff.on_timeout();
            stats.retransmissions += 1;
            debug!("retransmitting {:?} (retry {}), waiting {:?}", header, retries, timeout);
        }

        stats.bytes_sent = bytes_sent_after;
        stats.packets_sent += 1;
        sequence_number = sequence_number.wrapping_add(1);

        if last_packet {
            break;
        }
    }

    stats.elapsed = started.elapsed();
    info!("sent {} bytes in {} packets with {} retransmissions in {:?}", stats.bytes_sent, stats.packets_sent, stats.retransmissions, stats.elapsed);
    Ok(stats)
}

/// Unrelated datagrams (from other addresses, or not a DataAck at all) are ignored without
///  extending the timeout.
async fn wait_for_ack<S: DatagramSocket + ?Sized>(
    socket: &S,
    session: &Session,
    sequence_number: u32,
    recv_buf: &mut [u8],
    timeout: Duration,
) -> anyhow::Result<AckOutcome> {
    let deadline = Instant::now() + timeout;
    loop {
        let len = match recv_before(socket, recv_buf, deadline).await
            .with_context(|| format!("waiting for DataAck {}", sequence_number))?
        {
            Received::TimedOut => return Ok(AckOutcome::TimedOut),
            Received::Datagram { len, from } if from == session.peer_addr => len,
            Received::Datagram { from, .. } => {
                debug!("ignoring datagram from {:?}", from);
                continue;
            }
        };

        match DataAck::deser(&mut &recv_buf[..len]) {
            Ok(ack) if ack.sequence_number == sequence_number => return Ok(AckOutcome::Acknowledged),
            Ok(ack) => return Ok(AckOutcome::Mismatch(ack.sequence_number)),
            Err(e) => debug!("ignoring datagram while waiting for DataAck: {}", e),
        }
    }
}

/// Fills `buf` unless the source ends first, returning the number of bytes read
async fn read_chunk<R: AsyncRead + Unpin + ?Sized>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
