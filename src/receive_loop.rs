use std::time::Duration;
use anyhow::Context;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use crate::config::TransferConfig;
use crate::control_messages::DataAck;
use crate::packet_header::{parse_data_packet, DataHeader};
use crate::safe_converter::SafeCast;
use crate::session::Session;
use crate::socket::{DatagramSocket, Received};
use crate::write_throttle::WriteThrottle;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReceiveStats {
    pub bytes_written: u64,
    pub packets_written: u64,
    /// packets that were acknowledged again but not written
    pub duplicates_discarded: u64,
    pub elapsed: Duration,
}
impl ReceiveStats {
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.bytes_written as f64 / self.elapsed.as_secs_f64()
    }
}

/// Receives data packets from the session's peer and appends their payload to `sink` until
///  the packet flagged as last was written.
///
/// Every data packet is acknowledged, including duplicates: the sender may have missed the
///  previous acknowledgement. Only packets with a sequence number above the highest one
///  written so far are written. There is no timeout, an established receiver waits for the
///  next packet indefinitely.
///
/// `early_data` is a datagram that completed the handshake, see [crate::handshake::Accepted].
///  `write_rate` limits the average rate of writing to `sink` in bytes per second, 0 meaning
///  unlimited.
pub async fn receive_loop<S, W>(
    socket: &S,
    session: &Session,
    early_data: Option<Vec<u8>>,
    sink: &mut W,
    write_rate: u64,
    config: &TransferConfig,
) -> anyhow::Result<ReceiveStats>
where
    S: DatagramSocket + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let span = span!(Level::INFO, "receive", session_id = %session.id);
    do_receive_loop(socket, session, early_data, sink, write_rate, config)
        .instrument(span)
        .await
}

async fn do_receive_loop<S, W>(
    socket: &S,
    session: &Session,
    mut early_data: Option<Vec<u8>>,
    sink: &mut W,
    write_rate: u64,
    config: &TransferConfig,
) -> anyhow::Result<ReceiveStats>
where
    S: DatagramSocket + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    info!("receiving from {:?}", session.peer_addr);

    let started = Instant::now();
    let throttle = WriteThrottle::new(write_rate);
    let mut stats = ReceiveStats::default();

    let mut latest_sequence_number: Option<u32> = None;
    let mut recv_buf = vec![0u8; config.max_datagram_len()];
    let mut ack_buf = BytesMut::with_capacity(DataAck::SERIALIZED_LEN);

    loop {
        let len = match early_data.take() {
            Some(datagram) => {
                trace!("processing data packet that arrived during the handshake");
                let len = datagram.len().min(recv_buf.len());
                recv_buf[..len].copy_from_slice(&datagram[..len]);
                len
            }
            None => match socket.recv_from(&mut recv_buf, None).await.context("receiving data packet")? {
                Received::Datagram { len, from } if from == session.peer_addr => len,
                Received::Datagram { from, .. } => {
                    debug!("ignoring datagram from {:?}", from);
                    continue;
                }
                Received::TimedOut => continue,
            },
        };

        if len < DataHeader::SERIALIZED_LEN {
            // e.g. a retransmitted handshake packet
            debug!("ignoring datagram of {} bytes - too short for a data packet", len);
            continue;
        }
        let (header, payload) = match parse_data_packet(&recv_buf[..len], config.max_payload_len) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("dropping malformed data packet from {:?}: {}", session.peer_addr, e);
                continue;
            }
        };
        trace!("received {:?}", header);

        ack_buf.clear();
        DataAck { sequence_number: header.sequence_number }.ser(&mut ack_buf);
        socket.send_to(session.peer_addr, &ack_buf).await
            .with_context(|| format!("sending DataAck {} to {}", header.sequence_number, session.peer_addr))?;

        if let Some(latest) = latest_sequence_number {
            if header.sequence_number <= latest {
                debug!("discarding duplicate {:?} - already written up to {}", header, latest);
                stats.duplicates_discarded += 1;
                continue;
            }
        }

        sink.write_all(payload).await
            .with_context(|| format!("writing data packet {}", header.sequence_number))?;
        latest_sequence_number = Some(header.sequence_number);
        stats.bytes_written += SafeCast::<u64>::safe_cast(payload.len());
        stats.packets_written += 1;

        if header.last_packet {
            break;
        }

        if let Some(throttle) = &throttle {
            throttle.throttle(stats.bytes_written).await;
        }
    }

    sink.flush().await.context("flushing destination")?;

    stats.elapsed = started.elapsed();
    info!("received {} bytes in {} packets ({} duplicates) in {:?}", stats.bytes_written, stats.packets_written, stats.duplicates_discarded, stats.elapsed);
    Ok(stats)
}
