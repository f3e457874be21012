use std::time::Duration;
use anyhow::bail;
use crate::packet_header::DataHeader;

/// The largest UDP payload that fits into an IPv4 datagram (65535 - 20 bytes IP header -
///  8 bytes UDP header).
pub const MAX_UDP_PAYLOAD: usize = 65_507;

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// This is the maximum number of file bytes carried by a single data packet, i.e. the
    ///  datagram size is this plus the data header. Both sides must agree on it: the receiver
    ///  drops data packets announcing a longer payload.
    ///
    /// The default of 8 KiB exceeds a regular Ethernet MTU, so datagrams are fragmented on the
    ///  IP level. Losing a single fragment loses the whole packet, which is handled like any
    ///  other loss.
    pub max_payload_len: usize,

    /// Timeout for the first attempt of each handshake step (T0). It doubles with every
    ///  timeout up to `handshake_max_timeout`.
    pub handshake_initial_timeout: Duration,
    /// Ceiling for the handshake's exponential backoff (Tmax).
    pub handshake_max_timeout: Duration,

    /// Time to wait for the acknowledgement of a data packet. This doubles with every failed
    ///  attempt for the same packet and is reset once the packet is acknowledged. There is no
    ///  ceiling, `max_data_retries` bounds the number of doublings.
    pub data_ack_timeout: Duration,
    /// Number of retransmissions of a single data packet before the transfer is given up.
    pub max_data_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            max_payload_len: 8192,
            handshake_initial_timeout: Duration::from_millis(100),
            handshake_max_timeout: Duration::from_millis(1600),
            data_ack_timeout: Duration::from_millis(100),
            max_data_retries: 3,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_payload_len == 0 {
            bail!("max payload length must not be 0");
        }
        if self.max_payload_len.saturating_add(DataHeader::SERIALIZED_LEN) > MAX_UDP_PAYLOAD {
            bail!("max payload length {} does not fit into a UDP datagram - the limit is {}", self.max_payload_len, MAX_UDP_PAYLOAD - DataHeader::SERIALIZED_LEN);
        }
        if self.handshake_initial_timeout.is_zero() {
            bail!("handshake timeout must not be 0");
        }
        if self.handshake_max_timeout < self.handshake_initial_timeout {
            bail!("maximum handshake timeout {:?} is less than the initial timeout {:?}", self.handshake_max_timeout, self.handshake_initial_timeout);
        }
        if self.data_ack_timeout.is_zero() {
            bail!("data ack timeout must not be 0");
        }
        Ok(())
    }

    /// Size of the buffer that is needed to receive the biggest possible data packet
    pub fn max_datagram_len(&self) -> usize {
        DataHeader::SERIALIZED_LEN + self.max_payload_len
    }
}
