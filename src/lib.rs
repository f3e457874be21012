//! A reliable, ordered file transfer on top of plain UDP datagrams.
//!
//! Exactly two roles exist: a *sender* that initiates the session and pushes the first
//!  `bytes_to_transfer` bytes of a file, and a *receiver* that listens on a port and writes
//!  what it receives to a destination file. Each process handles exactly one session with
//!  exactly one peer.
//!
//! ## Protocol
//!
//! A session starts with a three-way handshake that agrees on randomized initial sequence
//!  numbers:
//!
//! ```ascii
//!  sender (initiator)                        receiver (responder)
//!    IDLE                                      LISTEN
//!    SYN_SENT    --- Syn{isn_i} ------------->
//!                <-- SynAck{isn_r, isn_i+1} -- SYN_RCVD
//!    ESTABLISHED --- Ack{isn_r+1} ----------->  ESTABLISHED
//! ```
//!
//! Lost handshake packets are retransmitted with exponential backoff up to a ceiling, without
//!  a retry limit. The initiator does not wait for its final `Ack` to be confirmed. If that
//!  `Ack` gets lost, the first data packet serves as proof of life for the responder.
//!
//! The mirror case at the end of a transfer is not covered: the receiver exits as soon as it
//!  has written the last packet. If the `DataAck` for that packet gets lost, the destination is
//!  complete, but the sender's retransmissions go unanswered and it fails with
//!  [send_loop::RetriesExhausted].
//!
//! Data transfer is stop-and-wait ARQ: the sender has at most one unacknowledged data packet
//!  in flight, numbered `isn_i, isn_i+1, ...`. The receiver acknowledges every data packet it
//!  gets, duplicates included, and writes only packets with a sequence number above the
//!  highest one written so far. A packet that is not acknowledged is resent unchanged with a
//!  doubled timeout; after `max_data_retries` consecutive failures the transfer is aborted.
//!
//! NB: Only one packet is ever in flight, so throughput is bounded by
//!  `max_payload_len / round trip time`. This is not congestion control, and there is no
//!  flow control: the receiver's optional write rate limit only slows down its own loop.
//!
//! ## Wire format
//!
//! All numbers are in network byte order (BE). Packets carry no type tag, the expected kind
//!  follows from the protocol state and the datagram's length.
//!
//! ```ascii
//! Syn:          0: sequence number (u32)
//! SynAck:       0: sequence number (u32)
//!               4: ack number (u32) - the Syn's sequence number + 1
//! Ack:          0: ack number (u32) - the SynAck's sequence number + 1
//! Data:         0: sequence number (u32)
//!               4: message length (u32) - number of payload bytes, at most `max_payload_len`
//!               8: last packet (u8) - 0 for false, anything else for true
//!               9: payload
//! DataAck:      0: sequence number (u32) - echo of the acknowledged data packet's number
//! ```

pub mod backoff;
pub mod config;
pub mod control_messages;
pub mod file_transfer;
pub mod handshake;
pub mod packet_header;
pub mod random;
pub mod receive_loop;
pub mod safe_converter;
pub mod send_loop;
pub mod session;
pub mod socket;
pub mod test_util;
pub mod write_throttle;
