use anyhow::bail;
use bytes::{Buf, BufMut};

/// Checks that a control message occupies the entire datagram: packets have no type tag, so
///  a length mismatch means it is not the kind of message we are waiting for.
fn check_exact_len(buf: &impl Buf, expected: usize, kind: &str) -> anyhow::Result<()> {
    if buf.remaining() != expected {
        bail!("{} has {} bytes, received {}", kind, expected, buf.remaining());
    }
    Ok(())
}

/// First packet of the handshake, sent by the initiator
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Syn {
    pub sequence_number: u32,
}
impl Syn {
    pub const SERIALIZED_LEN: usize = 4;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.sequence_number);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Syn> {
        check_exact_len(&*buf, Self::SERIALIZED_LEN, "Syn")?;
        Ok(Syn {
            sequence_number: buf.try_get_u32()?,
        })
    }
}

/// The responder's reply to a [Syn]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SynAck {
    /// the responder's initial sequence number
    pub sequence_number: u32,
    /// the Syn's sequence number + 1
    pub ack_number: u32,
}
impl SynAck {
    pub const SERIALIZED_LEN: usize = 8;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.sequence_number);
        buf.put_u32(self.ack_number);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<SynAck> {
        check_exact_len(&*buf, Self::SERIALIZED_LEN, "SynAck")?;
        let sequence_number = buf.try_get_u32()?;
        let ack_number = buf.try_get_u32()?;
        Ok(SynAck {
            sequence_number,
            ack_number,
        })
    }
}

/// Final packet of the handshake. It is sent exactly once, the initiator does not wait for
///  any confirmation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct HandshakeAck {
    /// the SynAck's sequence number + 1
    pub ack_number: u32,
}
impl HandshakeAck {
    pub const SERIALIZED_LEN: usize = 4;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.ack_number);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<HandshakeAck> {
        check_exact_len(&*buf, Self::SERIALIZED_LEN, "handshake Ack")?;
        Ok(HandshakeAck {
            ack_number: buf.try_get_u32()?,
        })
    }
}

/// Acknowledges a single data packet by echoing its sequence number
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DataAck {
    pub sequence_number: u32,
}
impl DataAck {
    pub const SERIALIZED_LEN: usize = 4;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.sequence_number);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<DataAck> {
        check_exact_len(&*buf, Self::SERIALIZED_LEN, "DataAck")?;
        Ok(DataAck {
            sequence_number: buf.try_get_u32()?,
        })
    }
}
