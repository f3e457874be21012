use std::fmt::Debug;
use anyhow::bail;
use bytes::{Buf, BufMut};
use crate::safe_converter::{PrecheckedCast, SafeCast};

/// Precedes the payload of every data packet
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct DataHeader {
    pub sequence_number: u32,
    /// number of payload bytes following the header
    pub message_length: u32,
    /// marks the end of the transferred byte stream
    pub last_packet: bool,
}
impl Debug for DataHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DATA{{#{}:{}{}}}", self.sequence_number, self.message_length, if self.last_packet { ":LAST" } else { "" })
    }
}

impl DataHeader {
    pub const SERIALIZED_LEN: usize =
        size_of::<u32>()    // sequence number
        + size_of::<u32>()  // message length
        + size_of::<u8>();  // last packet flag

    pub fn new(sequence_number: u32, payload_len: usize, last_packet: bool) -> DataHeader {
        DataHeader {
            sequence_number,
            message_length: payload_len.prechecked_cast(),
            last_packet,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.message_length.safe_cast()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.sequence_number);
        buf.put_u32(self.message_length);
        buf.put_u8(if self.last_packet { 1 } else { 0 });
    }

    /// Reads the header, leaving `buf` positioned at the start of the payload. The announced
    ///  payload length is checked both against the configured maximum and against the bytes
    ///  actually present.
    pub fn deser(buf: &mut impl Buf, max_payload_len: usize) -> anyhow::Result<DataHeader> {
        let sequence_number = buf.try_get_u32()?;
        let message_length = buf.try_get_u32()?;
        let last_packet = buf.try_get_u8()? != 0;

        let result = DataHeader {
            sequence_number,
            message_length,
            last_packet,
        };

        if result.payload_len() > max_payload_len {
            bail!("{:?} exceeds the maximum payload length of {}", result, max_payload_len);
        }
        if result.payload_len() > buf.remaining() {
            bail!("{:?} announces more payload than the {} bytes present", result, buf.remaining());
        }
        Ok(result)
    }
}

/// Splits a received data datagram into header and payload. Trailing bytes beyond the
///  announced message length are ignored.
pub fn parse_data_packet(datagram: &[u8], max_payload_len: usize) -> anyhow::Result<(DataHeader, &[u8])> {
    let mut parse_buf = datagram;
    let header = DataHeader::deser(&mut parse_buf, max_payload_len)?;
    Ok((header, &parse_buf[..header.payload_len()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::empty_last(DataHeader { sequence_number: 5, message_length: 0, last_packet: true }, vec![0,0,0,5, 0,0,0,0, 1])]
    #[case::regular(DataHeader { sequence_number: 0x0102_0304, message_length: 8192, last_packet: false }, vec![1,2,3,4, 0,0,0x20,0, 0])]
    #[case::max_seq(DataHeader { sequence_number: u32::MAX, message_length: 3616, last_packet: true }, vec![255,255,255,255, 0,0,0x0e,0x20, 1])]
    fn test_ser(#[case] header: DataHeader, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.len(), DataHeader::SERIALIZED_LEN);
        assert_eq!(buf.to_vec(), expected);
    }

    #[rstest]
    #[case::no_payload(vec![0,0,0,7, 0,0,0,0, 0], 8192, Some((DataHeader::new(7, 0, false), vec![])))]
    #[case::with_payload(vec![0,0,0,7, 0,0,0,3, 1, 9,8,7], 8192, Some((DataHeader::new(7, 3, true), vec![9,8,7])))]
    #[case::any_nonzero_is_last(vec![0,0,0,7, 0,0,0,1, 0x80, 9], 8192, Some((DataHeader::new(7, 1, true), vec![9])))]
    #[case::trailing_bytes_ignored(vec![0,0,0,7, 0,0,0,1, 0, 9,8,7], 8192, Some((DataHeader::new(7, 1, false), vec![9])))]
    #[case::exactly_max(vec![0,0,0,7, 0,0,0,2, 0, 9,8], 2, Some((DataHeader::new(7, 2, false), vec![9,8])))]
    #[case::above_max(vec![0,0,0,7, 0,0,0,3, 0, 9,8,7], 2, None)]
    #[case::payload_missing(vec![0,0,0,7, 0,0,0,4, 0, 9,8,7], 8192, None)]
    #[case::header_incomplete(vec![0,0,0,7, 0,0,0,0], 8192, None)]
    #[case::control_message(vec![0,0,0,7], 8192, None)]
    #[case::empty(vec![], 8192, None)]
    fn test_parse_data_packet(#[case] datagram: Vec<u8>, #[case] max_payload_len: usize, #[case] expected: Option<(DataHeader, Vec<u8>)>) {
        let actual = parse_data_packet(&datagram, max_payload_len)
            .ok()
            .map(|(header, payload)| (header, payload.to_vec()));
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", DataHeader::new(3, 10, false)), "DATA{#3:10}");
        assert_eq!(format!("{:?}", DataHeader::new(4, 0, true)), "DATA{#4:0:LAST}");
    }
}
