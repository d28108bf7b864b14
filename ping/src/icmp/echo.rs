// Echo or Echo Reply Message (RFC 792)
//  |       0       |       1       |       2       |       3       |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |     Type      |      Code     |           Checksum            |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |           Identifier          |        Sequence Number        |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |   Data   ...
//  +-+-+-+-+-
//
//  Type 8 for echo, 0 for echo reply. Code is always 0. The echoer
//  returns identifier, sequence number and data unchanged.

use super::{write_checksum, EncodeError, EncodeResult, IcmpV4, HEADER_SIZE};

pub trait Echo {
    const REQUEST_TYPE: u8;
    const REQUEST_CODE: u8;
}

impl Echo for IcmpV4 {
    const REQUEST_TYPE: u8 = 8;
    const REQUEST_CODE: u8 = 0;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRequest<'a> {
    pub ident: u16,
    pub seq_cnt: u16,
    pub payload: &'a [u8],
}

impl<'a> EchoRequest<'a> {
    /// Size of the encoded message, header included.
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Writes the message into the front of `buffer` and returns the
    /// encoded length. The checksum is computed over exactly that prefix.
    pub fn encode<P: Echo>(&self, buffer: &mut [u8]) -> EncodeResult<usize> {
        let len = self.len();
        if buffer.len() < len {
            return Err(EncodeError::BufferTooSmall {
                need: len,
                have: buffer.len(),
            });
        }
        let buffer = &mut buffer[..len];

        buffer[0] = P::REQUEST_TYPE;
        buffer[1] = P::REQUEST_CODE;
        buffer[2..4].fill(0);
        buffer[4..6].copy_from_slice(&self.ident.to_be_bytes());
        buffer[6..8].copy_from_slice(&self.seq_cnt.to_be_bytes());
        buffer[HEADER_SIZE..].copy_from_slice(self.payload);

        write_checksum(buffer);
        Ok(len)
    }

    pub fn to_bytes<P: Echo>(&self) -> EncodeResult<Vec<u8>> {
        let mut buffer = vec![0u8; self.len()];
        self.encode::<P>(&mut buffer)?;
        Ok(buffer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply<'a> {
    pub ident: u16,
    pub seq_cnt: u16,
    pub payload: &'a [u8],
}

impl<'a> EchoReply<'a> {
    /// Reads identifier, sequence and data of either echo type. `buffer`
    /// must hold at least `HEADER_SIZE` bytes.
    pub(super) fn decode_body(buffer: &'a [u8]) -> EchoReply<'a> {
        let ident = u16::from_be_bytes([buffer[4], buffer[5]]);
        let seq_cnt = u16::from_be_bytes([buffer[6], buffer[7]]);

        EchoReply {
            ident,
            seq_cnt,
            payload: &buffer[HEADER_SIZE..],
        }
    }
}
