// 报文格式参考资料(相关 RFC ):
// ICMPv4: https://www.rfc-editor.org/pdfrfc/rfc792.txt.pdf

mod echo;
mod error;

use std::fmt::{self, Display};

pub use echo::{EchoReply, EchoRequest};
pub use error::{DecodeError, DecodeResult, EncodeError, EncodeResult};

pub struct IcmpV4;

pub const HEADER_SIZE: usize = 8;

/// ICMPv4 message types, named after the IANA registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpType {
    EchoReply,
    DestinationUnreachable,
    SourceQuench,
    Redirect,
    Echo,
    RouterAdvertisement,
    RouterSolicitation,
    TimeExceeded,
    ParameterProblem,
    Timestamp,
    TimestampReply,
    ExtendedEchoRequest,
    ExtendedEchoReply,
    Other(u8),
}

impl From<u8> for IcmpType {
    fn from(value: u8) -> Self {
        match value {
            0 => IcmpType::EchoReply,
            3 => IcmpType::DestinationUnreachable,
            4 => IcmpType::SourceQuench,
            5 => IcmpType::Redirect,
            8 => IcmpType::Echo,
            9 => IcmpType::RouterAdvertisement,
            10 => IcmpType::RouterSolicitation,
            11 => IcmpType::TimeExceeded,
            12 => IcmpType::ParameterProblem,
            13 => IcmpType::Timestamp,
            14 => IcmpType::TimestampReply,
            42 => IcmpType::ExtendedEchoRequest,
            43 => IcmpType::ExtendedEchoReply,
            other => IcmpType::Other(other),
        }
    }
}

impl Display for IcmpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IcmpType::EchoReply => "echo reply",
            IcmpType::DestinationUnreachable => "destination unreachable",
            IcmpType::SourceQuench => "source quench",
            IcmpType::Redirect => "redirect",
            IcmpType::Echo => "echo",
            IcmpType::RouterAdvertisement => "router advertisement",
            IcmpType::RouterSolicitation => "router solicitation",
            IcmpType::TimeExceeded => "time exceeded",
            IcmpType::ParameterProblem => "parameter problem",
            IcmpType::Timestamp => "timestamp",
            IcmpType::TimestampReply => "timestamp reply",
            IcmpType::ExtendedEchoRequest => "extended echo request",
            IcmpType::ExtendedEchoReply => "extended echo reply",
            IcmpType::Other(value) => return write!(f, "{}", value),
        };
        f.write_str(name)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum MessageBody<'a> {
    Echo(EchoReply<'a>),
    Raw(&'a [u8]),
}

/// Any inbound ICMPv4 message. Only the echo pair gets its body parsed.
#[derive(Debug, PartialEq, Eq)]
pub struct IcmpMessage<'a> {
    pub kind: IcmpType,
    pub code: u8,
    pub checksum: u16,
    pub body: MessageBody<'a>,
}

impl<'a> IcmpMessage<'a> {
    pub fn decode(buffer: &'a [u8]) -> DecodeResult<IcmpMessage<'a>> {
        if buffer.len() < HEADER_SIZE {
            return Err(DecodeError::InvalidSize(buffer.len()));
        }

        let kind = IcmpType::from(buffer[0]);
        let code = buffer[1];
        let checksum = u16::from_be_bytes([buffer[2], buffer[3]]);
        let body = match kind {
            IcmpType::Echo | IcmpType::EchoReply => {
                MessageBody::Echo(EchoReply::decode_body(buffer))
            }
            _ => MessageBody::Raw(&buffer[4..]),
        };

        Ok(IcmpMessage {
            kind,
            code,
            checksum,
            body,
        })
    }

    pub fn echo(&self) -> Option<&EchoReply<'a>> {
        match self.body {
            MessageBody::Echo(ref echo) => Some(echo),
            MessageBody::Raw(_) => None,
        }
    }
}

/// 校验和
fn get_checksum(buffer: &[u8]) -> u16 {
    let mut sum = 0u32;

    // 每两个字节相加, 奇数长度时最后一个字节补零
    for word in buffer.chunks(2) {
        let mut part = u16::from(word[0]) << 8;
        if word.len() > 1 {
            part += u16::from(word[1]);
        }
        sum = sum.wrapping_add(u32::from(part));
    }

    // 高 16 位折叠进低 16 位
    while (sum >> 16) > 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !sum as u16
}

/// Clears the checksum field and fills it in over the whole of `buffer`.
pub(crate) fn write_checksum(buffer: &mut [u8]) {
    buffer[2] = 0;
    buffer[3] = 0;
    let sum = get_checksum(buffer);
    buffer[2..4].copy_from_slice(&sum.to_be_bytes());
}

/// A message with an intact checksum sums to zero, checksum field included.
pub fn verify_checksum(buffer: &[u8]) -> bool {
    buffer.len() >= HEADER_SIZE && get_checksum(buffer) == 0
}
