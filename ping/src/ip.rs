// IPv4 Header (RFC 791)
//  |       0       |       1       |       2       |       3       |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |Version|  IHL  |Type of Service|          Total Length         |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |         Identification        |Flags|      Fragment Offset    |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |  Time to Live |    Protocol   |         Header Checksum       |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |                       Source Address                          |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |                    Destination Address                        |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//  |                    Options                    |    Padding    |
//  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

use std::net::Ipv4Addr;

use thiserror::Error;

pub const MIN_HEADER_SIZE: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid size: {0} bytes")]
    InvalidSize(usize),
    #[error("Invalid version: {0}")]
    InvalidVersion(u8),
    #[error("Invalid header length: {0} bytes")]
    InvalidHeaderLength(usize),
}

#[derive(Debug)]
pub struct IpV4Packet<'a> {
    pub ttl: u8,
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub data: &'a [u8],
}

impl<'a> IpV4Packet<'a> {
    /// Splits a raw socket datagram into its IPv4 header fields and the
    /// payload that follows the header (options skipped).
    pub fn decode(buffer: &'a [u8]) -> Result<IpV4Packet<'a>, Error> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::InvalidSize(buffer.len()));
        }

        let version = buffer[0] >> 4;
        if version != 4 {
            return Err(Error::InvalidVersion(version));
        }

        let header_len = usize::from(buffer[0] & 0x0f) * 4;
        if header_len < MIN_HEADER_SIZE || header_len > buffer.len() {
            return Err(Error::InvalidHeaderLength(header_len));
        }

        Ok(IpV4Packet {
            ttl: buffer[8],
            protocol: buffer[9],
            source: Ipv4Addr::new(buffer[12], buffer[13], buffer[14], buffer[15]),
            destination: Ipv4Addr::new(buffer[16], buffer[17], buffer[18], buffer[19]),
            data: &buffer[header_len..],
        })
    }
}
