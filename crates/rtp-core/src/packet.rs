//! Minimal RTP (RFC 3550) header encode/decode — just enough for a single
//! G.711 audio stream: version 2, no padding/extension/CSRC, one marker bit.

use crate::error::{Result, RtpError};

pub const RTP_HEADER_LEN: usize = 12;
const RTP_VERSION_BYTE: u8 = 0x80; // V=2, P=0, X=0, CC=0

/// A parsed (or about-to-be-built) RTP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Write this header into `out[0..12]`. Panics if `out` is shorter than 12 bytes.
    pub fn write(&self, out: &mut [u8]) {
        assert!(out.len() >= RTP_HEADER_LEN);
        out[0] = RTP_VERSION_BYTE;
        out[1] = (self.payload_type & 0x7F) | if self.marker { 0x80 } else { 0x00 };
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
    }

    /// Parse a header from the front of `buf`, returning the header and the
    /// remaining payload slice. Only the fields this engine cares about are
    /// decoded; extension headers and CSRC lists (if any) are skipped by
    /// the caller via the packet's CC field, which this single-peer engine
    /// never expects to be nonzero and does not attempt to parse.
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8])> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(RtpError::PacketTooShort { len: buf.len() });
        }
        let payload_type = buf[1] & 0x7F;
        let marker = buf[1] & 0x80 != 0;
        let sequence = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        Ok((
            RtpHeader {
                payload_type,
                marker,
                sequence,
                timestamp,
                ssrc,
            },
            &buf[RTP_HEADER_LEN..],
        ))
    }
}

/// Build a full RTP packet (header + payload) into a fresh `Vec<u8>`.
pub fn build_packet(header: &RtpHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; RTP_HEADER_LEN + payload.len()];
    header.write(&mut out[..RTP_HEADER_LEN]);
    out[RTP_HEADER_LEN..].copy_from_slice(payload);
    out
}
