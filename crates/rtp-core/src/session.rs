//! Per-call RTP endpoint state: sequence/timestamp/SSRC bookkeeping and
//! the 20 ms packetizer that turns a μ-law buffer into a stream of RTP
//! packets.
//!
//! `RtpKey` replaces the "default" string sentinel the original design
//! used for the sessionless fallback slot with a real sum type, so a
//! lookup can never collide with a call whose id happens to be the
//! literal string `"default"`.

use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use crate::codec::g711::{self, PT_PCMA, PT_PCMU};
use crate::packet::{build_packet, RtpHeader};

/// 8 kHz mono audio, 20 ms per frame → 160 samples/bytes per frame.
pub const SAMPLES_PER_FRAME: usize = 160;

/// Light pacing sleep the packetizer applies between packets in a burst.
/// The 20 ms real-time cadence itself is enforced by the outbound
/// streamer, not here.
pub const PACKETIZER_INTER_PACKET_SLEEP: Duration = Duration::from_millis(1);

/// Identifies an RTP endpoint: either a specific call, or the sessionless
/// fallback used before any call has claimed a socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RtpKey {
    PerCall(String),
    Default,
}

impl RtpKey {
    pub fn for_call(call_id: impl Into<String>) -> Self {
        RtpKey::PerCall(call_id.into())
    }
}

/// Mutable per-call RTP state: sequence/timestamp counters, the fixed
/// SSRC, the symmetric-RTP destination captured from the first inbound
/// packet, and the mirrored outbound payload type.
#[derive(Debug, Clone)]
pub struct RtpEndpoint {
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    destination: Option<SocketAddr>,
    payload_type: u8,
}

impl RtpEndpoint {
    /// New endpoint with random initial sequence/timestamp/SSRC, PCMU as
    /// the default outbound payload type until the first inbound packet
    /// mirrors something else.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let ssrc = loop {
            let candidate: u32 = rng.gen();
            if candidate != 0 {
                break candidate;
            }
        };
        RtpEndpoint {
            sequence: rng.gen(),
            timestamp: rng.gen(),
            ssrc,
            destination: None,
            payload_type: PT_PCMU,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    pub fn has_destination(&self) -> bool {
        self.destination.is_some()
    }

    /// Called once per inbound RTP datagram. Captures the symmetric-RTP
    /// destination from the first packet only, and mirrors the inbound
    /// payload type as the outbound PT if it is PCMU or PCMA and this is
    /// the first packet observed.
    pub fn observe_inbound(&mut self, from: SocketAddr, inbound_pt: u8) {
        let first_packet = self.destination.is_none();
        if first_packet {
            self.destination = Some(from);
            if inbound_pt == PT_PCMU || inbound_pt == PT_PCMA {
                self.payload_type = inbound_pt;
            }
        }
    }

    /// Build the next outbound header (current counters), then advance
    /// sequence by 1 and timestamp by `SAMPLES_PER_FRAME`.
    fn next_header(&mut self) -> RtpHeader {
        let header = RtpHeader {
            payload_type: self.payload_type,
            marker: false,
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(SAMPLES_PER_FRAME as u32);
        header
    }
}

impl Default for RtpEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a μ-law buffer into 160-byte frames, transcodes to A-law if the
/// endpoint's mirrored payload type is PCMA, and hands each finished
/// packet to `send`. Sleeps `PACKETIZER_INTER_PACKET_SLEEP` between
/// packets within the same call to `packetize_and_send` (a light jitter
/// smoother for multi-frame bursts; the outbound streamer calls this with
/// one frame at a time under its own 20 ms cadence).
pub fn packetize_and_send<F>(
    endpoint: &mut RtpEndpoint,
    ulaw: &[u8],
    mut send: F,
) -> std::io::Result<()>
where
    F: FnMut(&[u8]) -> std::io::Result<()>,
{
    let mut alaw_scratch = [0u8; SAMPLES_PER_FRAME];
    let chunk_count = ulaw.chunks(SAMPLES_PER_FRAME).count();
    for (i, chunk) in ulaw.chunks(SAMPLES_PER_FRAME).enumerate() {
        let header = endpoint.next_header();
        let packet = if header.payload_type == PT_PCMA {
            let scratch = &mut alaw_scratch[..chunk.len()];
            g711::ulaw_buf_to_alaw(chunk, scratch);
            build_packet(&header, scratch)
        } else {
            build_packet(&header, chunk)
        };
        send(&packet)?;
        if i + 1 < chunk_count {
            std::thread::sleep(PACKETIZER_INTER_PACKET_SLEEP);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_and_timestamp_advance_by_fixed_steps() {
        let mut ep = RtpEndpoint::new();
        let ssrc = ep.ssrc();
        let first = ep.next_header();
        let second = ep.next_header();
        assert_eq!(second.sequence, first.sequence.wrapping_add(1));
        assert_eq!(second.timestamp, first.timestamp.wrapping_add(160));
        assert_eq!(first.ssrc, ssrc);
        assert_eq!(second.ssrc, ssrc);
    }

    #[test]
    fn ssrc_is_never_zero() {
        for _ in 0..100 {
            assert_ne!(RtpEndpoint::new().ssrc(), 0);
        }
    }

    #[test]
    fn first_inbound_packet_captures_destination_and_pt() {
        let mut ep = RtpEndpoint::new();
        let addr: SocketAddr = "127.0.0.1:5004".parse().unwrap();
        ep.observe_inbound(addr, PT_PCMA);
        assert_eq!(ep.destination(), Some(addr));
        assert_eq!(ep.payload_type(), PT_PCMA);

        // A later packet from a different address must not move the
        // already-captured destination (symmetric RTP locks to first sender).
        let other: SocketAddr = "127.0.0.1:6000".parse().unwrap();
        ep.observe_inbound(other, PT_PCMU);
        assert_eq!(ep.destination(), Some(addr));
        assert_eq!(ep.payload_type(), PT_PCMA);
    }

    #[test]
    fn unmirrored_payload_type_is_ignored() {
        let mut ep = RtpEndpoint::new();
        let addr: SocketAddr = "127.0.0.1:5004".parse().unwrap();
        ep.observe_inbound(addr, 101); // telephone-event, not mirrored
        assert_eq!(ep.payload_type(), PT_PCMU); // default unchanged
    }

    #[test]
    fn packetize_pcma_endpoint_transcodes_payload() {
        let mut ep = RtpEndpoint::new();
        ep.observe_inbound("127.0.0.1:5004".parse().unwrap(), PT_PCMA);
        let ulaw = vec![0xFFu8; 160];
        let mut sent = Vec::new();
        packetize_and_send(&mut ep, &ulaw, |pkt| {
            sent.push(pkt.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(sent.len(), 1);
        let (header, payload) = RtpHeader::parse(&sent[0]).unwrap();
        assert_eq!(header.payload_type, PT_PCMA);
        assert_eq!(payload.len(), 160);
        assert_eq!(payload[0], g711::ulaw_to_alaw(0xFF));
    }

    #[test]
    fn packetize_splits_multi_frame_buffers() {
        let mut ep = RtpEndpoint::new();
        let ulaw = vec![0xFFu8; 320];
        let mut sent = Vec::new();
        packetize_and_send(&mut ep, &ulaw, |pkt| {
            sent.push(pkt.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(sent.len(), 2);
        let (h0, _) = RtpHeader::parse(&sent[0]).unwrap();
        let (h1, _) = RtpHeader::parse(&sent[1]).unwrap();
        assert_eq!(h1.sequence, h0.sequence.wrapping_add(1));
        assert_eq!(h1.timestamp, h0.timestamp.wrapping_add(160));
    }
}
