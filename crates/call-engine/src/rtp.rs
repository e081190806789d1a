//! RTP receive/send plumbing for one call (spec §4.3–§4.5): binds the
//! call's symmetric-RTP socket, runs the inbound receive thread, and
//! runs the outbound streamer's 20 ms tick loop. Both threads share the
//! call's socket and `RtpEndpoint` under one lock (spec §5).

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use whisper_media_core::{CallChannels, OutboundStreamer};
use whisper_rtp_core::codec::g711::{self, PT_PCMA};
use whisper_rtp_core::packet::RtpHeader;
use whisper_rtp_core::session::{packetize_and_send, RtpEndpoint};

use crate::line::RTP_PORT_BASE;

/// Socket receive timeout so the receiver thread observes `running`
/// (spec §5: "no thread blocks indefinitely on I/O").
const RECV_TIMEOUT: Duration = Duration::from_secs(1);
const TICK_INTERVAL: Duration = Duration::from_millis(20);

pub fn bind_rtp_socket(line_id: u32) -> std::io::Result<UdpSocket> {
    let port = RTP_PORT_BASE + line_id as u16;
    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    Ok(socket)
}

/// Body of the per-call RTP receive thread.
pub fn receive_loop(
    socket: Arc<UdpSocket>,
    endpoint: Arc<Mutex<RtpEndpoint>>,
    channels: Arc<CallChannels>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 2048];
    while running.load(Ordering::Acquire) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
            Err(e) => {
                warn!(%e, "rtp receive error");
                continue;
            }
        };
        if len < 12 {
            continue; // protocol parse failure: drop silently (spec §7)
        }
        let (header, payload) = match RtpHeader::parse(&buf[..len]) {
            Ok(v) => v,
            Err(_) => continue,
        };

        {
            let mut ep = endpoint.lock();
            ep.observe_inbound(from, header.payload_type);
        }

        if header.payload_type == PT_PCMA {
            let mut ulaw = vec![0u8; payload.len()];
            g711::alaw_buf_to_ulaw(payload, &mut ulaw);
            channels.push_inbound(&ulaw);
        } else {
            channels.push_inbound(payload);
        }
    }
    debug!("rtp receive loop exiting");
}

/// Body of the per-call outbound streamer thread: one 20 ms tick,
/// maintained with an absolute deadline so pacing does not drift (spec
/// §4.5).
pub fn streamer_loop(
    socket: Arc<UdpSocket>,
    endpoint: Arc<Mutex<RtpEndpoint>>,
    mut streamer: OutboundStreamer,
    running: Arc<AtomicBool>,
) {
    let mut deadline = Instant::now() + TICK_INTERVAL;
    while running.load(Ordering::Acquire) {
        let frame = streamer.next_frame();
        let destination = { endpoint.lock().destination() };
        if let Some(dest) = destination {
            let mut ep = endpoint.lock();
            let result = packetize_and_send(&mut ep, &frame, |packet| {
                socket.send_to(packet, dest).map(|_| ())
            });
            if let Err(e) = result {
                warn!(%e, "rtp send error");
            }
        }
        // Before the first inbound packet, outbound sends are suppressed
        // (spec §4.3) but the tick still advances so pacing is correct
        // once a destination is captured.
        let now = Instant::now();
        if now < deadline {
            std::thread::sleep(deadline - now);
        }
        deadline += TICK_INTERVAL;
    }
    debug!("outbound streamer loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtp_port_matches_line_id_offset() {
        let socket = bind_rtp_socket(1).unwrap();
        assert_eq!(socket.local_addr().unwrap().port(), 10_001);
    }
}
