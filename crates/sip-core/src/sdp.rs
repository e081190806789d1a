//! SDP answer construction for the 200 OK sent in response to INVITE.
//! The engine never negotiates codecs beyond offering PCMU/PCMA/telephone-
//! event and accepting whatever the peer sends; there is no generic SDP
//! parser here because nothing downstream reads the offer's body.

use std::net::IpAddr;

/// Render the fixed-shape SDP answer for a single audio stream at
/// `rtp_port` on `local_ip`.
pub fn build_answer(local_ip: IpAddr, rtp_port: u16) -> String {
    format!(
        "v=0\r\n\
         o=whisper 123456 654321 IN IP4 {local_ip}\r\n\
         s=Whisper Talk Session\r\n\
         c=IN IP4 {local_ip}\r\n\
         t=0 0\r\n\
         m=audio {rtp_port} RTP/AVP 0 8 101\r\n\
         a=rtpmap:0 PCMU/8000\r\n\
         a=rtpmap:8 PCMA/8000\r\n\
         a=rtpmap:101 telephone-event/8000\r\n\
         a=fmtp:101 0-15\r\n\
         a=sendrecv\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_matches_fixed_layout() {
        let ip: IpAddr = "192.0.2.10".parse().unwrap();
        let sdp = build_answer(ip, 10042);
        let expected = "v=0\r\n\
             o=whisper 123456 654321 IN IP4 192.0.2.10\r\n\
             s=Whisper Talk Session\r\n\
             c=IN IP4 192.0.2.10\r\n\
             t=0 0\r\n\
             m=audio 10042 RTP/AVP 0 8 101\r\n\
             a=rtpmap:0 PCMU/8000\r\n\
             a=rtpmap:8 PCMA/8000\r\n\
             a=rtpmap:101 telephone-event/8000\r\n\
             a=fmtp:101 0-15\r\n\
             a=sendrecv\r\n";
        assert_eq!(sdp, expected);
    }
}
