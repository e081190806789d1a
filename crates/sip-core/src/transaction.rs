//! Server-side response construction for the requests this engine
//! answers as a UAS: INVITE, ACK (no response), BYE, and NOTIFY.
//!
//! There is no general dialog state machine here (the spec this engine
//! follows observes only a single INVITE/ACK/BYE flow per call from one
//! PBX); [`crate::message`] and [`crate::sdp`] do the structural work and
//! this module assembles the fixed header set each response needs.

use std::net::IpAddr;

use rand::Rng;

use crate::error::{Result, SipError};
use crate::message::{header_value, Header, Request};
use crate::sdp;

const ALLOW: &str = "INVITE, ACK, CANCEL, BYE, NOTIFY, REFER, MESSAGE, OPTIONS, INFO, SUBSCRIBE";
const SUPPORTED: &str = "replaces, timer";
const USER_AGENT: &str = "whisper-talk-sip/0.1";

/// Random-suffixed `tag-<hex>` for the To header of a 200 OK to INVITE.
pub fn generate_tag() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("tag-{suffix:08x}")
}

fn required_headers(req: &Request) -> Result<(&str, &str, &str, &str)> {
    let via = req.header("Via").ok_or(SipError::MissingHeader("Via"))?;
    let from = req.header("From").ok_or(SipError::MissingHeader("From"))?;
    let to = req.header("To").ok_or(SipError::MissingHeader("To"))?;
    let call_id = req
        .header("Call-ID")
        .ok_or(SipError::MissingHeader("Call-ID"))?;
    Ok((via, from, to, call_id))
}

/// `180 Ringing`, sent before the 200 OK for every INVITE.
pub fn build_ringing(req: &Request) -> Result<crate::message::Response> {
    non_dialog_response(req, 180, "Ringing")
}

/// `200 OK` to INVITE: carries the SDP answer, a freshly tagged To, a
/// Contact pointing back at this endpoint, and the capability headers
/// every response to INVITE in this engine advertises.
pub fn build_invite_ok(
    req: &Request,
    local_ip: IpAddr,
    sip_port: u16,
    username: &str,
    rtp_port: u16,
) -> Result<crate::message::Response> {
    let (via, from, to, call_id) = required_headers(req)?;
    let cseq = req.cseq()?;

    let mut resp = crate::message::Response::new(200, "OK");
    resp.add_header(Header::new("Via", via.to_string()));
    resp.add_header(Header::new("Call-ID", call_id.to_string()));
    resp.add_header(Header::new("CSeq", cseq.to_string()));
    resp.add_header(Header::new("From", from.to_string()));
    resp.add_header(Header::new("To", tagged_to(to)));
    resp.add_header(Header::new(
        "Contact",
        format!("<sip:{username}@{local_ip}:{sip_port}>"),
    ));
    resp.add_header(Header::new("Allow", ALLOW));
    resp.add_header(Header::new("Supported", SUPPORTED));
    resp.add_header(Header::new("User-Agent", USER_AGENT));
    resp.add_header(Header::new("Content-Type", "application/sdp"));
    resp.set_body(sdp::build_answer(local_ip, rtp_port));
    Ok(resp)
}

/// `200 OK` to BYE. The caller must have already checked that the
/// request's CSeq method is `BYE`; this function rejects it again as a
/// defensive parse-level check since a malformed/forged CSeq here would
/// otherwise be echoed straight back to the peer.
pub fn build_bye_ok(req: &Request) -> Result<crate::message::Response> {
    let cseq = req.cseq()?;
    if !matches!(cseq.method, crate::message::Method::Bye) {
        return Err(SipError::MalformedCSeq(cseq.to_string()));
    }
    non_dialog_response(req, 200, "OK")
}

/// `200 OK` to NOTIFY, echoing Via/From/To/Call-ID/CSeq back verbatim.
pub fn build_notify_ok(req: &Request) -> Result<crate::message::Response> {
    non_dialog_response(req, 200, "OK")
}

/// Shared shape for responses that do not establish a dialog (BYE,
/// NOTIFY, and provisional 180): copy Via/From/To/Call-ID/CSeq as-is and
/// set an explicit zero Content-Length.
fn non_dialog_response(req: &Request, status: u16, reason: &str) -> Result<crate::message::Response> {
    let (via, from, to, call_id) = required_headers(req)?;
    let cseq = req.cseq()?;

    let mut resp = crate::message::Response::new(status, reason);
    resp.add_header(Header::new("Via", via.to_string()));
    resp.add_header(Header::new("From", from.to_string()));
    resp.add_header(Header::new("To", to.to_string()));
    resp.add_header(Header::new("Call-ID", call_id.to_string()));
    resp.add_header(Header::new("CSeq", cseq.to_string()));
    resp.add_header(Header::new("Content-Length", "0"));
    Ok(resp)
}

fn tagged_to(to: &str) -> String {
    if to.to_ascii_lowercase().contains("tag=") {
        to.to_string()
    } else {
        format!("{to};{}", generate_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Method;

    fn sample_invite() -> Request {
        let mut req = Request::new(Method::Invite, "sip:1001@192.0.2.1");
        req.add_header(Header::new("Via", "SIP/2.0/UDP 192.0.2.5:5060;branch=z9hG4bK1"));
        req.add_header(Header::new("From", "<sip:2000@10.0.0.1>;tag=abc"));
        req.add_header(Header::new("To", "<sip:1001@192.0.2.1>"));
        req.add_header(Header::new("Call-ID", "call-xyz"));
        req.add_header(Header::new("CSeq", "1 INVITE"));
        req
    }

    #[test]
    fn invite_ok_has_sdp_and_tagged_to() {
        let req = sample_invite();
        let local_ip: IpAddr = "192.0.2.1".parse().unwrap();
        let resp = build_invite_ok(&req, local_ip, 5060, "1001", 10042).unwrap();
        assert_eq!(resp.status_code, 200);
        assert!(resp.header("To").unwrap().contains("tag="));
        assert!(resp.body.contains("m=audio 10042 RTP/AVP 0 8 101"));
        assert_eq!(resp.header("Allow"), Some(ALLOW));
        assert_eq!(resp.header("Content-Type"), Some("application/sdp"));
    }

    #[test]
    fn invite_ok_reuses_existing_to_tag_rather_than_adding_a_second() {
        let mut req = sample_invite();
        req.headers.retain(|h| h.name != "To");
        req.add_header(Header::new("To", "<sip:1001@192.0.2.1>;tag=already-here"));
        let local_ip: IpAddr = "192.0.2.1".parse().unwrap();
        let resp = build_invite_ok(&req, local_ip, 5060, "1001", 10042).unwrap();
        assert_eq!(resp.header("To").unwrap().matches("tag=").count(), 1);
    }

    #[test]
    fn bye_ok_rejects_invite_cseq_method() {
        let mut req = sample_invite();
        req.headers.retain(|h| h.name != "CSeq");
        req.add_header(Header::new("CSeq", "2 INVITE"));
        assert!(build_bye_ok(&req).is_err());
    }

    #[test]
    fn bye_ok_accepts_bye_cseq_method() {
        let mut req = sample_invite();
        req.headers.retain(|h| h.name != "CSeq");
        req.add_header(Header::new("CSeq", "2 BYE"));
        let resp = build_bye_ok(&req).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.header("Content-Length"), Some("0"));
    }

    #[test]
    fn notify_ok_echoes_dialog_headers() {
        let mut req = sample_invite();
        req.headers.retain(|h| h.name != "CSeq");
        req.add_header(Header::new("CSeq", "1 NOTIFY"));
        let resp = build_notify_ok(&req).unwrap();
        assert_eq!(resp.header("Call-ID"), Some("call-xyz"));
        assert_eq!(resp.header("Via"), req.header("Via"));
    }
}
