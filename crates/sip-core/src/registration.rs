//! Client-side REGISTER transaction: build the initial REGISTER, and on
//! a 401/407 challenge, build the authenticated retry reusing the same
//! Call-ID with CSeq bumped to 2, per RFC 3261 REGISTER semantics.

use crate::auth::{authorization_header, parse_www_authenticate, DigestChallenge, DigestCredentials};
use crate::message::{header_value, Header, Method, Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Unregistered,
    Registering,
    Registered,
    Error,
}

#[derive(Debug)]
pub enum RegistrationOutcome {
    /// 2xx received; line is registered.
    Registered,
    /// 401/407 received; `retry` is the authenticated REGISTER to send next.
    ChallengeReceived { retry: Request },
    /// Anything else: non-2xx after authentication, or an unparsable
    /// challenge header.
    Failed { status: u16 },
}

/// One line's REGISTER transaction state. A fresh instance is created per
/// registration attempt so the Call-ID is stable across the challenge/
/// retry pair but does not leak into the next attempt.
#[derive(Debug)]
pub struct RegistrationTransaction {
    pub call_id: String,
    cseq: u32,
    server: String,
    username: String,
}

impl RegistrationTransaction {
    pub fn new(call_id: impl Into<String>, server: impl Into<String>, username: impl Into<String>) -> Self {
        RegistrationTransaction {
            call_id: call_id.into(),
            cseq: 0,
            server: server.into(),
            username: username.into(),
        }
    }

    /// The digest/request-line URI uses the bare server host, per spec
    /// (`HA2 = MD5(REGISTER:sip:<server-host>)`) — not `host:port`, even
    /// though `self.server` (used for the actual socket address) carries
    /// both.
    fn registrar_uri(&self) -> String {
        let host = self.server.split(':').next().unwrap_or(&self.server);
        format!("sip:{host}")
    }

    fn contact_uri(&self, local_ip: &str, local_port: u16) -> String {
        format!("sip:{}@{}:{}", self.username, local_ip, local_port)
    }

    /// Build the first (unauthenticated) REGISTER, CSeq 1.
    pub fn build_initial(&mut self, local_ip: &str, local_port: u16) -> Request {
        self.cseq = 1;
        self.build_register(local_ip, local_port, None)
    }

    fn build_register(&self, local_ip: &str, local_port: u16, auth: Option<Header>) -> Request {
        let registrar = self.registrar_uri();
        let contact = self.contact_uri(local_ip, local_port);
        let mut req = Request::new(Method::Register, registrar.clone());
        req.add_header(Header::new(
            "Via",
            format!("SIP/2.0/UDP {local_ip}:{local_port};rport"),
        ));
        req.add_header(Header::new("Max-Forwards", "70"));
        req.add_header(Header::new("From", format!("<{contact}>;tag=reg-{}", self.cseq)));
        req.add_header(Header::new("To", format!("<{contact}>")));
        req.add_header(Header::new("Call-ID", self.call_id.clone()));
        req.add_header(Header::new("CSeq", format!("{} REGISTER", self.cseq)));
        req.add_header(Header::new("Contact", format!("<{contact}>")));
        req.add_header(Header::new("Expires", "3600"));
        if let Some(auth) = auth {
            req.add_header(auth);
        }
        req.add_header(Header::new("Content-Length", "0"));
        req
    }

    /// Interpret a REGISTER response. On a challenge, builds the retry
    /// request (CSeq 2, same Call-ID, Authorization header computed from
    /// `creds`) ready to be sent.
    pub fn handle_response(
        &mut self,
        resp: &Response,
        local_ip: &str,
        local_port: u16,
        creds: &DigestCredentials<'_>,
    ) -> RegistrationOutcome {
        if resp.is_success() {
            return RegistrationOutcome::Registered;
        }
        if resp.is_challenge() {
            let challenge = header_value(&resp.headers, "WWW-Authenticate")
                .or_else(|| header_value(&resp.headers, "Proxy-Authenticate"))
                .and_then(|raw| parse_www_authenticate(raw).ok());
            let Some(challenge) = challenge else {
                return RegistrationOutcome::Failed {
                    status: resp.status_code,
                };
            };
            self.cseq = 2;
            let uri = self.registrar_uri();
            let auth_header = self.build_authorization(&challenge, creds, &uri);
            let retry = self.build_register(local_ip, local_port, Some(auth_header));
            return RegistrationOutcome::ChallengeReceived { retry };
        }
        RegistrationOutcome::Failed {
            status: resp.status_code,
        }
    }

    fn build_authorization(
        &self,
        challenge: &DigestChallenge,
        creds: &DigestCredentials<'_>,
        uri: &str,
    ) -> Header {
        authorization_header(challenge, creds, "REGISTER", uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_no_qop_matches_spec_scenario() {
        let mut txn = RegistrationTransaction::new("call-1", "10.0.0.1:5060", "1001");
        let initial = txn.build_initial("192.0.2.5", 5060);
        assert_eq!(initial.header("CSeq"), Some("1 REGISTER"));

        let mut challenge_resp = Response::new(401, "Unauthorized");
        challenge_resp.add_header(Header::new(
            "WWW-Authenticate",
            r#"Digest realm="pbx", nonce="abc""#,
        ));
        let creds = DigestCredentials {
            username: "1001",
            password: "secret",
        };
        match txn.handle_response(&challenge_resp, "192.0.2.5", 5060, &creds) {
            RegistrationOutcome::ChallengeReceived { retry } => {
                assert_eq!(retry.header("CSeq"), Some("2 REGISTER"));
                assert_eq!(retry.header("Call-ID"), Some("call-1"));
                let auth = retry.header("Authorization").unwrap();
                assert!(auth.starts_with("Digest username=\"1001\", realm=\"pbx\", nonce=\"abc\""));
                assert!(auth.contains("uri=\"sip:10.0.0.1\""));
                assert!(!auth.contains("qop="));
            }
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[test]
    fn register_qop_auth_matches_spec_scenario() {
        let mut txn = RegistrationTransaction::new("call-2", "10.0.0.1:5060", "1001");
        txn.build_initial("192.0.2.5", 5060);

        let mut challenge_resp = Response::new(401, "Unauthorized");
        challenge_resp.add_header(Header::new(
            "WWW-Authenticate",
            r#"Digest realm="pbx", nonce="abc", qop="auth""#,
        ));
        let creds = DigestCredentials {
            username: "1001",
            password: "secret",
        };
        match txn.handle_response(&challenge_resp, "192.0.2.5", 5060, &creds) {
            RegistrationOutcome::ChallengeReceived { retry } => {
                let auth = retry.header("Authorization").unwrap();
                assert!(auth.contains("qop=auth"));
                assert!(auth.contains("nc=00000001"));
                assert!(auth.contains("cnonce="));
            }
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[test]
    fn success_response_reports_registered() {
        let mut txn = RegistrationTransaction::new("call-3", "10.0.0.1:5060", "1001");
        txn.build_initial("192.0.2.5", 5060);
        let resp = Response::new(200, "OK");
        let creds = DigestCredentials {
            username: "1001",
            password: "secret",
        };
        assert!(matches!(
            txn.handle_response(&resp, "192.0.2.5", 5060, &creds),
            RegistrationOutcome::Registered
        ));
    }
}
