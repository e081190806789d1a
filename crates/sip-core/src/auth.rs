//! HTTP Digest authentication (RFC 2617) as used by REGISTER challenge/
//! response, with and without `qop=auth`.

use md5::Digest;
use rand::Rng;

use crate::error::{Result, SipError};
use crate::message::Header;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub algorithm: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DigestCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Parse a `WWW-Authenticate` or `Proxy-Authenticate` header value of the
/// form `Digest realm="...", nonce="...", qop="auth", algorithm=MD5`.
pub fn parse_www_authenticate(input: &str) -> Result<DigestChallenge> {
    let mut parts = input.trim().splitn(2, ' ');
    let scheme = parts
        .next()
        .ok_or(SipError::MalformedChallenge("empty header"))?;
    if !scheme.eq_ignore_ascii_case("digest") {
        return Err(SipError::MalformedChallenge("scheme is not Digest"));
    }
    let params = parts
        .next()
        .ok_or(SipError::MalformedChallenge("missing challenge params"))?;

    let mut realm = None;
    let mut nonce = None;
    let mut qop = None;
    let mut algorithm = "MD5".to_string();

    for param in params.split(',') {
        let mut kv = param.trim().splitn(2, '=');
        let key = kv
            .next()
            .ok_or(SipError::MalformedChallenge("missing key"))?
            .trim();
        let value = kv
            .next()
            .ok_or(SipError::MalformedChallenge("missing value"))?
            .trim()
            .trim_matches('"');
        match key.to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value.to_string()),
            "nonce" => nonce = Some(value.to_string()),
            "qop" => qop = Some(value.to_string()),
            "algorithm" => algorithm = value.to_string(),
            _ => {}
        }
    }

    Ok(DigestChallenge {
        realm: realm.ok_or(SipError::MalformedChallenge("missing realm"))?,
        nonce: nonce.ok_or(SipError::MalformedChallenge("missing nonce"))?,
        qop,
        algorithm,
    })
}

/// Computed digest fields ready to render into an `Authorization` header:
/// the response hash, and — only when the challenge carried `qop=auth` —
/// the client nonce and nonce count that must accompany it.
pub struct DigestAnswer {
    pub response: String,
    pub qop_fields: Option<QopFields>,
}

pub struct QopFields {
    pub cnonce: String,
    pub nc: &'static str,
}

const NC_FIRST: &str = "00000001";

pub fn compute_digest_response(
    challenge: &DigestChallenge,
    creds: &DigestCredentials<'_>,
    method: &str,
    uri: &str,
) -> DigestAnswer {
    let ha1 = md5_hex(format!("{}:{}:{}", creds.username, challenge.realm, creds.password).as_bytes());
    let ha2 = md5_hex(format!("{method}:{uri}").as_bytes());

    let wants_qop_auth = challenge
        .qop
        .as_deref()
        .is_some_and(|q| q.split(',').any(|v| v.trim() == "auth"));

    if wants_qop_auth {
        let cnonce = random_hex_nonce();
        let response = md5_hex(
            format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, challenge.nonce, NC_FIRST, cnonce, ha2
            )
            .as_bytes(),
        );
        DigestAnswer {
            response,
            qop_fields: Some(QopFields {
                cnonce,
                nc: NC_FIRST,
            }),
        }
    } else {
        let response = md5_hex(format!("{}:{}:{}", ha1, challenge.nonce, ha2).as_bytes());
        DigestAnswer {
            response,
            qop_fields: None,
        }
    }
}

/// Render a complete `Authorization` header for the given challenge.
pub fn authorization_header(
    challenge: &DigestChallenge,
    creds: &DigestCredentials<'_>,
    method: &str,
    uri: &str,
) -> Header {
    let answer = compute_digest_response(challenge, creds, method, uri);
    let mut value = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
        creds.username, challenge.realm, challenge.nonce, uri, answer.response, challenge.algorithm
    );
    if let Some(qop) = answer.qop_fields {
        value.push_str(&format!(
            ", qop=auth, nc={}, cnonce=\"{}\"",
            qop.nc, qop.cnonce
        ));
    }
    Header::new("Authorization", value)
}

fn random_hex_nonce() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn md5_hex(data: &[u8]) -> String {
    let digest = md5::Md5::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_challenge_without_qop() {
        let chal = parse_www_authenticate(r#"Digest realm="pbx", nonce="abc""#).unwrap();
        assert_eq!(chal.realm, "pbx");
        assert_eq!(chal.nonce, "abc");
        assert_eq!(chal.qop, None);
        assert_eq!(chal.algorithm, "MD5");
    }

    #[test]
    fn parses_challenge_with_qop() {
        let chal =
            parse_www_authenticate(r#"Digest realm="pbx", nonce="abc", qop="auth", algorithm=MD5"#)
                .unwrap();
        assert_eq!(chal.qop.as_deref(), Some("auth"));
    }

    #[test]
    fn simple_digest_matches_reference_vector() {
        // RFC 2617 worked example (no qop).
        let challenge = DigestChallenge {
            realm: "testrealm@host.com".to_string(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".to_string(),
            qop: None,
            algorithm: "MD5".to_string(),
        };
        let creds = DigestCredentials {
            username: "Mufasa",
            password: "Circle Of Life",
        };
        let header = authorization_header(&challenge, &creds, "GET", "/dir/index.html");
        assert!(header.value.contains(r#"response="670fd8c2df070c60b045671b8b24ff02""#));
        assert!(!header.value.contains("qop="));
    }

    #[test]
    fn register_no_qop_response_matches_spec_vector() {
        let challenge = DigestChallenge {
            realm: "pbx".to_string(),
            nonce: "abc".to_string(),
            qop: None,
            algorithm: "MD5".to_string(),
        };
        let creds = DigestCredentials {
            username: "1001",
            password: "secret",
        };
        let answer = compute_digest_response(&challenge, &creds, "REGISTER", "sip:10.0.0.1");
        let ha1 = md5_hex(b"1001:pbx:secret");
        let ha2 = md5_hex(b"REGISTER:sip:10.0.0.1");
        let expected = md5_hex(format!("{ha1}:abc:{ha2}").as_bytes());
        assert_eq!(answer.response, expected);
        assert!(answer.qop_fields.is_none());
    }

    #[test]
    fn qop_auth_response_uses_nc_00000001_and_a_cnonce() {
        let challenge = DigestChallenge {
            realm: "pbx".to_string(),
            nonce: "abc".to_string(),
            qop: Some("auth".to_string()),
            algorithm: "MD5".to_string(),
        };
        let creds = DigestCredentials {
            username: "1001",
            password: "secret",
        };
        let answer = compute_digest_response(&challenge, &creds, "REGISTER", "sip:10.0.0.1");
        let qop = answer.qop_fields.expect("qop=auth challenge must produce qop fields");
        assert_eq!(qop.nc, "00000001");
        assert_eq!(qop.cnonce.len(), 16);

        let ha1 = md5_hex(b"1001:pbx:secret");
        let ha2 = md5_hex(b"REGISTER:sip:10.0.0.1");
        let expected = md5_hex(format!("{ha1}:abc:00000001:{}:auth:{ha2}", qop.cnonce).as_bytes());
        assert_eq!(answer.response, expected);
    }
}
