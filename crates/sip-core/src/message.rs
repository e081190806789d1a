use std::fmt;

use crate::error::{Result, SipError};

/// SIP request methods this engine sends or dispatches on. `Other` carries
/// anything else so an unrecognized request can still be parsed, logged,
/// and dropped rather than rejected as unparsable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Notify,
    Options,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "REGISTER" => Method::Register,
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "NOTIFY" => Method::Notify,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Register => write!(f, "REGISTER"),
            Method::Invite => write!(f, "INVITE"),
            Method::Ack => write!(f, "ACK"),
            Method::Bye => write!(f, "BYE"),
            Method::Cancel => write!(f, "CANCEL"),
            Method::Notify => write!(f, "NOTIFY"),
            Method::Options => write!(f, "OPTIONS"),
            Method::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A parsed `CSeq` header: sequence number and the method token that
/// follows it. Kept as a structured value (not just the raw string)
/// because several call paths need to compare the method against the
/// request that is being responded to (e.g. a BYE's 200 OK must carry a
/// CSeq whose method is `BYE`, not the dialog's original `INVITE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub sequence: u32,
    pub method: Method,
}

impl CSeq {
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.trim().splitn(2, char::is_whitespace);
        let sequence = parts
            .next()
            .ok_or(SipError::MalformedCSeq(value.to_string()))?
            .parse::<u32>()
            .map_err(|_| SipError::MalformedCSeq(value.to_string()))?;
        let method = parts
            .next()
            .ok_or(SipError::MalformedCSeq(value.to_string()))?
            .trim();
        Ok(CSeq {
            sequence,
            method: Method::parse(method),
        })
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sequence, self.method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub type HeaderList = Vec<Header>;

/// Case-insensitive lookup of the first header matching `name`.
pub fn header_value<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// All headers matching `name`, in order, case-insensitive.
pub fn header_values<'a>(headers: &'a HeaderList, name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderList,
    pub body: String,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Request {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn cseq(&self) -> Result<CSeq> {
        let raw = self
            .header("CSeq")
            .ok_or(SipError::MissingHeader("CSeq"))?;
        CSeq::parse(raw)
    }

    pub fn add_header(&mut self, header: Header) -> &mut Self {
        self.headers.push(header);
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!("{} {} SIP/2.0\r\n", self.method, self.uri);
        for header in &self.headers {
            out.push_str(&format!("{}: {}\r\n", header.name, header.value));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub reason: String,
    pub headers: HeaderList,
    pub body: String,
}

impl Response {
    pub fn new(status_code: u16, reason: impl Into<String>) -> Self {
        Response {
            status_code,
            reason: reason.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn cseq(&self) -> Result<CSeq> {
        let raw = self
            .header("CSeq")
            .ok_or(SipError::MissingHeader("CSeq"))?;
        CSeq::parse(raw)
    }

    pub fn add_header(&mut self, header: Header) -> &mut Self {
        self.headers.push(header);
        self
    }

    pub fn set_body(&mut self, body: impl Into<String>) -> &mut Self {
        let body = body.into();
        self.add_header(Header::new("Content-Length", body.len().to_string()));
        self.body = body;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_challenge(&self) -> bool {
        self.status_code == 401 || self.status_code == 407
    }

    pub fn render(&self) -> String {
        let mut out = format!("SIP/2.0 {} {}\r\n", self.status_code, self.reason);
        for header in &self.headers {
            out.push_str(&format!("{}: {}\r\n", header.name, header.value));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Decide request vs. response from the first line (`SIP/2.0 ...` is
/// always a response; everything else is a request-line), then parse
/// headers up to the first blank line and the rest as the body.
pub fn parse_message(input: &str) -> Result<Message> {
    let mut lines = input.split("\r\n");
    let first = lines.next().ok_or(SipError::Malformed("empty message"))?;

    if first.starts_with("SIP/") {
        parse_response(first, lines)
    } else {
        parse_request(first, lines)
    }
}

fn parse_request<'a>(start_line: &str, lines: impl Iterator<Item = &'a str>) -> Result<Message> {
    let mut parts = start_line.split_whitespace();
    let method = parts.next().ok_or(SipError::Malformed("missing method"))?;
    let uri = parts.next().ok_or(SipError::Malformed("missing request-URI"))?;
    let version = parts.next().ok_or(SipError::Malformed("missing SIP version"))?;
    if !version.starts_with("SIP/2.0") {
        return Err(SipError::Malformed("unsupported SIP version"));
    }

    let mut req = Request::new(Method::parse(method), uri);
    let (headers, body) = parse_headers_and_body(lines)?;
    req.headers = headers;
    req.body = body;
    Ok(Message::Request(req))
}

fn parse_response<'a>(start_line: &str, lines: impl Iterator<Item = &'a str>) -> Result<Message> {
    let mut parts = start_line.splitn(3, ' ');
    let version = parts.next().ok_or(SipError::Malformed("missing SIP version"))?;
    if !version.starts_with("SIP/2.0") {
        return Err(SipError::Malformed("unsupported SIP version"));
    }
    let status_code = parts
        .next()
        .ok_or(SipError::Malformed("missing status code"))?
        .parse::<u16>()
        .map_err(|_| SipError::Malformed("status code not numeric"))?;
    let reason = parts.next().unwrap_or("").to_string();

    let mut resp = Response::new(status_code, reason);
    let (headers, body) = parse_headers_and_body(lines)?;
    resp.headers = headers;
    resp.body = body;
    Ok(Message::Response(resp))
}

fn parse_headers_and_body<'a>(
    mut lines: impl Iterator<Item = &'a str>,
) -> Result<(HeaderList, String)> {
    let mut headers = HeaderList::new();
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        let mut parts = line.splitn(2, ':');
        let name = parts.next().ok_or(SipError::Malformed("header name"))?;
        let value = parts
            .next()
            .ok_or(SipError::Malformed("header value"))?
            .trim();
        headers.push(Header::new(name, value));
    }

    let body = lines.collect::<Vec<_>>().join("\r\n");
    Ok((headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_headers_and_no_body() {
        let raw = "INVITE sip:100@example.com SIP/2.0\r\nVia: SIP/2.0/UDP host\r\nCall-ID: abc\r\n\r\n";
        match parse_message(raw).unwrap() {
            Message::Request(r) => {
                assert_eq!(r.method, Method::Invite);
                assert_eq!(r.uri, "sip:100@example.com");
                assert_eq!(r.header("Call-ID"), Some("abc"));
                assert!(r.body.is_empty());
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn parses_response_with_body() {
        let raw = "SIP/2.0 200 OK\r\nCSeq: 2 INVITE\r\nContent-Length: 5\r\n\r\nhello";
        match parse_message(raw).unwrap() {
            Message::Response(r) => {
                assert_eq!(r.status_code, 200);
                assert_eq!(r.reason, "OK");
                assert_eq!(r.body, "hello");
                assert!(r.is_success());
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn cseq_parses_sequence_and_method() {
        let cseq = CSeq::parse("2 REGISTER").unwrap();
        assert_eq!(cseq.sequence, 2);
        assert_eq!(cseq.method, Method::Register);
    }

    #[test]
    fn malformed_cseq_is_rejected_not_guessed() {
        assert!(CSeq::parse("not-a-number BYE").is_err());
        assert!(CSeq::parse("2").is_err());
    }

    #[test]
    fn unknown_method_parses_as_other_instead_of_erroring() {
        let raw = "PUBLISH sip:1@h SIP/2.0\r\n\r\n";
        match parse_message(raw).unwrap() {
            Message::Request(r) => assert_eq!(r.method, Method::Other("PUBLISH".to_string())),
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn render_round_trips_through_parse() {
        let mut req = Request::new(Method::Bye, "sip:100@example.com");
        req.add_header(Header::new("Call-ID", "xyz"));
        let rendered = req.render();
        match parse_message(&rendered).unwrap() {
            Message::Request(r) => {
                assert_eq!(r.method, Method::Bye);
                assert_eq!(r.header("Call-ID"), Some("xyz"));
            }
            _ => panic!("expected request"),
        }
    }
}
