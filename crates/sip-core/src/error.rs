use thiserror::Error;

pub type Result<T> = std::result::Result<T, SipError>;

/// Errors surfaced by message parsing, rendering, and digest auth.
#[derive(Error, Debug)]
pub enum SipError {
    #[error("malformed SIP message: {0}")]
    Malformed(&'static str),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("unknown SIP method {0:?}")]
    UnknownMethod(String),

    #[error("malformed WWW-Authenticate/Proxy-Authenticate header: {0}")]
    MalformedChallenge(&'static str),

    #[error("malformed CSeq header: {0:?}")]
    MalformedCSeq(String),
}
