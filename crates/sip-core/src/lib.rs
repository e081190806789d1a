//! SIP message model, digest authentication, SDP rendering, and the
//! REGISTER/INVITE/BYE/NOTIFY transaction shapes this engine needs.
//! Deliberately not a general-purpose RFC 3261 stack: only the subset
//! observed talking to a single PBX peer is implemented.

pub mod auth;
pub mod error;
pub mod message;
pub mod registration;
pub mod sdp;
pub mod transaction;

pub use auth::{authorization_header, compute_digest_response, DigestChallenge, DigestCredentials};
pub use error::{Result, SipError};
pub use message::{header_value, parse_message, CSeq, Header, HeaderList, Message, Method, Request, Response};
pub use registration::{RegistrationOutcome, RegistrationState, RegistrationTransaction};
