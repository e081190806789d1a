//! RTP transport and G.711 codec primitives: packet encode/decode, the
//! per-call endpoint/packetizer, and a μ-law WAV loader for the silence
//! and keepalive source.

pub mod codec;
pub mod error;
pub mod packet;
pub mod session;
pub mod wav;

pub use error::{Result, RtpError};
pub use packet::{build_packet, RtpHeader, RTP_HEADER_LEN};
pub use session::{packetize_and_send, RtpEndpoint, RtpKey, SAMPLES_PER_FRAME};
pub use wav::MulawWav;
