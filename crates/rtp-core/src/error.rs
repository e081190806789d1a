use thiserror::Error;

/// Result type alias for RTP operations.
pub type Result<T> = std::result::Result<T, RtpError>;

/// Errors surfaced by packetization, the codec tables, and the WAV loader.
#[derive(Error, Debug)]
pub enum RtpError {
    #[error("RTP packet too short: {len} bytes (need at least 12)")]
    PacketTooShort { len: usize },

    #[error("unsupported RTP payload type {pt}")]
    UnsupportedPayloadType { pt: u8 },

    #[error("WAV file error: {0}")]
    Wav(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
