//! Shared-memory audio plane: the SPSC frame ring, the per-call named
//! channel pair, TTS dedup, and the outbound streamer's per-tick audio
//! source.

pub mod channel;
pub mod dedup;
pub mod error;
pub mod ring;
pub mod shm;
pub mod streamer;

pub use channel::CallChannels;
pub use dedup::TtsDedup;
pub use error::{MediaError, Result};
pub use ring::{AudioRing, RingStats, DEFAULT_CAPACITY, FRAME_SIZE};
pub use streamer::OutboundStreamer;
