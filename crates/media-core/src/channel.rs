//! Per-call named SHM channel pair: `/ap_in_<id>` (engine → processor,
//! inbound μ-law audio) and `/ap_out_<id>` (processor → engine, outbound
//! audio to stream to the caller).

use crate::ring::AudioRing;
use crate::Result;

fn inbound_name(call_numeric_id: u64) -> String {
    format!("/ap_in_{call_numeric_id}")
}

fn outbound_name(call_numeric_id: u64) -> String {
    format!("/ap_out_{call_numeric_id}")
}

/// Both SHM channels for one call. The engine creates these before
/// spawning the processor children and owns their teardown (`shm_unlink`
/// on drop) — the processors only attach.
pub struct CallChannels {
    pub inbound: AudioRing,
    pub outbound: AudioRing,
}

impl CallChannels {
    pub fn create(call_numeric_id: u64) -> Result<Self> {
        Ok(CallChannels {
            inbound: AudioRing::open_or_create(&inbound_name(call_numeric_id), true)?,
            outbound: AudioRing::open_or_create(&outbound_name(call_numeric_id), true)?,
        })
    }

    /// Push one inbound frame (RTP-derived μ-law audio) for the
    /// inbound-audio-processor to consume.
    pub fn push_inbound(&self, frame: &[u8]) {
        self.inbound.write_frame(frame);
    }

    /// Pop one outbound frame produced by the outbound-audio-processor,
    /// if any is available.
    pub fn pop_outbound(&self, out: &mut [u8]) -> Option<usize> {
        self.outbound.read_frame(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_follow_the_processor_contract() {
        assert_eq!(inbound_name(42), "/ap_in_42");
        assert_eq!(outbound_name(42), "/ap_out_42");
    }

    #[test]
    fn push_inbound_and_pop_outbound_are_independent_rings() {
        let channels = CallChannels::create(100_042).unwrap();
        channels.push_inbound(&[1, 2, 3]);
        let mut out = [0u8; crate::ring::FRAME_SIZE];
        assert!(channels.pop_outbound(&mut out).is_none());
    }
}
