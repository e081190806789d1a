//! Suppresses re-emission of an identical TTS burst that shows up twice
//! in the outbound SHM within a short window (the processor occasionally
//! re-queues a buffer it already wrote, e.g. on its own internal retry).

use std::time::{Duration, Instant};

const DEDUP_WINDOW: Duration = Duration::from_secs(10);

/// FNV-1a-64, per the spec's required hash for the dedup key — not
/// security-sensitive, just a cheap way to fingerprint a short-lived
/// audio buffer.
fn fnv1a64(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[derive(Debug, Clone, Copy)]
struct LastEmission {
    hash: u64,
    size: usize,
    at: Instant,
}

/// Per-stream dedup state: remembers the most recent emitted buffer's
/// hash, size, and timestamp.
#[derive(Debug, Default)]
pub struct TtsDedup {
    last: Option<LastEmission>,
}

impl TtsDedup {
    pub fn new() -> Self {
        TtsDedup { last: None }
    }

    /// Returns `true` if `buf` should be emitted (first time seen, or
    /// the dedup window for an identical prior buffer has elapsed).
    /// Records the buffer as the new "last emission" whenever it returns
    /// `true`.
    pub fn should_emit(&mut self, buf: &[u8]) -> bool {
        let hash = fnv1a64(buf);
        let now = Instant::now();
        if let Some(last) = self.last {
            if last.hash == hash && last.size == buf.len() && now.duration_since(last.at) < DEDUP_WINDOW {
                return false;
            }
        }
        self.last = Some(LastEmission {
            hash,
            size: buf.len(),
            at: now,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_buffer_is_always_emitted() {
        let mut dedup = TtsDedup::new();
        assert!(dedup.should_emit(&[1, 2, 3]));
    }

    #[test]
    fn identical_buffer_within_window_is_suppressed() {
        let mut dedup = TtsDedup::new();
        let buf = vec![7u8; 320];
        assert!(dedup.should_emit(&buf));
        assert!(!dedup.should_emit(&buf));
    }

    #[test]
    fn different_size_is_not_treated_as_duplicate() {
        let mut dedup = TtsDedup::new();
        assert!(dedup.should_emit(&[1, 2, 3]));
        assert!(dedup.should_emit(&[1, 2, 3, 4]));
    }

    #[test]
    fn different_content_same_size_is_not_a_duplicate() {
        let mut dedup = TtsDedup::new();
        assert!(dedup.should_emit(&[1, 2, 3]));
        assert!(dedup.should_emit(&[9, 9, 9]));
    }
}
