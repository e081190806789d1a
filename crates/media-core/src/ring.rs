//! Fixed-size single-producer/single-consumer audio frame ring, laid out
//! directly in shared memory: a small header of head/tail atomics
//! followed by a fixed array of frame slots. No language-specific
//! synchronization primitive crosses the process boundary — only atomic
//! integers and the `head`/`tail` cursor protocol guard it, per this
//! engine's own design note that SHM coordination must not depend on one
//! process's view of a lock.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::shm::ShmRegion;
use crate::Result;

/// Bytes per audio frame slot (fits one 20 ms G.711 frame with room to
/// spare for other frame kinds the processors may emit).
pub const FRAME_SIZE: usize = 512;
/// Number of slots in the ring.
pub const DEFAULT_CAPACITY: usize = 2048;

const MAGIC: u32 = 0x4150_3852; // "AP8R"

#[repr(C)]
struct RingHeader {
    magic: AtomicU32,
    capacity: AtomicU32,
    frame_size: AtomicU32,
    _reserved: AtomicU32,
    head: AtomicU64,
    tail: AtomicU64,
    drops: AtomicU64,
    reads: AtomicU64,
}

/// Snapshot of a ring's lifetime counters, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub written: u64,
    pub read: u64,
    pub dropped: u64,
}

#[repr(C)]
struct Slot {
    len: AtomicU32,
    _pad: [u8; 4],
    data: [u8; FRAME_SIZE],
}

fn region_len(capacity: usize) -> usize {
    std::mem::size_of::<RingHeader>() + capacity * std::mem::size_of::<Slot>()
}

/// A shared-memory-backed ring of fixed-size audio frames. Cheap to
/// clone-by-reference (callers hold it behind an `Arc`); all operations
/// take `&self` since the ring's own atomics are the synchronization.
pub struct AudioRing {
    region: ShmRegion,
    capacity: u64,
}

impl AudioRing {
    /// Attach to (creating if necessary) the named ring. Whichever side
    /// arrives first zero-initializes the header; the other attaches
    /// without re-initializing, so open is idempotent across producer
    /// and consumer regardless of spawn order.
    pub fn open_or_create(name: &str, owns_unlink: bool) -> Result<Self> {
        let capacity = DEFAULT_CAPACITY;
        let region = ShmRegion::open_or_create(name, region_len(capacity), owns_unlink)?;
        let hdr = unsafe { Self::header(&region) };
        if hdr
            .magic
            .compare_exchange(0, MAGIC, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            hdr.capacity.store(capacity as u32, Ordering::Relaxed);
            hdr.frame_size.store(FRAME_SIZE as u32, Ordering::Relaxed);
            hdr.head.store(0, Ordering::Relaxed);
            hdr.tail.store(0, Ordering::Relaxed);
            hdr.drops.store(0, Ordering::Relaxed);
            hdr.reads.store(0, Ordering::Release);
        } else {
            while hdr.magic.load(Ordering::Acquire) != MAGIC {
                std::hint::spin_loop();
            }
        }
        Ok(AudioRing {
            region,
            capacity: capacity as u64,
        })
    }

    unsafe fn header(region: &ShmRegion) -> &RingHeader {
        &*(region.as_mut_ptr() as *const RingHeader)
    }

    unsafe fn slot(&self, idx: u64) -> &Slot {
        let base = self.region.as_mut_ptr().add(std::mem::size_of::<RingHeader>());
        &*((base as *const Slot).add(idx as usize))
    }

    /// Non-blocking single-producer write. Truncates `data` to
    /// [`FRAME_SIZE`]. When the ring is full, drops the oldest unread
    /// frame to make room — real-time freshness over completeness.
    ///
    /// A producer that overwrites a slot while the consumer is mid-read
    /// of that exact slot produces a torn frame rather than a crash; at
    /// `DEFAULT_CAPACITY` slots this requires the consumer to lag a full
    /// ring behind the producer (tens of seconds at 20 ms/frame), which
    /// only happens if the consumer has already stalled far past the
    /// point where audio freshness is lost anyway.
    pub fn write_frame(&self, data: &[u8]) {
        let hdr = unsafe { Self::header(&self.region) };
        let head = hdr.head.load(Ordering::Relaxed);
        let tail = hdr.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.capacity {
            hdr.tail.fetch_add(1, Ordering::Release);
            hdr.drops.fetch_add(1, Ordering::Relaxed);
        }

        let idx = head % self.capacity;
        let slot = unsafe { self.slot(idx) };
        let n = data.len().min(FRAME_SIZE);
        let dst = &slot.data as *const [u8; FRAME_SIZE] as *mut u8;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, n) };
        slot.len.store(n as u32, Ordering::Release);

        hdr.head.store(head.wrapping_add(1), Ordering::Release);
    }

    /// Non-blocking single-consumer read. Returns `None` (no frame)
    /// without blocking when the ring is empty; otherwise copies up to
    /// `out.len()` bytes of the next frame into `out` and returns the
    /// number of bytes copied.
    pub fn read_frame(&self, out: &mut [u8]) -> Option<usize> {
        let hdr = unsafe { Self::header(&self.region) };
        let tail = hdr.tail.load(Ordering::Relaxed);
        let head = hdr.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let idx = tail % self.capacity;
        let slot = unsafe { self.slot(idx) };
        let n = (slot.len.load(Ordering::Acquire) as usize).min(out.len());
        let src = &slot.data as *const [u8; FRAME_SIZE] as *const u8;
        unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), n) };

        hdr.tail.fetch_add(1, Ordering::Release);
        hdr.reads.fetch_add(1, Ordering::Relaxed);
        Some(n)
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Lifetime counters for diagnostics and tests: slots written, slots
    /// read, and frames dropped to make room in a full ring.
    pub fn stats(&self) -> RingStats {
        let hdr = unsafe { Self::header(&self.region) };
        RingStats {
            written: hdr.head.load(Ordering::Relaxed),
            read: hdr.reads.load(Ordering::Relaxed),
            dropped: hdr.drops.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!(
            "/whisper_test_{tag}_{}",
            std::process::id() as u64 * 1_000_003 + tag.len() as u64
        )
    }

    #[test]
    fn write_then_read_round_trips_bytes() {
        let name = unique_name("roundtrip");
        let ring = AudioRing::open_or_create(&name, true).unwrap();
        ring.write_frame(&[1, 2, 3, 4]);
        let mut out = [0u8; FRAME_SIZE];
        let n = ring.read_frame(&mut out).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn read_on_empty_ring_returns_none() {
        let name = unique_name("empty");
        let ring = AudioRing::open_or_create(&name, true).unwrap();
        let mut out = [0u8; FRAME_SIZE];
        assert!(ring.read_frame(&mut out).is_none());
    }

    #[test]
    fn oversized_write_is_truncated_to_frame_size() {
        let name = unique_name("oversize");
        let ring = AudioRing::open_or_create(&name, true).unwrap();
        let big = vec![0xABu8; FRAME_SIZE + 100];
        ring.write_frame(&big);
        let mut out = [0u8; FRAME_SIZE];
        let n = ring.read_frame(&mut out).unwrap();
        assert_eq!(n, FRAME_SIZE);
    }

    #[test]
    fn full_ring_drops_oldest_frame() {
        let name = unique_name("dropoldest");
        let ring = AudioRing::open_or_create(&name, true).unwrap();
        for i in 0..(DEFAULT_CAPACITY + 5) {
            ring.write_frame(&[(i % 256) as u8]);
        }
        let mut out = [0u8; FRAME_SIZE];
        let n = ring.read_frame(&mut out).unwrap();
        // The oldest 5 frames (values 0..5) should have been dropped; the
        // first readable frame is frame index 5.
        assert_eq!(n, 1);
        assert_eq!(out[0], 5);
    }

    #[test]
    fn stats_reflect_writes_reads_and_drops() {
        let name = unique_name("stats");
        let ring = AudioRing::open_or_create(&name, true).unwrap();
        for i in 0..(DEFAULT_CAPACITY + 3) {
            ring.write_frame(&[(i % 256) as u8]);
        }
        let mut out = [0u8; FRAME_SIZE];
        ring.read_frame(&mut out).unwrap();
        ring.read_frame(&mut out).unwrap();

        let stats = ring.stats();
        assert_eq!(stats.written, (DEFAULT_CAPACITY + 3) as u64);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.read, 2);
    }

    #[test]
    fn second_open_attaches_without_resetting_existing_data() {
        let name = unique_name("attach");
        let first = AudioRing::open_or_create(&name, false).unwrap();
        first.write_frame(&[9, 9, 9]);
        let second = AudioRing::open_or_create(&name, true).unwrap();
        let mut out = [0u8; FRAME_SIZE];
        let n = second.read_frame(&mut out).unwrap();
        assert_eq!(&out[..n], &[9, 9, 9]);
    }
}
