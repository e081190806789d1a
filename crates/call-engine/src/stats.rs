//! Lightweight in-memory counters for malformed/unparseable SIP
//! datagrams, surfaced via `tracing` rather than silently vanishing
//! (SPEC_FULL.md §4.1 supplement) — the datagram itself is still
//! dropped per spec §7, this only makes the drop observable.

use dashmap::DashMap;
use tracing::warn;

#[derive(Default)]
pub struct MalformedCounters {
    by_reason: DashMap<&'static str, u64>,
}

impl MalformedCounters {
    pub fn new() -> Self {
        MalformedCounters::default()
    }

    pub fn record(&self, reason: &'static str) {
        let mut count = self.by_reason.entry(reason).or_insert(0);
        *count += 1;
        warn!(reason, total = *count, "dropped malformed SIP datagram");
    }

    pub fn count(&self, reason: &str) -> u64 {
        self.by_reason.get(reason).map(|c| *c).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_reason() {
        let counters = MalformedCounters::new();
        counters.record("missing-call-id");
        counters.record("missing-call-id");
        counters.record("parse-error");
        assert_eq!(counters.count("missing-call-id"), 2);
        assert_eq!(counters.count("parse-error"), 1);
    }
}
