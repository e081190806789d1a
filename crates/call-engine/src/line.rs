//! Line config (external, persisted) and line state (in-memory,
//! registration-loop-owned) per spec §3.

use std::time::Instant;

/// Reserved RTP port base; a line's RTP port is always `RTP_PORT_BASE +
/// line_id`.
pub const RTP_PORT_BASE: u16 = 10_000;

#[derive(Debug, Clone)]
pub struct LineConfig {
    pub line_id: u32,
    pub username: String,
    pub password: String,
    pub server_host: String,
    pub server_port: u16,
    pub display_name: String,
    pub enabled: bool,
    pub status: String,
}

impl LineConfig {
    /// The RTP port this line's calls are bound to (spec §4.1: `10000 +
    /// line_id`).
    pub fn rtp_port(&self) -> u16 {
        RTP_PORT_BASE + self.line_id as u16
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// In-memory registration state for one line. Created on line load,
/// mutated only by the registration loop, dropped on shutdown.
#[derive(Debug, Clone)]
pub struct LineState {
    pub registered: bool,
    pub last_registration: Option<Instant>,
    pub last_published_status: Option<String>,
}

impl LineState {
    pub fn new() -> Self {
        LineState {
            registered: false,
            last_registration: None,
            last_published_status: None,
        }
    }

    /// Spec §4.2 refresh policy: re-register if the last successful
    /// registration is ≥30 minutes old (or there has never been one).
    pub fn needs_refresh(&self, now: Instant) -> bool {
        const REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30 * 60);
        match self.last_registration {
            None => true,
            Some(t) => now.duration_since(t) >= REFRESH_INTERVAL,
        }
    }

    /// Returns `true` (and records `status` as published) only if
    /// `status` differs from the last published value — spec §8
    /// Invariant 6 / Testable Scenario dedup requirement.
    pub fn should_publish(&mut self, status: &str) -> bool {
        if self.last_published_status.as_deref() == Some(status) {
            return false;
        }
        self.last_published_status = Some(status.to_string());
        true
    }
}

impl Default for LineState {
    fn default() -> Self {
        LineState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: u32) -> LineConfig {
        LineConfig {
            line_id: id,
            username: "1001".into(),
            password: "secret".into(),
            server_host: "10.0.0.1".into(),
            server_port: 5060,
            display_name: "Front Desk".into(),
            enabled: true,
            status: "disabled".into(),
        }
    }

    #[test]
    fn rtp_port_is_base_plus_line_id() {
        assert_eq!(line(1).rtp_port(), 10_001);
        assert_eq!(line(42).rtp_port(), 10_042);
    }

    #[test]
    fn fresh_state_needs_refresh() {
        let state = LineState::new();
        assert!(state.needs_refresh(Instant::now()));
    }

    #[test]
    fn recently_registered_does_not_need_refresh() {
        let mut state = LineState::new();
        state.last_registration = Some(Instant::now());
        assert!(!state.needs_refresh(Instant::now()));
    }

    #[test]
    fn status_publish_is_deduplicated() {
        let mut state = LineState::new();
        assert!(state.should_publish("connected"));
        assert!(!state.should_publish("connected"));
        assert!(state.should_publish("error"));
    }
}
