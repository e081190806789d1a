//! Per-call aggregate (spec §9 design note: one owning value per call,
//! not a scattered pointer graph of threads/mutexes/SHM handles). Stored
//! in one `DashMap<CallId, Call>` so SIP-handler mutation and
//! many-reader access share a single lock discipline (spec §5).

use std::net::UdpSocket;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex as PLMutex;
use whisper_media_core::CallChannels;
use whisper_rtp_core::session::RtpEndpoint;

use crate::supervisor::ProcessorChildren;

pub type CallId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ringing,
    Active,
    Ended,
}

/// Everything one active call owns. Join handles are `Option` so
/// teardown can `.take()` them before joining — never joined while a
/// lock over the call map is held (spec §5 invariant).
pub struct Call {
    pub call_id: CallId,
    pub caller_id: i64,
    pub line_id: u32,
    pub number: String,
    pub status: CallStatus,
    pub start_time: Instant,
    pub rtp_port: u16,
    pub numeric_id: u64,

    pub socket: Arc<UdpSocket>,
    pub rtp_endpoint: Arc<PLMutex<RtpEndpoint>>,
    pub channels: Arc<CallChannels>,
    pub children: Arc<Mutex<ProcessorChildren>>,

    /// Three independent flags, one per thread kind, so teardown can
    /// stop-then-join them in the exact order spec §9 requires
    /// ("ordered supervisor → streamer → receiver") rather than
    /// collapsing them into one shared flag that would stop all three
    /// simultaneously.
    pub supervisor_running: Arc<AtomicBool>,
    pub streamer_running: Arc<AtomicBool>,
    pub receiver_running: Arc<AtomicBool>,

    pub receiver_handle: Option<JoinHandle<()>>,
    pub streamer_handle: Option<JoinHandle<()>>,
    pub supervisor_handle: Option<JoinHandle<()>>,
}

impl Call {
    pub fn mark_active(&mut self) {
        self.status = CallStatus::Active;
    }

    pub fn mark_ended(&mut self) {
        self.status = CallStatus::Ended;
    }

    /// Spec §4.1 BYE teardown, in the required order: stop the process
    /// supervisor first (preventing a relaunch race), terminate the
    /// processor children, stop the outbound streamer (so no keepalive
    /// tick survives BYE — resolves the §9 open question), then stop
    /// the RTP receiver. SHM release follows from `self` (and its
    /// `channels`) being dropped by the caller after this returns.
    pub fn teardown(&mut self) {
        self.supervisor_running.store(false, std::sync::atomic::Ordering::Release);
        if let Some(h) = self.supervisor_handle.take() {
            let _ = h.join();
        }

        crate::supervisor::terminate_all(&mut self.children.lock().unwrap());

        self.streamer_running.store(false, std::sync::atomic::Ordering::Release);
        if let Some(h) = self.streamer_handle.take() {
            let _ = h.join();
        }

        self.receiver_running.store(false, std::sync::atomic::Ordering::Release);
        if let Some(h) = self.receiver_handle.take() {
            let _ = h.join();
        }

        self.mark_ended();
    }
}
