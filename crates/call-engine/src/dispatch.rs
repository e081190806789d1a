//! SIP transaction handler (spec §4.1): the listener loop, request
//! dispatch (INVITE/ACK/BYE/NOTIFY), and response dispatch (REGISTER
//! rendezvous delivery). Owns the call lifecycle end to end — this is
//! where the per-call threads (receiver, streamer, supervisor) and
//! resources (SHM channels, processor children) named in [`crate::call`]
//! actually get created and torn down.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex as PLMutex;
use tracing::{debug, info, warn};

use whisper_media_core::{CallChannels, OutboundStreamer};
use whisper_rtp_core::session::RtpEndpoint;
use whisper_rtp_core::wav::MulawWav;
use whisper_sip_core::message::{Message, Method};
use whisper_sip_core::{transaction, Request};

use crate::call::{Call, CallId, CallStatus};
use crate::line_manager::ManagedLine;
use crate::rendezvous::RegistrationRegistry;
use crate::rtp;
use crate::stats::MalformedCounters;
use crate::store::Store;
use crate::supervisor;

/// Spec §4.1: "send 180 Ringing, wait 500 ms, send 200 OK".
const RINGING_DELAY: Duration = Duration::from_millis(500);
const SIP_RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub type ActiveCalls = Arc<DashMap<CallId, Call>>;

/// Bound RTP sockets currently eligible for the keepalive pass (spec
/// §4.8), shared with [`crate::line_manager::keepalive_loop`].
pub type KeepaliveSockets = Arc<PLMutex<Vec<(Arc<UdpSocket>, Arc<PLMutex<RtpEndpoint>>)>>>;

pub struct Endpoint {
    pub socket: Arc<UdpSocket>,
    pub sip_port: u16,
    pub local_ip: IpAddr,
    pub calls: ActiveCalls,
    pub lines: Arc<Vec<ManagedLine>>,
    pub store: Arc<Store>,
    pub registry: RegistrationRegistry,
    pub malformed: MalformedCounters,
    pub running: Arc<AtomicBool>,
    pub silence: Option<Arc<MulawWav>>,
    pub keepalive_sockets: KeepaliveSockets,
}

/// Pulls the user part out of a SIP URI or a header value containing
/// one (`"sip:1001@host"` → `"1001"`, tolerating surrounding `<...>` and
/// a trailing `;tag=...`).
fn extract_user(uri_or_header: &str) -> Option<String> {
    let start = uri_or_header.find("sip:")? + 4;
    let rest = &uri_or_header[start..];
    let end = rest.find(['@', '>', ';']).unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

/// Binds the SIP listener's own UDP socket with the read timeout the
/// listener loop needs to observe `running` (spec §5). Registration
/// sockets bind the same port separately via `sip_socket::bind_reuseport`.
pub fn bind_listener_socket(port: u16) -> std::io::Result<UdpSocket> {
    crate::sip_socket::bind_reuseport(port, Some(SIP_RECV_TIMEOUT))
}

impl Endpoint {
    pub fn new(
        socket: UdpSocket,
        sip_port: u16,
        local_ip: IpAddr,
        lines: Arc<Vec<ManagedLine>>,
        store: Arc<Store>,
        silence: Option<Arc<MulawWav>>,
    ) -> Self {
        Endpoint {
            socket: Arc::new(socket),
            sip_port,
            local_ip,
            calls: Arc::new(DashMap::new()),
            lines,
            store,
            registry: crate::rendezvous::new_registry(),
            malformed: MalformedCounters::new(),
            running: Arc::new(AtomicBool::new(true)),
            silence,
            keepalive_sockets: Arc::new(PLMutex::new(Vec::new())),
        }
    }

    /// Spawns the registration monitor, reload, and keepalive threads
    /// that accompany the listener loop (spec §5's thread list, minus the
    /// listener itself — callers run `listener_loop` on whichever thread
    /// they prefer, typically the one that called `new`). Takes `&Arc<Self>`
    /// rather than `&self` so each spawned thread can hold its own clone
    /// of the fields it needs without borrowing `endpoint` itself.
    pub fn spawn_background_threads(endpoint: &Arc<Endpoint>) -> Vec<std::thread::JoinHandle<()>> {
        let monitor = std::thread::spawn({
            let lines = Arc::clone(&endpoint.lines);
            let port = endpoint.sip_port;
            let registry = Arc::clone(&endpoint.registry);
            let store = Arc::clone(&endpoint.store);
            let running = Arc::clone(&endpoint.running);
            move || crate::line_manager::registration_monitor_loop(lines, port, registry, store, running)
        });
        let reload = std::thread::spawn({
            let lines = Arc::clone(&endpoint.lines);
            let store = Arc::clone(&endpoint.store);
            let running = Arc::clone(&endpoint.running);
            move || crate::line_manager::reload_loop(lines, store, running)
        });
        let keepalive = std::thread::spawn({
            let sockets = Arc::clone(&endpoint.keepalive_sockets);
            let running = Arc::clone(&endpoint.running);
            move || crate::line_manager::keepalive_loop(sockets, running)
        });
        vec![monitor, reload, keepalive]
    }

    /// Orderly shutdown: stop the background loops, then tear down every
    /// still-active call (same per-call ordering `Call::teardown` enforces
    /// for a single BYE).
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let call_ids: Vec<CallId> = self.calls.iter().map(|e| e.key().clone()).collect();
        for call_id in call_ids {
            if let Some((_, mut call)) = self.calls.remove(&call_id) {
                self.keepalive_sockets
                    .lock()
                    .retain(|(socket, _)| !Arc::ptr_eq(socket, &call.socket));
                call.teardown();
            }
        }
    }

    pub fn listener_loop(&self) {
        let mut buf = [0u8; 4096];
        while self.running.load(Ordering::Acquire) {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
                Err(e) => {
                    warn!(%e, "sip socket receive error");
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&buf[..len]).into_owned();
            match whisper_sip_core::parse_message(&text) {
                Ok(Message::Request(req)) => self.dispatch_request(req, from),
                Ok(Message::Response(resp)) => self.dispatch_response(resp),
                Err(e) => self.malformed.record(reason_for(&e)),
            }
        }
        debug!("sip listener loop exiting");
    }

    fn dispatch_request(&self, req: Request, from: SocketAddr) {
        match req.method {
            Method::Invite => self.handle_invite(&req, from),
            Method::Ack => {
                if let Some(call_id) = req.header("Call-ID") {
                    debug!(call_id, "ack received, call fully established");
                }
            }
            Method::Bye => self.handle_bye(&req, from),
            Method::Notify => self.handle_notify(&req, from),
            _ => debug!(method = %req.method, "unhandled SIP method, dropping"),
        }
    }

    fn dispatch_response(&self, resp: whisper_sip_core::message::Response) {
        let Ok(cseq) = resp.cseq() else {
            self.malformed.record("response-missing-cseq");
            return;
        };
        if cseq.method != Method::Register {
            debug!(status = resp.status_code, "dropping non-REGISTER response");
            return;
        }
        let Some(call_id) = resp.header("Call-ID") else {
            self.malformed.record("register-response-missing-call-id");
            return;
        };
        if let Some((_, rendezvous)) = self.registry.remove(call_id) {
            rendezvous.deliver(resp);
        }
    }

    fn handle_invite(&self, req: &Request, from: SocketAddr) {
        let Some(call_id) = req.header("Call-ID").map(str::to_string) else {
            self.malformed.record("invite-missing-call-id");
            return;
        };

        if let Some(existing) = self.calls.get(&call_id) {
            if existing.status == CallStatus::Active {
                // §9 open question resolution: re-derive, don't cache raw
                // bytes — rebuild the identical 200 OK from the existing
                // call's already-assigned RTP port and line identity.
                let username = self
                    .lines
                    .iter()
                    .find(|l| l.config.lock().line_id == existing.line_id)
                    .map(|l| l.config.lock().username.clone())
                    .unwrap_or_default();
                if let Ok(resp) = transaction::build_invite_ok(
                    req,
                    self.local_ip,
                    self.sip_port,
                    &username,
                    existing.rtp_port,
                ) {
                    let _ = self.socket.send_to(resp.render().as_bytes(), from);
                }
            }
            return; // Invariant 4: never more than one call record per Call-ID.
        }

        let Some(to) = req.header("To") else {
            self.malformed.record("invite-missing-to");
            return;
        };
        let Some(username) = extract_user(to) else {
            self.malformed.record("invite-unparseable-to-uri");
            return;
        };
        let Some(line_index) = self.lines.iter().position(|l| l.config.lock().username == username) else {
            warn!(username, "invite for unknown line, dropping");
            return;
        };
        let line = self.lines[line_index].config.lock().clone();

        let number = req
            .header("From")
            .and_then(extract_user)
            .unwrap_or_else(|| "unknown".to_string());

        if let Ok(ringing) = transaction::build_ringing(req) {
            let _ = self.socket.send_to(ringing.render().as_bytes(), from);
        }
        std::thread::sleep(RINGING_DELAY);

        if let Err(e) = self.setup_call(&call_id, &line, &number, req, from) {
            warn!(call_id, %e, "call setup failed");
        }
    }

    fn setup_call(
        &self,
        call_id: &str,
        line: &crate::line::LineConfig,
        number: &str,
        req: &Request,
        from: SocketAddr,
    ) -> std::io::Result<()> {
        let caller_id = self
            .store
            .get_or_create_caller(number)
            .map_err(to_io_error)?;
        let numeric_id = self
            .store
            .create_call(call_id, caller_id, line.line_id, number)
            .map_err(to_io_error)?;

        let rtp_socket = Arc::new(rtp::bind_rtp_socket(line.line_id)?);
        let channels = Arc::new(CallChannels::create(numeric_id).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?);
        let endpoint = Arc::new(PLMutex::new(RtpEndpoint::new()));
        let children = Arc::new(StdMutex::new(supervisor::spawn_initial(numeric_id)?));

        let supervisor_running = Arc::new(AtomicBool::new(true));
        let streamer_running = Arc::new(AtomicBool::new(true));
        let receiver_running = Arc::new(AtomicBool::new(true));

        let receiver_handle = std::thread::spawn({
            let socket = Arc::clone(&rtp_socket);
            let endpoint = Arc::clone(&endpoint);
            let channels = Arc::clone(&channels);
            let running = Arc::clone(&receiver_running);
            move || rtp::receive_loop(socket, endpoint, channels, running)
        });

        let streamer_handle = std::thread::spawn({
            let socket = Arc::clone(&rtp_socket);
            let endpoint = Arc::clone(&endpoint);
            let streamer = OutboundStreamer::new(Arc::clone(&channels), self.silence.clone());
            let running = Arc::clone(&streamer_running);
            move || rtp::streamer_loop(socket, endpoint, streamer, running)
        });

        let supervisor_handle = std::thread::spawn({
            let children = Arc::clone(&children);
            let running = Arc::clone(&supervisor_running);
            move || supervisor::supervise(numeric_id, children, running)
        });

        // Spec §3: "created on INVITE, transitions ringing → active on
        // sending 200 OK" — the record is inserted in `Ringing` status
        // before the 200 OK goes out, then flipped to `Active` right
        // after the send succeeds, so `Ringing` is an observable state
        // rather than a skipped one.
        let call = Call {
            call_id: call_id.to_string(),
            caller_id,
            line_id: line.line_id,
            number: number.to_string(),
            status: CallStatus::Ringing,
            start_time: Instant::now(),
            rtp_port: line.rtp_port(),
            numeric_id,
            socket: rtp_socket,
            rtp_endpoint: endpoint,
            channels,
            children,
            supervisor_running,
            streamer_running,
            receiver_running,
            receiver_handle: Some(receiver_handle),
            streamer_handle: Some(streamer_handle),
            supervisor_handle: Some(supervisor_handle),
        };
        self.keepalive_sockets
            .lock()
            .push((Arc::clone(&call.socket), Arc::clone(&call.rtp_endpoint)));
        self.calls.insert(call_id.to_string(), call);

        let resp = transaction::build_invite_ok(req, self.local_ip, self.sip_port, &line.username, line.rtp_port())
            .map_err(to_io_error)?;
        self.socket.send_to(resp.render().as_bytes(), from)?;

        if let Some(mut call) = self.calls.get_mut(call_id) {
            call.mark_active();
        }
        info!(call_id, line_id = line.line_id, numeric_id, "call established");
        Ok(())
    }

    fn handle_bye(&self, req: &Request, from: SocketAddr) {
        let resp = match transaction::build_bye_ok(req) {
            Ok(resp) => resp,
            Err(_) => {
                self.malformed.record("bye-malformed-cseq");
                return;
            }
        };
        let _ = self.socket.send_to(resp.render().as_bytes(), from);

        let Some(call_id) = req.header("Call-ID") else {
            return;
        };
        if let Some((_, mut call)) = self.calls.remove(call_id) {
            self.keepalive_sockets
                .lock()
                .retain(|(socket, _)| !Arc::ptr_eq(socket, &call.socket));
            call.teardown();
            if let Err(e) = self.store.end_call(call_id) {
                warn!(call_id, %e, "failed to notify store of call end");
            }
            info!(call_id, "call torn down");
        }
    }

    fn handle_notify(&self, req: &Request, from: SocketAddr) {
        match transaction::build_notify_ok(req) {
            Ok(resp) => {
                let _ = self.socket.send_to(resp.render().as_bytes(), from);
            }
            Err(_) => self.malformed.record("notify-missing-headers"),
        }
    }
}

fn to_io_error<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

fn reason_for(e: &whisper_sip_core::SipError) -> &'static str {
    match e {
        whisper_sip_core::SipError::Malformed(_) => "malformed",
        whisper_sip_core::SipError::MissingHeader(_) => "missing-header",
        whisper_sip_core::SipError::UnknownMethod(_) => "unknown-method",
        whisper_sip_core::SipError::MalformedChallenge(_) => "malformed-challenge",
        whisper_sip_core::SipError::MalformedCSeq(_) => "malformed-cseq",
    }
}
