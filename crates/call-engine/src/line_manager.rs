//! Line manager (spec §4.8): loads line configs from the external store,
//! runs the registration loop for each enabled line (or the single line
//! selected on the CLI), reloads the line list every 5 minutes, and
//! triggers a keepalive pass every 20 s.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, error, info, warn};

use whisper_rtp_core::session::RtpEndpoint;
use whisper_sip_core::registration::{RegistrationOutcome, RegistrationTransaction};
use whisper_sip_core::{DigestCredentials, Request};

use crate::line::{LineConfig, LineState};
use crate::rendezvous::{RegistrationRegistry, RegistrationRendezvous};
use crate::sip_socket::bind_reuseport;
use crate::store::Store;

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);
const REFRESH_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RELOAD_INTERVAL: Duration = Duration::from_secs(5 * 60);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

pub struct ManagedLine {
    pub config: Mutex<LineConfig>,
    pub state: Mutex<LineState>,
}

/// Resolve a SIP server host:port the way spec §4.2 requires: try a
/// direct dotted-quad parse first (`inet_pton`), fall back to full DNS
/// resolution (`getaddrinfo`) only if that fails.
fn resolve_server_addr(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address found"))
}

/// Discovers the local IP that would be used to reach `server`, by
/// connecting a throwaway UDP socket (no packets are actually sent by
/// `connect` on a datagram socket).
fn local_ip_for(server: SocketAddr) -> std::io::Result<IpAddr> {
    let probe = UdpSocket::bind(("0.0.0.0", 0))?;
    probe.connect(server)?;
    Ok(probe.local_addr()?.ip())
}

fn random_call_id() -> String {
    let mut rng = rand::thread_rng();
    format!("reg-{:016x}", rng.gen::<u64>())
}

fn send_request(socket: &UdpSocket, dest: SocketAddr, request: &Request) -> std::io::Result<()> {
    socket.send_to(request.render().as_bytes(), dest).map(|_| ())
}

/// Runs one full REGISTER attempt (challenge/retry included) for `line`,
/// updating `state` and publishing status to `store` on change.
fn register_once(
    line: &LineConfig,
    state: &mut LineState,
    listener_port: u16,
    registry: &RegistrationRegistry,
    store: &Store,
) {
    let outcome = (|| -> std::io::Result<RegistrationOutcome> {
        let server_addr = resolve_server_addr(&line.server_host, line.server_port)?;
        let local_ip = local_ip_for(server_addr)?;
        let socket = bind_reuseport(listener_port, None)?;

        let call_id = random_call_id();
        let rendezvous = Arc::new(RegistrationRendezvous::new());
        registry.insert(call_id.clone(), Arc::clone(&rendezvous));

        let mut txn = RegistrationTransaction::new(call_id.clone(), line.server_addr(), line.username.clone());
        let initial = txn.build_initial(&local_ip.to_string(), listener_port);
        send_request(&socket, server_addr, &initial)?;

        let first_response = rendezvous
            .wait(REGISTRATION_TIMEOUT)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::TimedOut, e.to_string()))?;

        let creds = DigestCredentials {
            username: &line.username,
            password: &line.password,
        };
        let outcome = txn.handle_response(&first_response, &local_ip.to_string(), listener_port, &creds);

        let outcome = match outcome {
            RegistrationOutcome::ChallengeReceived { retry } => {
                // Re-register the rendezvous slot for the authenticated
                // retry's response (same Call-ID, fresh slot).
                let rendezvous2 = Arc::new(RegistrationRendezvous::new());
                registry.insert(call_id.clone(), Arc::clone(&rendezvous2));
                send_request(&socket, server_addr, &retry)?;
                let second_response = rendezvous2
                    .wait(REGISTRATION_TIMEOUT)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::TimedOut, e.to_string()))?;
                if second_response.is_success() {
                    RegistrationOutcome::Registered
                } else {
                    RegistrationOutcome::Failed {
                        status: second_response.status_code,
                    }
                }
            }
            other => other,
        };
        registry.remove(&call_id);
        Ok(outcome)
    })();

    let status = match outcome {
        Ok(RegistrationOutcome::Registered) => {
            state.registered = true;
            state.last_registration = Some(Instant::now());
            "connected"
        }
        Ok(RegistrationOutcome::Failed { status }) => {
            state.registered = false;
            warn!(line_id = line.line_id, status, "registration failed");
            "error"
        }
        Ok(RegistrationOutcome::ChallengeReceived { .. }) => {
            // Unreachable: handled inline above, kept so the match stays exhaustive.
            state.registered = false;
            "error"
        }
        Err(e) => {
            error!(line_id = line.line_id, %e, "registration attempt failed");
            state.registered = false;
            "error"
        }
    };

    if state.should_publish(status) {
        if let Err(e) = store.update_sip_line_status(line.line_id, status) {
            error!(line_id = line.line_id, %e, "failed to publish line status");
        }
    }
}

/// The registration monitor thread (spec §5): one thread iterating
/// every enabled line, re-registering any whose 30-minute refresh
/// window has elapsed.
pub fn registration_monitor_loop(
    lines: Arc<Vec<ManagedLine>>,
    listener_port: u16,
    registry: RegistrationRegistry,
    store: Arc<Store>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        for line in lines.iter() {
            let config = line.config.lock().clone();
            if !config.enabled {
                let mut state = line.state.lock();
                state.registered = false;
                if state.should_publish("disabled") {
                    let _ = store.update_sip_line_status(config.line_id, "disabled");
                }
                continue;
            }
            let needs_refresh = {
                let state = line.state.lock();
                state.needs_refresh(Instant::now())
            };
            if needs_refresh {
                let mut state = line.state.lock();
                register_once(&config, &mut state, listener_port, &registry, &store);
            }
        }
        std::thread::sleep(REFRESH_POLL_INTERVAL);
    }
    debug!("registration monitor loop exiting");
}

/// The "mostly idle" SIP management loop (spec §5/§4.8): reloads the
/// line list from the store every 5 minutes.
pub fn reload_loop(lines: Arc<Vec<ManagedLine>>, store: Arc<Store>, running: Arc<AtomicBool>) {
    let mut next_reload = Instant::now() + RELOAD_INTERVAL;
    while running.load(Ordering::Acquire) {
        if Instant::now() >= next_reload {
            match store.get_all_sip_lines() {
                Ok(fresh) => {
                    for updated in fresh {
                        if let Some(existing) = lines.iter().find(|l| l.config.lock().line_id == updated.line_id) {
                            *existing.config.lock() = updated;
                        }
                    }
                    info!("line configuration reloaded");
                }
                Err(e) => error!(%e, "failed to reload line configuration"),
            }
            next_reload = Instant::now() + RELOAD_INTERVAL;
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Spec §4.8 keepalive pass: every 20 s, emit one silence RTP packet on
/// every currently bound RTP socket to its captured destination (a
/// no-op if no destination has been observed yet on that socket).
pub fn keepalive_loop(
    sockets: Arc<Mutex<Vec<(Arc<UdpSocket>, Arc<Mutex<RtpEndpoint>>)>>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        std::thread::sleep(KEEPALIVE_INTERVAL);
        if !running.load(Ordering::Acquire) {
            break;
        }
        let entries = sockets.lock().clone();
        for (socket, endpoint) in entries {
            let dest = endpoint.lock().destination();
            let Some(dest) = dest else { continue };
            let mut ep = endpoint.lock();
            let silence = vec![whisper_rtp_core::codec::g711::ULAW_SILENCE; whisper_rtp_core::session::SAMPLES_PER_FRAME];
            let result = whisper_rtp_core::session::packetize_and_send(&mut ep, &silence, |packet| {
                socket.send_to(packet, dest).map(|_| ())
            });
            if let Err(e) = result {
                warn!(%e, "keepalive send error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_server_addr_prefers_direct_ip_parse() {
        let addr = resolve_server_addr("10.0.0.1", 5060).unwrap();
        assert_eq!(addr, "10.0.0.1:5060".parse().unwrap());
    }

    #[test]
    fn resolve_server_addr_falls_back_to_dns_for_hostnames() {
        // "localhost" always resolves via the getaddrinfo path.
        let addr = resolve_server_addr("localhost", 5060);
        assert!(addr.is_ok());
    }
}
