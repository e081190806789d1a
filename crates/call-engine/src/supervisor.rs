//! Per-call process supervisor (spec §4.7): spawns the two audio
//! processor children next to the host binary, polls every 100 ms, and
//! relaunches whichever has exited using [`Backoff`].

use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::backoff::{Backoff, SUPERVISOR_MAX_BACKOFF, SUPERVISOR_MIN_BACKOFF};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorKind {
    Inbound,
    Outbound,
}

impl ProcessorKind {
    fn binary_name(self) -> &'static str {
        match self {
            ProcessorKind::Inbound => "inbound-audio-processor",
            ProcessorKind::Outbound => "outbound-audio-processor",
        }
    }
}

/// The live OS child handles for one call's two processors, shared
/// between the supervisor thread (which spawns/respawns) and teardown
/// code (which signals and reaps). Guarded by one lock per spec §5;
/// children are never joined/waited while holding it for longer than a
/// single non-blocking `try_wait`.
#[derive(Default)]
pub struct ProcessorChildren {
    pub inbound: Option<Child>,
    pub outbound: Option<Child>,
}

impl ProcessorChildren {
    fn slot(&mut self, kind: ProcessorKind) -> &mut Option<Child> {
        match kind {
            ProcessorKind::Inbound => &mut self.inbound,
            ProcessorKind::Outbound => &mut self.outbound,
        }
    }
}

fn processor_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn spawn_processor(kind: ProcessorKind, numeric_call_id: u64) -> std::io::Result<Child> {
    let program = processor_dir().join(kind.binary_name());
    Command::new(program)
        .arg("--call-id")
        .arg(numeric_call_id.to_string())
        .spawn()
}

/// Runs until `running` is cleared. Intended to be the body of one
/// dedicated thread per active call.
pub fn supervise(
    numeric_call_id: u64,
    children: Arc<Mutex<ProcessorChildren>>,
    running: Arc<AtomicBool>,
) {
    let mut backoffs = [
        (ProcessorKind::Inbound, Backoff::new(SUPERVISOR_MIN_BACKOFF, SUPERVISOR_MAX_BACKOFF)),
        (ProcessorKind::Outbound, Backoff::new(SUPERVISOR_MIN_BACKOFF, SUPERVISOR_MAX_BACKOFF)),
    ];

    while running.load(Ordering::Acquire) {
        for (kind, backoff) in backoffs.iter_mut() {
            let exited = {
                let mut guard = children.lock().unwrap();
                match guard.slot(*kind) {
                    Some(child) => matches!(child.try_wait(), Ok(Some(_)) | Err(_)),
                    None => true,
                }
            };
            if !exited {
                continue;
            }
            if !running.load(Ordering::Acquire) {
                break;
            }
            backoff.sleep();
            match spawn_processor(*kind, numeric_call_id) {
                Ok(child) => {
                    info!(call = numeric_call_id, kind = ?kind, "processor respawned");
                    *children.lock().unwrap().slot(*kind) = Some(child);
                    backoff.reset();
                }
                Err(err) => {
                    warn!(call = numeric_call_id, kind = ?kind, %err, backoff = ?backoff.current(), "processor spawn failed");
                }
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Spawns both processors for the first time at call setup.
pub fn spawn_initial(numeric_call_id: u64) -> std::io::Result<ProcessorChildren> {
    Ok(ProcessorChildren {
        inbound: Some(spawn_processor(ProcessorKind::Inbound, numeric_call_id)?),
        outbound: Some(spawn_processor(ProcessorKind::Outbound, numeric_call_id)?),
    })
}

/// Spec §4.7 shutdown: graceful terminate, poll every 50 ms for up to
/// 1 s, then force-kill and reap. Called only after the supervisor
/// thread has already been stopped and joined, so there is no relaunch
/// race.
pub fn terminate_all(children: &mut ProcessorChildren) {
    for child in [&mut children.inbound, &mut children.outbound] {
        if let Some(c) = child {
            terminate_one(c);
        }
        *child = None;
    }
}

fn terminate_one(child: &mut Child) {
    let pid = child.id() as i32;
    // SAFETY: SIGTERM is sent to a pid we own (this process spawned the
    // child and still holds its handle).
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let deadline = std::time::Instant::now() + SHUTDOWN_GRACE_PERIOD;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
            }
            Err(_) => return,
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_binary_names_match_the_child_process_interface() {
        assert_eq!(ProcessorKind::Inbound.binary_name(), "inbound-audio-processor");
        assert_eq!(ProcessorKind::Outbound.binary_name(), "outbound-audio-processor");
    }

    #[test]
    fn terminate_all_clears_both_slots_even_with_no_children() {
        let mut children = ProcessorChildren::default();
        terminate_all(&mut children);
        assert!(children.inbound.is_none());
        assert!(children.outbound.is_none());
    }
}
