//! Single-slot mutex/condvar rendezvous between the SIP listener thread
//! (producer, on receiving a `SIP/2.0 ...` response whose CSeq method is
//! `REGISTER`) and a line's registration loop (consumer, waiting on its
//! next `REGISTER`'s answer). Spec §5: "registration loop blocks on a
//! condition variable waiting for the listener to deliver a REGISTER
//! response (5 s timeout)".

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use whisper_sip_core::Response;

use crate::error::{EngineError, Result};

/// Pending REGISTER rendezvous slots, keyed by Call-ID. The SIP listener
/// looks a response's Call-ID up here and delivers it; the registration
/// loop registers a slot before sending and removes it after waiting.
pub type RegistrationRegistry = Arc<DashMap<String, Arc<RegistrationRendezvous>>>;

pub fn new_registry() -> RegistrationRegistry {
    Arc::new(DashMap::new())
}

#[derive(Default)]
pub struct RegistrationRendezvous {
    slot: Mutex<Option<Response>>,
    ready: Condvar,
}

impl RegistrationRendezvous {
    pub fn new() -> Self {
        RegistrationRendezvous {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Called by the SIP listener thread when a REGISTER response
    /// arrives for this line.
    pub fn deliver(&self, response: Response) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(response);
        self.ready.notify_one();
    }

    /// Called by the registration loop after sending a REGISTER. Blocks
    /// up to `timeout` for the listener to deliver a matching response.
    pub fn wait(&self, timeout: Duration) -> Result<Response> {
        let slot = self.slot.lock().unwrap();
        let (mut slot, result) = self
            .ready
            .wait_timeout_while(slot, timeout, |s| s.is_none())
            .unwrap();
        match slot.take() {
            Some(response) if !result.timed_out() => Ok(response),
            _ => Err(EngineError::RegistrationTimeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_times_out_with_no_delivery() {
        let rdv = RegistrationRendezvous::new();
        let result = rdv.wait(Duration::from_millis(50));
        assert!(result.is_err());
    }

    #[test]
    fn delivered_response_is_observed_by_waiter() {
        let rdv = Arc::new(RegistrationRendezvous::new());
        let rdv2 = Arc::clone(&rdv);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            rdv2.deliver(Response {
                status_code: 200,
                reason: "OK".to_string(),
                headers: Vec::new(),
                body: String::new(),
            });
        });
        let response = rdv.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(response.status_code, 200);
        handle.join().unwrap();
    }
}
