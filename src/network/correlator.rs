//! Request Correlator
//!
//! Matches responses to outstanding requests by sequence number.
//!
//! ## Pending table
//! ```text
//!   send(seq=7) ──► register(7, completion)      ┌───────────────────┐
//!   send(seq=8) ──► register(8, completion)      │ 7 → completion    │
//!                                                │ 8 → completion    │
//!   recv(ack=8) ──► take(8) ──► completion(Ok)   └───────────────────┘
//!   fault       ──► drain() ──► every completion(Err)
//! ```
//!
//! Entries are removed exactly once: by their response or by a fault.
//! Completions always run outside the table lock. `resolve` and `drain`
//! hand them back as [`Delivery`] values for callers that must also release
//! their own locks first.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{KineticError, Result};
use crate::protocol::{Reply, Status};

/// Callback invoked once with the response or the error that replaced it
pub type Completion = Box<dyn FnOnce(Result<Reply>) + Send + 'static>;

type StatusHook = Arc<dyn Fn(&Status) + Send + Sync + 'static>;
type UnhandledHook = Arc<dyn Fn(&str) + Send + Sync + 'static>;

// =============================================================================
// Hooks
// =============================================================================

/// Caller-supplied observability hooks
#[derive(Clone, Default)]
pub struct Hooks {
    on_unsolicited: Option<StatusHook>,
    on_unhandled: Option<UnhandledHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_unsolicited", &self.on_unsolicited.is_some())
            .field("on_unhandled", &self.on_unhandled.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive status frames the device sends on its own
    pub fn on_unsolicited(mut self, hook: impl Fn(&Status) + Send + Sync + 'static) -> Self {
        self.on_unsolicited = Some(Arc::new(hook));
        self
    }

    /// Receive failures nobody else can observe (a panicking completion)
    pub fn on_unhandled(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_unhandled = Some(Arc::new(hook));
        self
    }

    pub(crate) fn unsolicited(&self, status: &Status) {
        match &self.on_unsolicited {
            Some(hook) => hook(status),
            None => tracing::warn!(
                "Dropping unsolicited status {} {}",
                status.code,
                status.message
            ),
        }
    }

    pub(crate) fn unhandled(&self, message: &str) {
        match &self.on_unhandled {
            Some(hook) => hook(message),
            None => tracing::warn!("Unhandled error: {}", message),
        }
    }
}

// =============================================================================
// Correlator
// =============================================================================

/// Work taken out of the pending table, ready to run outside any lock
pub enum Delivery {
    Complete(Completion, Result<Reply>),
    Unsolicited(Status),
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Complete(_, result) => f.debug_tuple("Complete").field(&result.is_ok()).finish(),
            Delivery::Unsolicited(status) => f.debug_tuple("Unsolicited").field(status).finish(),
        }
    }
}

/// Pending-request table of one connection
pub struct Correlator {
    pending: Mutex<HashMap<u64, Completion>>,

    /// Signalled whenever the table becomes empty
    idle: Condvar,

    hooks: Hooks,
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl Correlator {
    pub fn new(hooks: Hooks) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            idle: Condvar::new(),
            hooks,
        }
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Record a completion for `sequence`. Must happen before the request
    /// hits the wire.
    pub fn register(&self, sequence: u64, completion: Completion) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&sequence) {
            return Err(KineticError::Protocol(format!(
                "sequence {} is already outstanding",
                sequence
            )));
        }
        pending.insert(sequence, completion);
        Ok(())
    }

    /// Remove an entry whose request never made it out
    pub fn cancel(&self, sequence: u64) -> Option<Completion> {
        let mut pending = self.pending.lock();
        let completion = pending.remove(&sequence);
        if pending.is_empty() {
            self.idle.notify_all();
        }
        completion
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, sequence: u64) -> bool {
        self.pending.lock().contains_key(&sequence)
    }

    pub fn is_idle(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Route one received reply
    ///
    /// An ack sequence with no pending entry is a protocol anomaly and is
    /// returned as an error for the caller to fault on.
    pub fn dispatch(&self, reply: Reply) -> Result<()> {
        if let Some(delivery) = self.resolve(reply)? {
            self.deliver(delivery);
        }
        Ok(())
    }

    /// Take the entry a reply answers without running it
    ///
    /// Callers holding a connection lock use this and [`Correlator::deliver`]
    /// once the lock is released, so a completion may call back into the
    /// client.
    pub fn resolve(&self, reply: Reply) -> Result<Option<Delivery>> {
        let sequence = match reply.ack_sequence() {
            Some(sequence) => sequence,
            None => {
                return match reply.status() {
                    Some(status) => Ok(Some(Delivery::Unsolicited(status.clone()))),
                    None => {
                        tracing::warn!("Dropping unsolicited frame without status");
                        Ok(None)
                    }
                };
            }
        };

        let completion = {
            let mut pending = self.pending.lock();
            let completion = pending.remove(&sequence);
            if pending.is_empty() {
                self.idle.notify_all();
            }
            completion
        };

        match completion {
            Some(completion) => {
                tracing::debug!("Completing sequence {}", sequence);
                Ok(Some(Delivery::Complete(completion, Ok(reply))))
            }
            None => {
                tracing::warn!("Response for unknown sequence {}", sequence);
                Err(KineticError::Protocol(format!(
                    "response for unknown sequence {}",
                    sequence
                )))
            }
        }
    }

    /// Fail every outstanding request with `err` and clear the table
    pub fn fail_all(&self, err: &KineticError) {
        for delivery in self.drain(err) {
            self.deliver(delivery);
        }
    }

    /// Clear the table, returning the failures still to be delivered
    pub fn drain(&self, err: &KineticError) -> Vec<Delivery> {
        let drained: Vec<(u64, Completion)> = {
            let mut pending = self.pending.lock();
            let drained = pending.drain().collect();
            self.idle.notify_all();
            drained
        };

        if !drained.is_empty() {
            tracing::debug!("Failing {} pending requests: {}", drained.len(), err);
        }
        drained
            .into_iter()
            .map(|(_, completion)| Delivery::Complete(completion, Err(err.clone())))
            .collect()
    }

    /// Run a completion or notify the unsolicited-status hook
    pub fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Complete(completion, result) => self.invoke(completion, result),
            Delivery::Unsolicited(status) => self.hooks.unsolicited(&status),
        }
    }

    /// Block until nothing is outstanding. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock();
        while !pending.is_empty() {
            match timeout {
                Some(timeout) => {
                    if self.idle.wait_for(&mut pending, timeout).timed_out() {
                        return pending.is_empty();
                    }
                }
                None => self.idle.wait(&mut pending),
            }
        }
        true
    }

    fn invoke(&self, completion: Completion, result: Result<Reply>) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(move || completion(result))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "completion panicked".to_string());
            self.hooks.unhandled(&message);
        }
    }
}
