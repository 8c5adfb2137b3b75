//! Connection state
//!
//! ```text
//!                connect ok
//!  Disconnected ───────────► Connected ──── transport error ───► Faulted
//!       ▲                       │                                   │
//!       │                       │ close                             │
//!       │                       ▼                                   │
//!       └────────────────── Closing ◄───────────── close ───────────┘
//! ```
//!
//! Faulted is sticky: every call fails with the recorded error until the
//! connection is closed and a fresh one is made.

use parking_lot::Mutex;

use crate::error::{KineticError, Result};

/// Lifecycle state of one connection
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Faulted(KineticError),
    Closing,
}

/// Shared, lock-protected connection state
#[derive(Debug)]
pub struct StateCell {
    state: Mutex<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub fn get(&self) -> ConnectionState {
        self.state.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), ConnectionState::Connected)
    }

    /// Fail unless requests may be sent
    pub fn check_ready(&self) -> Result<()> {
        match &*self.state.lock() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(KineticError::NotConnected),
            ConnectionState::Faulted(err) => {
                Err(KineticError::ConnectionFaulted(Box::new(err.clone())))
            }
            ConnectionState::Closing => Err(KineticError::ConnectionClosed),
        }
    }

    /// Disconnected to Connected
    pub fn set_connected(&self) -> Result<()> {
        let mut state = self.state.lock();
        match &*state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connected;
                Ok(())
            }
            _ => Err(KineticError::AlreadyConnected),
        }
    }

    /// Record a fault. Returns false when the connection was not live, so
    /// only the first fault is reported.
    pub fn fault(&self, err: KineticError) -> bool {
        let mut state = self.state.lock();
        match &*state {
            ConnectionState::Connected | ConnectionState::Closing => {
                tracing::error!("Connection faulted: {}", err);
                *state = ConnectionState::Faulted(err);
                true
            }
            _ => false,
        }
    }

    /// Begin an orderly shutdown. Returns the previous state.
    pub fn begin_close(&self) -> ConnectionState {
        let mut state = self.state.lock();
        let previous = state.clone();
        if !matches!(previous, ConnectionState::Disconnected) {
            *state = ConnectionState::Closing;
        }
        previous
    }

    pub fn reset(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
    }

    /// The recorded fault, if any
    pub fn fault_error(&self) -> Option<KineticError> {
        match &*self.state.lock() {
            ConnectionState::Faulted(err) => Some(err.clone()),
            _ => None,
        }
    }
}
