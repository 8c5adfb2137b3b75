//! Network Module
//!
//! Device connections and the machinery shared by every client strategy.
//!
//! ## Request path
//! ```text
//!   Request ──► Sequencer (sequence, connection id, cluster version)
//!           ──► Authenticator (HMAC or PIN envelope)
//!           ──► frame write
//!
//!   frame read ──► Authenticator (verify) ──► Correlator (ack sequence)
//!              ──► completion(Result<Reply>)
//! ```
//!
//! ## Components
//! - [`Connection`]: socket, TLS, handshake, sequencing, frame I/O
//! - [`Correlator`]: pending-request table keyed by sequence
//! - [`StateCell`]: connected / faulted / closing lifecycle
//! - [`DeferredValue`]: values left on the socket for zero-copy consumers

mod connection;
mod correlator;
mod handshake;
mod state;
mod tls;
mod transfer;

pub use connection::{open_frame, Connection, FrameReader, FrameWriter, Sealed, Sequencer, Stream};
pub use correlator::{Completion, Correlator, Delivery, Hooks};
pub use handshake::Handshake;
pub use state::{ConnectionState, StateCell};
pub use transfer::{copy_exact, DeferredValue, ValueGate};
