//! # Kinetic
//!
//! A client engine for Kinetic key-value devices:
//! - Length-delimited 'F' frames with HMAC-SHA1 signed envelopes
//! - Sequence-based correlation of out-of-order responses
//! - Synchronous, threaded and cooperative (tokio) pipelining strategies
//! - Atomic batches, peer-to-peer push and device administration
//! - Zero-copy value transfer between files and the socket
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Client<S: Strategy> / AsyncClient           │
//! │        (get/put/delete, ranges, batches, push, admin)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Operation
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Operation Codec                          │
//! │         (typed request → Command, Reply → Outcome)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Request
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │  Strategy   │─────────►│  Correlator  │
//!   │ (send path) │          │ (seq → done) │
//!   └──────┬──────┘          └──────▲───────┘
//!          │                        │
//!          ▼                        │
//!   ┌───────────────────────────────┴──────┐
//!   │   Connection (TCP/TLS, handshake,    │
//!   │   frame codec, authenticator)        │
//!   └──────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use kinetic::{BlockingClient, ClientConfig};
//!
//! let client = BlockingClient::connect(ClientConfig::default())?;
//! client.put("greeting", "hello")?;
//! let entry = client.get("greeting")?;
//! assert_eq!(entry.map(|e| e.value_bytes().to_vec()), Some(b"hello".to_vec()));
//! # Ok::<(), kinetic::KineticError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod entry;
pub mod protocol;
pub mod operations;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KineticError, Result};
pub use config::{ClientConfig, ClientConfigBuilder, TlsOptions, TransferMode};
pub use entry::{Entry, EntryMetadata, KeyRange, PushKey, MAX_KEY_SIZE, MAX_VALUE_SIZE};
pub use operations::{DeleteOptions, LogReport, Operation, Outcome, PutOptions};
pub use network::{ConnectionState, Hooks};
pub use protocol::{LogType, Peer, StatusCode};
pub use client::{
    AsyncBatch, AsyncClient, Batch, BlockingClient, Client, Pending, Strategy, Synchronous,
    Threaded, ThreadedClient,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
