//! Client Tests
//!
//! Every strategy against an in-process device over real sockets.

#[path = "../common/mod.rs"]
mod common;

mod batch_tests;
mod cooperative_tests;
mod p2p_tests;
mod sync_tests;
mod threaded_tests;
mod transfer_tests;
