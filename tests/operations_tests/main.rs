//! Operations Tests
//!
//! Building requests from typed operations and parsing their responses.

mod range_tests;
