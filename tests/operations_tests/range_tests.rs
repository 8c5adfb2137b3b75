//! Key Range Tests

use kinetic::{KeyRange, MAX_KEY_SIZE};

#[test]
fn test_inclusive_bounds() {
    let range = KeyRange::new("b", "d");
    assert!(range.contains(b"b"));
    assert!(range.contains(b"c"));
    assert!(range.contains(b"d"));
    assert!(!range.contains(b"a"));
    assert!(!range.contains(b"da"));
}

#[test]
fn test_exclusive_bounds() {
    let range = KeyRange::new("b", "d").with_bounds(false, false);
    assert!(!range.contains(b"b"));
    assert!(range.contains(b"ba"));
    assert!(!range.contains(b"d"));
}

#[test]
fn test_prefix_range() {
    let range = KeyRange::prefix("user:");
    assert_eq!(range.end_key, b"user;");
    assert!(range.contains(b"user:"));
    assert!(range.contains(b"user:42"));
    assert!(!range.contains(b"user;"));
    assert!(!range.contains(b"use"));
}

#[test]
fn test_prefix_with_trailing_ff() {
    let range = KeyRange::prefix(vec![0x01, 0xFF]);
    assert_eq!(range.end_key, vec![0x02]);
    assert!(range.contains(&[0x01, 0xFF, 0x00]));
    assert!(!range.contains(&[0x02]));
}

#[test]
fn test_all_ff_prefix_runs_to_end() {
    let range = KeyRange::prefix(vec![0xFF]);
    assert_eq!(range.end_key.len(), MAX_KEY_SIZE);
    assert!(range.contains(&[0xFF, 0xFF]));
}
