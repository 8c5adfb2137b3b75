//! Authentication Tests
//!
//! Tests for envelope sealing, verification and response checks.

use kinetic::network::open_frame;
use kinetic::protocol::{
    calculate_hmac, verify_hmac, AuthMode, AuthType, Authenticator, Body, Command, Envelope,
    KeyValue, MessageType, Status,
};
use kinetic::KineticError;

fn get_command(sequence: u64) -> Command {
    let mut command = Command::new(MessageType::Get, Body::KeyValue(KeyValue::with_key("k")));
    command.header.sequence = sequence;
    command
}

// =============================================================================
// HMAC Tests
// =============================================================================

#[test]
fn test_hmac_is_sha1_sized() {
    let digest = calculate_hmac(b"asdfasdf", b"command").unwrap();
    assert_eq!(digest.len(), 20);
}

#[test]
fn test_hmac_depends_on_secret() {
    assert_ne!(
        calculate_hmac(b"one", b"command").unwrap(),
        calculate_hmac(b"two", b"command").unwrap()
    );
}

#[test]
fn test_verify_rejects_flipped_byte() {
    let mut digest = calculate_hmac(b"asdfasdf", b"command").unwrap();
    assert!(verify_hmac(b"asdfasdf", b"command", &digest).is_ok());

    digest[3] ^= 0x01;
    assert!(matches!(
        verify_hmac(b"asdfasdf", b"command", &digest),
        Err(KineticError::Authentication(_))
    ));
}

// =============================================================================
// Envelope Tests
// =============================================================================

#[test]
fn test_seal_then_open() {
    let auth = Authenticator::new(1, b"asdfasdf".to_vec());
    let command = get_command(5);

    let envelope = auth.seal(&command, &AuthMode::Hmac).unwrap();
    assert_eq!(envelope.auth_type, AuthType::Hmac);
    assert_eq!(envelope.hmac_auth.as_ref().unwrap().identity, 1);

    let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
    assert_eq!(auth.open(&decoded).unwrap(), command);
}

#[test]
fn test_open_rejects_other_identity() {
    let device = Authenticator::new(2, b"asdfasdf".to_vec());
    let client = Authenticator::new(1, b"asdfasdf".to_vec());
    let envelope = device.seal(&get_command(1), &AuthMode::Hmac).unwrap();

    assert!(matches!(
        client.open(&envelope),
        Err(KineticError::Authentication(_))
    ));
}

#[test]
fn test_open_rejects_tampered_command() {
    let auth = Authenticator::new(1, b"asdfasdf".to_vec());
    let mut envelope = auth.seal(&get_command(1), &AuthMode::Hmac).unwrap();
    let last = envelope.command_bytes.len() - 1;
    envelope.command_bytes[last] ^= 0xFF;

    assert!(matches!(
        auth.open(&envelope),
        Err(KineticError::Authentication(_))
    ));
}

// =============================================================================
// Response Verification Tests
// =============================================================================

#[test]
fn test_signed_response_opens() {
    let auth = Authenticator::new(1, b"asdfasdf".to_vec());
    let response = get_command(9).response(Status::success(), Body::Empty);
    let envelope = auth.seal(&response, &AuthMode::Hmac).unwrap().to_bytes().unwrap();

    let reply = open_frame(&auth, &envelope, None).unwrap();
    assert_eq!(reply.ack_sequence(), Some(9));
    assert!(!reply.is_unsolicited());
}

#[test]
fn test_unsigned_status_without_ack_is_unsolicited() {
    let auth = Authenticator::new(1, b"asdfasdf".to_vec());
    let mut status = Command::new(MessageType::NoopResponse, Body::Empty);
    status.status = Some(Status::success());
    let envelope = Envelope::unsolicited(status.to_bytes().unwrap())
        .to_bytes()
        .unwrap();

    let reply = open_frame(&auth, &envelope, None).unwrap();
    assert!(reply.is_unsolicited());
}

#[test]
fn test_unsigned_response_is_rejected() {
    let auth = Authenticator::new(1, b"asdfasdf".to_vec());
    let response = get_command(9).response(Status::success(), Body::Empty);
    let envelope = Envelope::unsolicited(response.to_bytes().unwrap())
        .to_bytes()
        .unwrap();

    assert!(matches!(
        open_frame(&auth, &envelope, None),
        Err(KineticError::Authentication(_))
    ));
}
