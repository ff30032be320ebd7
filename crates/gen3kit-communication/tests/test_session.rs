//! Handshake behaviour: version polling, reset pulses, firmware
//! floors, and cancellation.

mod common;

use common::{frame, ok_frame, session_over, test_settings, MockPort};
use gen3kit_communication::session::SessionState;
use gen3kit_core::{Error, Version};
use std::sync::atomic::Ordering;

#[test]
fn test_handshake_immediate_reply() {
    let port = MockPort::new();
    let mut session = session_over(&port, test_settings());

    port.push_reply(Some(frame(&[0x81, 0x65, 0x00]))); // version 101
    port.push_reply(Some(ok_frame())); // INIT

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.firmware_version(), Some(Version::new(1, 1)));
    assert_eq!(port.dtr_pulses(), 0);

    // the VERSION request carries the host protocol version, 100
    let writes = port.writes();
    assert_eq!(writes[0].1, vec![0xD5, 0x03, 0x00, 0x64, 0x00, 0x61]);
    // followed by INIT
    assert_eq!(writes[1].1, frame(&[0x01]));
}

#[test]
fn test_handshake_resets_silent_device() {
    let port = MockPort::new();
    let mut session = session_over(&port, test_settings());

    port.push_reply(None); // first VERSION: silence
    port.push_reply(None); // second VERSION: silence
    port.push_reply(Some(frame(&[0x81, 0x65, 0x00])));
    port.push_reply(Some(ok_frame()));

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.firmware_version(), Some(Version::new(1, 1)));
    assert_eq!(port.dtr_pulses(), 2, "one reset pulse per timeout");
    assert_eq!(port.writes().len(), 4);
}

#[test]
fn test_handshake_retries_zero_version() {
    let port = MockPort::new();
    let mut session = session_over(&port, test_settings());

    port.push_reply(Some(frame(&[0x81, 0x00, 0x00]))); // still booting
    port.push_reply(Some(frame(&[0x81, 0x65, 0x00])));
    port.push_reply(Some(ok_frame()));

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    // a zero version is not a timeout, so no reset was pulsed
    assert_eq!(port.dtr_pulses(), 0);
}

#[test]
fn test_old_firmware_is_rejected() {
    let port = MockPort::new();
    let mut session = session_over(&port, test_settings());

    port.push_reply(Some(frame(&[0x81, 0x64, 0x00]))); // version 100 = 1.0

    let err = session.start().unwrap_err();
    match err {
        Error::BadFirmwareVersion { reported, minimum } => {
            assert_eq!(reported, Version::new(1, 0));
            assert_eq!(minimum, Version::new(1, 1));
        }
        other => panic!("expected BadFirmwareVersion, got {other}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn test_cancel_aborts_handshake() {
    let port = MockPort::new();
    let session = session_over(&port, test_settings());
    let cancel = session.cancel_flag();
    cancel.store(true, Ordering::Relaxed);

    let mut session = session;
    let err = session.start().unwrap_err();
    assert!(matches!(err, Error::Interrupted));
    assert_eq!(port.writes().len(), 0);
}

#[test]
fn test_dispose_is_idempotent() {
    let port = MockPort::new();
    let mut session = session_over(&port, test_settings());

    port.push_reply(Some(frame(&[0x81, 0x65, 0x00])));
    port.push_reply(Some(ok_frame()));
    session.start().unwrap();

    session.dispose();
    assert_eq!(session.state(), SessionState::Disposed);
    session.dispose();
    assert_eq!(session.state(), SessionState::Disposed);
}
