//! Transport-level behaviour against a scripted device: backpressure,
//! checksum failures, timeouts, and port-lock discipline.

mod common;

use common::{frame, ok_frame, MockPort};
use gen3kit_communication::packet::{encode_frame, RequestBuilder, ResponseCode};
use gen3kit_communication::serial::SerialLink;
use gen3kit_communication::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

fn transport_over(port: &MockPort) -> Transport {
    let link = SerialLink::from_port(Box::new(port.clone())).expect("mock link starts");
    Transport::new(link)
}

#[test]
fn test_simple_exchange() {
    let port = MockPort::new();
    let transport = transport_over(&port);

    port.push_reply(Some(frame(&[0x81, 0x2A])));
    let request = RequestBuilder::new(133).u32(1000).encode().unwrap();
    let mut response = transport.run_command(&request).unwrap();

    assert!(response.is_ok());
    assert_eq!(response.read_u8().unwrap(), 0x2A);
    assert_eq!(port.writes().len(), 1);
    assert_eq!(port.writes()[0].1, request);
}

#[test]
fn test_buffer_overflow_backpressure() {
    let port = MockPort::new();
    let transport = transport_over(&port);

    // the device refuses twice, then accepts
    port.push_reply(Some(frame(&[0x82])));
    port.push_reply(Some(frame(&[0x82])));
    port.push_reply(Some(ok_frame()));

    let request = RequestBuilder::new(129)
        .i32(1000)
        .i32(2000)
        .i32(3000)
        .u32(15000)
        .encode()
        .unwrap();
    let response = transport.run_command(&request).unwrap();
    assert!(response.is_ok());

    let writes = port.writes();
    assert_eq!(writes.len(), 3, "expected the same frame re-sent twice");
    for (_, bytes) in &writes {
        assert_eq!(*bytes, request);
    }
    // backoff between consecutive sends
    assert!(writes[1].0 - writes[0].0 >= Duration::from_millis(25));
    assert!(writes[2].0 - writes[1].0 >= Duration::from_millis(25));
}

#[test]
fn test_wire_crc_mismatch_is_an_error() {
    let port = MockPort::new();
    let transport = transport_over(&port);

    let mut reply = frame(&[0x81, 0x12]);
    let last = reply.len() - 2;
    reply[last] ^= 0x08; // corrupt a payload byte in transit
    port.push_reply(Some(reply));

    let request = RequestBuilder::new(4).encode().unwrap();
    let err = transport.run_command(&request).unwrap_err();
    assert!(err.to_string().contains("CRC mismatch"), "{err}");
    // no retransmit on checksum failure
    assert_eq!(port.writes().len(), 1);
}

#[test]
fn test_device_reported_crc_mismatch_is_returned() {
    let port = MockPort::new();
    let transport = transport_over(&port);

    port.push_reply(Some(frame(&[0x83])));
    let request = RequestBuilder::new(4).encode().unwrap();
    let response = transport.run_command(&request).unwrap();
    assert_eq!(response.code(), ResponseCode::CrcMismatch);
    assert_eq!(port.writes().len(), 1);
}

#[test]
fn test_timeout_when_device_is_silent() {
    let port = MockPort::new();
    let transport = transport_over(&port);
    transport.set_read_timeout(30);

    let request = RequestBuilder::new(0).u16(100).encode().unwrap();
    let err = transport.run_command(&request).unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

#[test]
fn test_recovers_after_leading_garbage() {
    let port = MockPort::new();
    let transport = transport_over(&port);

    port.inject(&[0x00, 0x17, 0x99]);
    port.push_reply(Some(ok_frame()));
    let request = RequestBuilder::new(1).encode().unwrap();
    let response = transport.run_command(&request).unwrap();
    assert!(response.is_ok());
}

#[test]
fn test_concurrent_commands_do_not_interleave() {
    let port = MockPort::new();
    let transport = Arc::new(transport_over(&port));

    const PER_THREAD: usize = 5;
    for _ in 0..PER_THREAD * 2 {
        port.push_reply(Some(ok_frame()));
    }

    let frame_a = encode_frame(&[133, 0xE8, 0x03, 0x00, 0x00]).unwrap();
    let frame_b = encode_frame(&[137, 0x87]).unwrap();

    let spawn = |frame: Vec<u8>| {
        let transport = transport.clone();
        std::thread::spawn(move || {
            for _ in 0..PER_THREAD {
                transport.run_command(&frame).unwrap();
            }
        })
    };
    let a = spawn(frame_a.clone());
    let b = spawn(frame_b.clone());
    a.join().unwrap();
    b.join().unwrap();

    let writes = port.writes();
    assert_eq!(writes.len(), PER_THREAD * 2);
    // every write is one complete frame, never a fragment of two
    let a_count = writes.iter().filter(|(_, w)| *w == frame_a).count();
    let b_count = writes.iter().filter(|(_, w)| *w == frame_b).count();
    assert_eq!(a_count, PER_THREAD);
    assert_eq!(b_count, PER_THREAD);
}
