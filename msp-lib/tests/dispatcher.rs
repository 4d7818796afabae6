//! Request correlation, timeouts and the adaptive timeout window

mod common;

use common::*;

#[test]
fn test_send_on_unconnected_link_fails_fast() {
    let mut engine = LinkEngine::default();
    let (accepted, mut rx) = send(&mut engine, Request::new(MSP_STATUS), Instant::now());

    assert!(!accepted);
    assert_eq!(rx.try_recv().expect("completion should have fired"), None);
    assert_eq!(engine.pending_len(), 0);
    assert!(engine.poll_transmit().is_none());
}

#[test]
fn test_send_in_offline_mode_fails_fast() {
    let mut engine = connected_engine();
    engine.set_offline(true);
    let (accepted, mut rx) = send(&mut engine, Request::new(MSP_STATUS), Instant::now());

    assert!(!accepted);
    assert_eq!(rx.try_recv().unwrap(), None);

    let (tx, _rx) = oneshot::channel();
    let refused = engine.try_send(Request::new(MSP_STATUS), tx, None, Instant::now());
    assert!(matches!(refused, Err((LinkError::Offline, _))));
}

#[test]
fn test_request_is_transmitted_and_completed() {
    let mut engine = connected_engine();
    let now = Instant::now();
    let (accepted, mut rx) = send(&mut engine, Request::new(MSP_API_VERSION), now);
    assert!(accepted);

    let written = flush(&mut engine, now);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0.as_ref(), &[0x24, 0x4D, 0x3C, 0x00, 0x01, 0x01]);
    assert_eq!(written[0].1, TransmitKind::Initial);

    engine.feed(&hex::decode(API_VERSION_RESPONSE).unwrap(), now);
    let response = rx.try_recv().unwrap().expect("response expected");
    assert_eq!(response.code, MSP_API_VERSION);
    assert_eq!(response.payload.as_ref(), &[0x00, 0x01, 0x2C]);
    assert!(response.valid);
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.next_deadline(), None);
}

#[test]
fn test_externally_decoded_frame_completes_request() {
    let mut engine = connected_engine();
    let now = Instant::now();
    let (_, mut rx) = send(&mut engine, Request::new(MSP_STATUS), now);
    flush(&mut engine, now);

    let later = now + Duration::from_millis(20);
    let frame = Decoder::new()
        .feed_all(&device_frame(MSP_STATUS, &[1, 2]))
        .pop()
        .expect("frame expected");
    engine.receive(&frame, later);

    assert_eq!(rx.try_recv().unwrap().expect("response expected").payload.as_ref(), &[1, 2]);
    let stats = engine.stats();
    assert_eq!(stats.frames_decoded, 1);
    assert_eq!(stats.last_received, Some(later));
    assert!(engine.decoder().is_idle());
}

#[test]
fn test_codes_above_254_use_v2() {
    let mut engine = connected_engine();
    let now = Instant::now();
    send(&mut engine, Request::new(MSP2_COMMON_SETTING), now);

    let written = flush(&mut engine, now);
    assert_eq!(&written[0].0[..2], b"$X");
}

#[test]
fn test_same_code_requests_complete_in_order() {
    let mut engine = connected_engine();
    let now = Instant::now();

    let (_, mut first) = send(&mut engine, Request::new(MSP_STATUS).with_payload(vec![1]), now);
    let (_, mut second) = send(&mut engine, Request::new(MSP_STATUS).with_payload(vec![2]), now);
    assert_eq!(engine.pending_len(), 2);
    assert_eq!(flush(&mut engine, now).len(), 2, "requests with payload are always sent");

    engine.feed(&device_frame(MSP_STATUS, &[0xA1]), now);
    assert_eq!(first.try_recv().unwrap().unwrap().payload.as_ref(), &[0xA1]);
    assert!(second.try_recv().is_err(), "second request must still be waiting");

    engine.feed(&device_frame(MSP_STATUS, &[0xA2]), now);
    assert_eq!(second.try_recv().unwrap().unwrap().payload.as_ref(), &[0xA2]);
    assert_eq!(engine.pending_len(), 0);
}

#[test]
fn test_duplicate_polls_are_coalesced() {
    let mut engine = connected_engine();
    let now = Instant::now();

    let (_, mut first) = send(&mut engine, Request::new(MSP_STATUS), now);
    let (accepted, mut second) = send(&mut engine, Request::new(MSP_STATUS), now);
    assert!(accepted);

    assert_eq!(flush(&mut engine, now).len(), 1, "only one poll goes on the wire");
    assert_eq!(engine.pending_len(), 2);

    engine.feed(&device_frame(MSP_STATUS, &[1]), now);
    assert!(first.try_recv().unwrap().is_some());
    engine.feed(&device_frame(MSP_STATUS, &[2]), now);
    assert!(second.try_recv().unwrap().is_some());
}

#[test]
fn test_timeout_retransmits_once_without_rearming() {
    let mut engine = connected_engine();
    let start = Instant::now();
    let (_, mut rx) = send(&mut engine, Request::new(MSP_STATUS), start);
    let original = flush(&mut engine, start);

    engine.poll_timeouts(start + Duration::from_millis(199));
    assert!(engine.poll_transmit().is_none());

    engine.poll_timeouts(start + Duration::from_millis(200));
    let resent = flush(&mut engine, start + Duration::from_millis(250));
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].0, original[0].0, "retransmission reuses the original buffer");
    assert!(matches!(resent[0].1, TransmitKind::Retransmit { started } if started == start));

    engine.poll_timeouts(start + Duration::from_secs(60));
    assert!(engine.poll_transmit().is_none(), "no second retransmission");
    assert_eq!(engine.next_deadline(), None);
    assert_eq!(engine.pending_len(), 1);
    assert_eq!(engine.stats().retransmissions, 1);

    // A late response still completes the request
    engine.feed(&device_frame(MSP_STATUS, &[]), start + Duration::from_secs(61));
    assert!(rx.try_recv().unwrap().is_some());
}

#[test]
fn test_adaptive_timeout() {
    let mut engine = connected_engine();
    let start = Instant::now();
    assert_eq!(engine.stats().timeout, Duration::from_millis(200));

    for code in 1..=5u16 {
        send(&mut engine, Request::new(code), start);
    }
    flush(&mut engine, start);
    assert_eq!(engine.stats().timeout, Duration::from_millis(195), "each send shrinks by one");

    // Retransmission written 750ms after the request: the window follows it
    let mut engine = connected_engine();
    send(&mut engine, Request::new(MSP_STATUS), start);
    flush(&mut engine, start);
    engine.poll_timeouts(start + Duration::from_millis(199));
    engine.poll_timeouts(start + Duration::from_millis(300));
    flush(&mut engine, start + Duration::from_millis(750));
    assert_eq!(engine.stats().timeout, Duration::from_millis(750));

    // ... and is clamped to the configured bounds
    let mut engine = connected_engine();
    send(&mut engine, Request::new(MSP_STATUS), start);
    flush(&mut engine, start);
    engine.poll_timeouts(start + Duration::from_secs(1));
    flush(&mut engine, start + Duration::from_secs(10));
    assert_eq!(engine.stats().timeout, Duration::from_millis(2000));
}

#[test]
fn test_timeout_floor() {
    let config = LinkConfig {
        initial_timeout_ms: 101,
        ..LinkConfig::default()
    };
    let mut engine = LinkEngine::new(config);
    engine.connect();
    let now = Instant::now();

    for code in 1..=3u16 {
        send(&mut engine, Request::new(code), now);
    }
    flush(&mut engine, now);
    assert_eq!(engine.stats().timeout, Duration::from_millis(100));
}

#[test]
fn test_checksum_failure_dropped_unless_requested() {
    let mut engine = connected_engine();
    let now = Instant::now();
    let mut bad = device_frame(MSP_STATUS, &[1, 2]).to_vec();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;

    let (_, mut silent) = send(&mut engine, Request::new(MSP_STATUS), now);
    engine.feed(&bad, now);
    assert!(
        matches!(silent.try_recv(), Err(oneshot::error::TryRecvError::Closed)),
        "request is removed without being completed"
    );
    assert_eq!(engine.pending_len(), 0);

    let (_, mut loud) = send(&mut engine, Request::new(MSP_STATUS).invoke_on_crc_error(true), now);
    engine.feed(&bad, now);
    let response = loud.try_recv().unwrap().expect("completion on checksum error");
    assert!(!response.valid);
    assert!(response.payload.is_empty());
    assert_eq!(engine.stats().checksum_failures, 2);
}

#[test]
fn test_unsupported_reply_completes_request() {
    let mut engine = connected_engine();
    let now = Instant::now();
    let (_, mut rx) = send(&mut engine, Request::new(100), now);

    engine.feed(&hex::decode("244d21006464").unwrap(), now);
    let response = rx.try_recv().unwrap().unwrap();
    assert!(response.unsupported);
    assert!(response.valid);
}

#[test]
fn test_reset_cancels_everything() {
    let mut engine = connected_engine();
    let now = Instant::now();
    let (_, mut a) = send(&mut engine, Request::new(MSP_STATUS), now);
    let (_, mut b) = send(&mut engine, Request::new(MSP_API_VERSION), now);
    engine.feed(&[0x24, 0x4D], now);
    let mut bad = device_frame(7, &[]).to_vec();
    bad[5] ^= 1;
    engine.feed(&bad, now);
    assert_eq!(engine.stats().checksum_failures, 0, "frame was swallowed by the partial header");

    engine.disconnect();

    assert!(a.try_recv().is_err());
    assert!(b.try_recv().is_err());
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(engine.next_deadline(), None);
    assert!(engine.poll_transmit().is_none());
    assert!(engine.decoder().is_idle());
    assert_eq!(engine.stats().checksum_failures, 0);
    assert!(!engine.is_connected());
}

#[test]
fn test_sent_signal_fires_after_write() {
    let mut engine = connected_engine();
    let now = Instant::now();
    let (completion, _rx) = oneshot::channel();
    let (sent_tx, mut sent_rx) = oneshot::channel();

    assert!(engine.send(Request::new(MSP_STATUS), completion, Some(sent_tx), now));
    assert!(sent_rx.try_recv().is_err());
    flush(&mut engine, now);
    assert!(sent_rx.try_recv().is_ok());
}

#[test]
fn test_listeners_see_frames_before_completion() {
    let mut engine = connected_engine();
    let now = Instant::now();
    let (_, mut frames) = engine.subscribe_channel();
    let (_, mut rx) = send(&mut engine, Request::new(MSP_STATUS), now);

    engine.feed(&device_frame(MSP_STATUS, &[9]), now);
    engine.feed(&device_frame(MSP_API_VERSION, &[1]), now);

    assert_eq!(frames.try_recv().unwrap().code, MSP_STATUS);
    assert_eq!(frames.try_recv().unwrap().code, MSP_API_VERSION);
    assert!(rx.try_recv().unwrap().is_some());
    assert_eq!(engine.stats().frames_decoded, 2);
}

#[test]
fn test_oversized_payload_is_refused() {
    let mut engine = connected_engine();
    let payload = vec![0u8; 70_000];
    let (tx, mut rx) = oneshot::channel();
    let refused = engine.try_send(Request::new(MSP_STATUS).with_payload(payload), tx, None, Instant::now());

    let Err((LinkError::PayloadTooLarge { len, .. }, completion)) = refused else {
        panic!("expected PayloadTooLarge");
    };
    assert_eq!(len, 70_000);
    drop(completion);
    assert!(rx.try_recv().is_err());
    assert_eq!(engine.pending_len(), 0);
}
