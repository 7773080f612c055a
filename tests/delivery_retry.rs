mod common;

use std::time::{Duration, Instant};

use common::{config_with, dispatcher, DEVICE_TOPIC};
use lorabridge::bridge::DispatchOutcome;
use lorabridge::frame::{build_hex_line, FrameFormat};
use lorabridge::serial::memory::{ScriptedConnector, WriteStep};
use lorabridge::serial::{DeliveryManager, DeliveryOutcome};
use lorabridge::shutdown::{self, Shutdown};
use lorabridge::uplink::InboundMessage;

fn manager(connector: &ScriptedConnector, attempts: u32, delay: Duration) -> DeliveryManager {
    DeliveryManager::new(Box::new(connector.clone()), attempts, delay)
}

#[tokio::test]
async fn failing_link_gets_exactly_max_attempts() {
    let connector = ScriptedConnector::new().always(WriteStep::Fail);
    let mut dm = manager(&connector, 3, Duration::ZERO);
    let frame = build_hex_line("dev", b"\x01").unwrap();

    let outcome = dm.deliver(&frame, &mut Shutdown::never()).await;

    assert_eq!(
        outcome,
        DeliveryOutcome {
            attempts: 3,
            success: false,
            bytes_written: 0,
            interrupted: false,
        }
    );
    assert_eq!(connector.write_calls(), 3);
    // Every fault drops the link, so each attempt reopened it.
    assert_eq!(connector.opens(), 3);
}

#[tokio::test]
async fn retry_wait_is_bounded_by_attempts_times_delay() {
    let connector = ScriptedConnector::new().always(WriteStep::Fail);
    let delay = Duration::from_millis(20);
    let mut dm = manager(&connector, 3, delay);
    let frame = build_hex_line("dev", b"\x01").unwrap();

    let started = Instant::now();
    let outcome = dm.deliver(&frame, &mut Shutdown::never()).await;
    let elapsed = started.elapsed();

    assert!(!outcome.success);
    // Two waits between three attempts.
    assert!(elapsed >= delay * 2, "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn link_recovers_after_port_comes_back() {
    let connector = ScriptedConnector::new().fail_opens(2);
    let mut dm = manager(&connector, 3, Duration::ZERO);
    let frame = build_hex_line("dev", b"\xAB").unwrap();

    let outcome = dm.deliver(&frame, &mut Shutdown::never()).await;

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.bytes_written, frame.len());
    assert_eq!(connector.frames(), vec![b"dev:ab\n".to_vec()]);
}

#[tokio::test]
async fn next_frame_after_exhaustion_starts_fresh() {
    let connector =
        ScriptedConnector::new().script([WriteStep::Fail, WriteStep::Fail, WriteStep::Short(1)]);
    let mut d = dispatcher(&config_with(FrameFormat::PrefixedBinary), &connector);

    let first = d
        .dispatch(InboundMessage::new(DEVICE_TOPIC, r#"{"data":"AQ=="}"#))
        .await;
    assert!(matches!(first, DispatchOutcome::Exhausted(o) if o.attempts == 3));

    let second = d
        .dispatch(InboundMessage::new(DEVICE_TOPIC, r#"{"data":"Ag=="}"#))
        .await;
    assert!(matches!(second, DispatchOutcome::Delivered(o) if o.attempts == 1));

    let snap = d.stats().snapshot();
    assert_eq!((snap.received, snap.sent, snap.errors), (2, 1, 1));
}

#[tokio::test]
async fn shutdown_during_retry_wait_ends_delivery_quickly() {
    let connector = ScriptedConnector::new().always(WriteStep::Fail);
    let mut dm = manager(&connector, 10, Duration::from_secs(30));
    let frame = build_hex_line("dev", b"\x01").unwrap();
    let (trigger, mut signal) = shutdown::channel();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();
    });
    let outcome = tokio::time::timeout(Duration::from_secs(2), dm.deliver(&frame, &mut signal))
        .await
        .expect("shutdown should cut the retry wait short");
    stopper.await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.interrupted);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(connector.write_calls(), 1);
}
