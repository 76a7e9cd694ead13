//! End-to-end behaviour of `Scale` against the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use opperlink_device::{ConnectionState, DeviceError, Scale, ScaleConfig, DEFAULT_TRANSFER_UNIT};
use opperlink_frame::Attribute;
use opperlink_transport::{
    BleTransport, DeviceInfoField, MemoryTransport, TransportError, DEVICE_INFO_SERVICE_UUID,
    NOTIFY_CHARACTERISTIC_UUID,
};

fn acking_scale() -> Arc<MemoryTransport> {
    Arc::new(MemoryTransport::new("OPPER-M1 A1B2").with_responder(|line| {
        if line.starts_with("ATT+FILTER") {
            vec!["ATT+ACK=1\r\n".to_string()]
        } else {
            vec!["ATT+ACK=0\r\n".to_string()]
        }
    }))
}

/// Connect and let the initial health check complete.
async fn ready(transport: &Arc<MemoryTransport>) -> Scale {
    let scale = Scale::default();
    scale.connect(transport.clone()).await.unwrap();
    transport.notify(b"ATT+BAT=80,0\r\n");
    eventually(|| transport.written_lines() == vec!["ATT+CHECK"]).await;
    scale.check().await.unwrap();
    scale
}

/// Lines written after the two health checks sent by `ready`.
fn commands_after_ready(transport: &MemoryTransport) -> Vec<String> {
    transport.written_lines().split_off(2)
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test(start_paused = true)]
async fn connect_discovers_in_order_then_negotiates() {
    let transport = acking_scale();
    let scale = Scale::default();

    scale.connect(transport.clone()).await.unwrap();

    assert_eq!(
        transport.calls(),
        vec![
            "connect",
            "services",
            "characteristics",
            "set_transfer_unit",
            "start_notifications"
        ]
    );
    assert_eq!(scale.state(), ConnectionState::Connected);
    assert_eq!(scale.transfer_unit(), 517);
}

#[tokio::test(start_paused = true)]
async fn health_check_waits_for_first_notification() {
    let transport = acking_scale();
    let scale = Scale::default();
    scale.connect(transport.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(transport.written_lines().is_empty());

    transport.notify(b"ATT+BAT=80,0\r\n");
    eventually(|| transport.written_lines() == vec!["ATT+CHECK"]).await;
}

#[tokio::test(start_paused = true)]
async fn already_connected_counts_as_success() {
    let transport = acking_scale();
    transport.connect().await.unwrap();

    let scale = Scale::default();
    scale.connect(transport.clone()).await.unwrap();
    assert!(scale.is_connected());
}

#[tokio::test(start_paused = true)]
async fn failed_connection_is_cleaned_up_and_rethrown() {
    let transport = acking_scale();
    transport.fail_next_connect(TransportError::ConnectionFailed("timeout".into()));

    let scale = Scale::default();
    let err = scale.connect(transport.clone()).await.unwrap_err();

    assert_eq!(
        err,
        DeviceError::Transport(TransportError::ConnectionFailed("timeout".into()))
    );
    assert_eq!(transport.call_count("disconnect"), 1);
    assert_eq!(scale.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn other_connect_errors_skip_cleanup() {
    let transport = acking_scale();
    transport.fail_next_connect(TransportError::Rejected {
        code: 10001,
        message: "adapter off".into(),
    });

    let scale = Scale::default();
    assert!(scale.connect(transport.clone()).await.is_err());
    assert_eq!(transport.call_count("disconnect"), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_notify_characteristic_fails_connect() {
    let transport = acking_scale();
    transport.remove_characteristic(NOTIFY_CHARACTERISTIC_UUID);

    let scale = Scale::default();
    let err = scale.connect(transport.clone()).await.unwrap_err();

    assert_eq!(
        err,
        DeviceError::MissingCharacteristic(NOTIFY_CHARACTERISTIC_UUID.to_string())
    );
    assert_eq!(scale.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn missing_characteristic_tolerated_when_not_required() {
    let transport = acking_scale();
    transport.remove_characteristic(NOTIFY_CHARACTERISTIC_UUID);

    let scale = Scale::new(ScaleConfig {
        require_characteristics: false,
        ..ScaleConfig::default()
    });
    scale.connect(transport.clone()).await.unwrap();
    assert!(scale.is_connected());
}

#[tokio::test(start_paused = true)]
async fn device_drop_tears_connection_down() {
    let transport = acking_scale();
    let scale = Scale::default();
    scale.connect(transport.clone()).await.unwrap();
    assert_eq!(scale.transfer_unit(), 517);

    transport.drop_connection();
    eventually(|| scale.state() == ConnectionState::Disconnected).await;

    assert_eq!(scale.transfer_unit(), DEFAULT_TRANSFER_UNIT);
    assert_eq!(scale.check().await.unwrap_err(), DeviceError::NotConnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let transport = acking_scale();
    let scale = Scale::default();
    scale.connect(transport.clone()).await.unwrap();

    scale.disconnect().await.unwrap();
    scale.disconnect().await.unwrap();

    assert_eq!(transport.call_count("disconnect"), 1);
    assert!(!transport.is_connected());
    assert_eq!(scale.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn subscriptions_survive_reconnect_with_fresh_reassembly() {
    let transport = acking_scale();
    let scale = Scale::default();
    let mut weights = scale.stream().weights();

    scale.connect(transport.clone()).await.unwrap();
    transport.notify(b"ATT+WGT=9");
    transport.drop_connection();
    eventually(|| scale.state() == ConnectionState::Disconnected).await;

    scale.connect(transport.clone()).await.unwrap();
    transport.notify(b"ATT+WGT=5,1,1\r\n");

    assert_eq!(weights.recv().await, Some(5.0));
}

#[tokio::test(start_paused = true)]
async fn reconnect_stops_previous_pipeline() {
    let first = acking_scale();
    let second = acking_scale();
    let scale = Scale::default();
    let mut commands = scale.stream().commands();

    scale.connect(first.clone()).await.unwrap();
    scale.connect(second.clone()).await.unwrap();

    first.notify(b"ATT+BAT=10,0\r\n");
    second.notify(b"ATT+BAT=20,0\r\n");

    let command = commands.recv().await.unwrap();
    assert_eq!(command.to_string(), "ATT+BAT=20,0");
}

#[tokio::test(start_paused = true)]
async fn renegotiate_recomputes_chunking() {
    let transport = acking_scale();
    let scale = ready(&transport).await;
    let before = transport.writes().len();

    transport.set_max_transfer_unit(Some(20));
    assert_eq!(scale.renegotiate().await.unwrap(), 20);
    assert_eq!(scale.transfer_unit(), 20);

    scale.calibrate(-5, 1000.0, Some(123_456_789)).await.unwrap();

    // "ATT+REF0=-5\r\n" fits one 17-byte chunk; the 25-byte REF1 line needs two.
    let writes = transport.writes().split_off(before);
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|chunk| chunk.len() <= 17));
    assert_eq!(
        commands_after_ready(&transport),
        vec!["ATT+REF0=-5", "ATT+REF1=123456789,1000"]
    );
}

#[tokio::test(start_paused = true)]
async fn acknowledged_setters_update_replayed_values() {
    let transport = acking_scale();
    let scale = ready(&transport).await;
    let stream = scale.stream();

    scale.set_idle(5).await.unwrap();
    scale.set_accuracy(0.5).await.unwrap();
    scale.set_lock(3.0).await.unwrap();
    assert_eq!(*stream.idle().borrow(), 5);
    assert_eq!(*stream.accuracy().borrow(), 0.5);
    assert_eq!(*stream.lock().borrow(), 3.0);

    let err = scale.set_filter(10).await.unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Rejected { attribute: Attribute::Filter, .. }
    ));
    assert_eq!(*stream.filter().borrow(), 40);
    assert_eq!(
        commands_after_ready(&transport),
        vec![
            "ATT+IDLE=5",
            "ATT+ACCURACY=0.5",
            "ATT+LOCK=3",
            "ATT+FILTER=10",
            "ATT+FILTER=10"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn device_commands_use_their_tags() {
    let transport = acking_scale();
    let scale = ready(&transport).await;

    scale.shutdown().await.unwrap();
    scale.reboot().await.unwrap();
    scale.factory_reset().await.unwrap();

    assert_eq!(
        commands_after_ready(&transport),
        vec!["ATT+CLOSE", "ATT+RST", "ATT+FACTORY"]
    );
}

#[tokio::test(start_paused = true)]
async fn device_info_strips_padding() {
    let transport = acking_scale();
    let scale = Scale::default();
    scale.connect(transport.clone()).await.unwrap();
    transport.set_characteristic_value(
        DEVICE_INFO_SERVICE_UUID,
        DeviceInfoField::SerialNumber.characteristic_uuid(),
        &b"SN0042\0\0\0"[..],
    );

    assert_eq!(
        scale.device_info(DeviceInfoField::SerialNumber).await.unwrap(),
        "SN0042"
    );
    assert!(matches!(
        scale.device_info(DeviceInfoField::ModelNumber).await,
        Err(DeviceError::Transport(TransportError::NotFound(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn state_changes_are_observable() {
    let transport = acking_scale();
    let scale = Scale::default();
    let mut states = scale.watch_state();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

    scale.connect(transport.clone()).await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    scale.disconnect().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn stability_window_restarts_after_reconnect() {
    let transport = acking_scale();
    let scale = Scale::default();
    let mut stable = scale.stream().stable_weights_over(2);

    scale.connect(transport.clone()).await.unwrap();
    transport.notify(b"ATT+WGT=1,10,1\r\n");
    tokio::time::sleep(Duration::from_millis(10)).await;
    transport.drop_connection();
    eventually(|| scale.state() == ConnectionState::Disconnected).await;

    scale.connect(transport.clone()).await.unwrap();
    transport.notify(b"ATT+WGT=2,10,1\r\n");
    transport.notify(b"ATT+WGT=3,10,1\r\n");

    assert_eq!(stable.recv().await, Some(3.0));
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_calibrate_sample_wait() {
    let transport = acking_scale();
    let scale = ready(&transport).await;

    let calibrating = tokio::spawn({
        let scale = scale.clone();
        async move { scale.calibrate(1, 100.0, None).await }
    });
    eventually(|| commands_after_ready(&transport) == vec!["ATT+REF0=1"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    scale.disconnect().await.unwrap();

    let result = calibrating.await.unwrap();
    assert!(matches!(result, Err(DeviceError::Disconnected(_))));
    assert_eq!(commands_after_ready(&transport), vec!["ATT+REF0=1"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_renegotiation() {
    let transport = acking_scale();
    let scale = Scale::default();
    scale.connect(transport.clone()).await.unwrap();
    transport.stall_transfer_unit();

    let renegotiating = tokio::spawn({
        let scale = scale.clone();
        async move { scale.renegotiate().await }
    });
    eventually(|| transport.call_count("set_transfer_unit") == 2).await;

    scale.disconnect().await.unwrap();

    let result = renegotiating.await.unwrap();
    assert!(matches!(result, Err(DeviceError::Disconnected(_))));
    assert_eq!(scale.transfer_unit(), DEFAULT_TRANSFER_UNIT);
}

#[tokio::test(start_paused = true)]
async fn new_connect_cancels_stalled_negotiation() {
    let stalled = acking_scale();
    stalled.stall_transfer_unit();
    let scale = Scale::default();

    let first = tokio::spawn({
        let scale = scale.clone();
        let stalled = stalled.clone();
        async move { scale.connect(stalled).await }
    });
    eventually(|| stalled.call_count("set_transfer_unit") == 1).await;

    let healthy = acking_scale();
    scale.connect(healthy.clone()).await.unwrap();

    let result = first.await.unwrap();
    assert!(matches!(result, Err(DeviceError::Disconnected(_))));
    assert_eq!(scale.state(), ConnectionState::Connected);
    assert_eq!(scale.transfer_unit(), 517);
}
