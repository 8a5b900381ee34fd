use super::*;
use shared::{
    domain::{AuthorizationState, CameraFacing, TorchState},
    error::PlatformError,
};

fn payload() -> StartPayload {
    StartPayload::new(CameraFacing::Back, None, None)
}

#[tokio::test]
async fn missing_channels_fail_commands_but_stop_cleanly() {
    let methods = MissingScannerMethodChannel;
    assert!(methods.authorization_state().await.is_err());
    assert!(methods.start(payload()).await.is_err());
    assert!(methods.stop().await.is_ok());

    let mut events = MissingScannerEventChannel.subscribe_events();
    assert!(matches!(
        events.recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));
}

#[tokio::test]
async fn loopback_records_commands_in_order() {
    let scanner = LoopbackScanner::new();
    assert_eq!(
        scanner.authorization_state().await.expect("state"),
        AuthorizationState::Authorized.index()
    );
    let reply = scanner.start(payload()).await.expect("start");
    assert_eq!(reply, Some(LoopbackScanner::default_reply()));
    assert!(scanner.is_running().await);
    scanner.analyze(1).await.expect("analyze");
    scanner.stop().await.expect("stop");
    scanner.stop().await.expect("second stop");

    assert_eq!(
        scanner.calls().await,
        vec![
            DeviceCall::State,
            DeviceCall::Start(payload()),
            DeviceCall::Analyze(1),
            DeviceCall::Stop,
            DeviceCall::Stop,
        ]
    );
    assert!(!scanner.is_running().await);
}

#[tokio::test]
async fn permission_request_updates_authorization() {
    let scanner = LoopbackScanner::new()
        .with_authorization(AuthorizationState::Undetermined)
        .with_permission_grant(false);
    assert!(!scanner.request_permission().await.expect("request"));
    assert_eq!(
        scanner.authorization_state().await.expect("state"),
        AuthorizationState::Denied.index()
    );
}

#[tokio::test]
async fn torch_is_echoed_only_while_running() {
    let scanner = LoopbackScanner::new();
    let mut events = scanner.subscribe_events();

    scanner.torch(1).await.expect("torch while stopped");
    assert!(events.try_recv().is_err());

    scanner.start(payload()).await.expect("start");
    scanner.torch(1).await.expect("torch while running");
    assert_eq!(
        events.try_recv().expect("echo"),
        RawDeviceEvent::torch_state(TorchState::On)
    );

    assert!(scanner.torch(9).await.is_err());
}

#[tokio::test]
async fn scripted_failure_applies_once() {
    let scanner = LoopbackScanner::new();
    scanner
        .fail_next("start", PlatformError::new("CAMERA_ERROR", "busy"))
        .await;

    let err = scanner.start(payload()).await.expect_err("scripted failure");
    assert!(err.to_string().contains("CAMERA_ERROR"));
    assert!(scanner.start(payload()).await.expect("retry").is_some());
}

#[tokio::test]
async fn null_reply_leaves_device_stopped() {
    let scanner = LoopbackScanner::new().with_start_reply(None);
    assert_eq!(scanner.start(payload()).await.expect("start"), None);
    assert!(!scanner.is_running().await);
}

#[test]
fn emit_without_subscribers_reaches_nobody() {
    let scanner = LoopbackScanner::new();
    assert_eq!(scanner.emit(RawDeviceEvent::barcode_mac("x")), 0);
    let _events = scanner.subscribe_events();
    assert_eq!(scanner.subscriber_count(), 1);
    assert_eq!(scanner.emit(RawDeviceEvent::barcode_mac("x")), 1);
}
