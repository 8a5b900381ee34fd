use std::sync::Arc;

use serde_json::Value;
use shared::{
    barcode::Barcode,
    error::ProtocolViolation,
    protocol::{DeviceEvent, RawDeviceEvent},
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, warn};

use crate::{
    liveness::{ControllerId, LiveSlot},
    results::ActivatedBroadcast,
    state::SessionState,
};

/// Turns the device-native barcode structure into a [`Barcode`].
pub trait BarcodeDecoder: Send + Sync {
    fn decode(&self, data: &Value) -> Result<Barcode, ProtocolViolation>;
}

pub struct NativeBarcodeDecoder;

impl BarcodeDecoder for NativeBarcodeDecoder {
    fn decode(&self, data: &Value) -> Result<Barcode, ProtocolViolation> {
        Barcode::from_native(data)
    }
}

/// State of a controller's event subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFeed {
    Open,
    Closed,
    /// The device sent something uninterpretable; no further events are applied.
    Failed(ProtocolViolation),
}

pub struct EventDispatcher {
    state: Arc<SessionState>,
    results: Arc<ActivatedBroadcast<Barcode>>,
    decoder: Arc<dyn BarcodeDecoder>,
}

impl EventDispatcher {
    pub fn new(
        state: Arc<SessionState>,
        results: Arc<ActivatedBroadcast<Barcode>>,
        decoder: Arc<dyn BarcodeDecoder>,
    ) -> Self {
        Self {
            state,
            results,
            decoder,
        }
    }

    /// Applies one event to the session state or the result stream.
    pub fn dispatch(&self, raw: RawDeviceEvent) -> Result<(), ProtocolViolation> {
        match DeviceEvent::decode(raw)? {
            DeviceEvent::TorchState(torch) => {
                self.state.apply_torch_state(torch);
            }
            DeviceEvent::Barcode(data) => {
                let barcode = self.decoder.decode(&data)?;
                self.results.publish(barcode);
            }
            DeviceEvent::BarcodeMac { payload } => {
                self.results.publish(Barcode::from_raw_value(payload));
            }
            DeviceEvent::Unknown { name } => {
                return Err(ProtocolViolation::UnknownEvent { name });
            }
        }
        Ok(())
    }
}

/// Drains one event subscription until it closes, the controller loses
/// liveness, or an event violates the protocol.
pub(crate) async fn run_event_feed(
    controller: ControllerId,
    dispatcher: Arc<EventDispatcher>,
    mut events: broadcast::Receiver<RawDeviceEvent>,
    slot: Arc<LiveSlot>,
    feed: Arc<watch::Sender<EventFeed>>,
) {
    let mut live = slot.watch();
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(raw) => {
                    if !slot.is_live(controller) {
                        break;
                    }
                    if let Err(violation) = dispatcher.dispatch(raw) {
                        error!(%controller, "scanner: {violation}; closing event subscription");
                        feed.send_replace(EventFeed::Failed(violation));
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%controller, skipped, "scanner: event subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = live.changed() => {
                if changed.is_err() || *live.borrow_and_update() != Some(controller) {
                    break;
                }
            }
        }
    }
    debug!(%controller, "scanner: event subscription closed");
    feed.send_replace(EventFeed::Closed);
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared::{
        barcode::BarcodeFormat,
        domain::{CameraFacing, TorchState},
    };

    use super::*;
    use crate::results::ActivationHooks;

    struct RejectingDecoder;

    impl BarcodeDecoder for RejectingDecoder {
        fn decode(&self, _data: &Value) -> Result<Barcode, ProtocolViolation> {
            Err(ProtocolViolation::malformed_event("barcode", "rejected"))
        }
    }

    type Fixture = (
        EventDispatcher,
        Arc<SessionState>,
        Arc<ActivatedBroadcast<Barcode>>,
    );

    fn dispatcher_with(decoder: Arc<dyn BarcodeDecoder>) -> Fixture {
        let state = Arc::new(SessionState::new(CameraFacing::Back));
        let results = Arc::new(ActivatedBroadcast::new(8, ActivationHooks::none()));
        (
            EventDispatcher::new(Arc::clone(&state), Arc::clone(&results), decoder),
            state,
            results,
        )
    }

    #[test]
    fn torch_event_updates_confirmed_state() {
        let (dispatcher, state, _) = dispatcher_with(Arc::new(NativeBarcodeDecoder));
        let mut torch = state.subscribe_torch();

        dispatcher
            .dispatch(RawDeviceEvent::new("torchState", json!(1)))
            .expect("torch on");
        assert_eq!(*torch.borrow_and_update(), TorchState::On);

        dispatcher
            .dispatch(RawDeviceEvent::torch_state(TorchState::Off))
            .expect("torch off");
        assert_eq!(state.torch_state(), TorchState::Off);
    }

    #[test]
    fn barcode_events_append_one_record_each() {
        let (dispatcher, _, results) = dispatcher_with(Arc::new(NativeBarcodeDecoder));
        let mut listener = results.subscribe();

        dispatcher
            .dispatch(RawDeviceEvent::barcode(json!({ "rawValue": "abc", "format": 32 })))
            .expect("native barcode");
        dispatcher
            .dispatch(RawDeviceEvent::barcode_mac("from-mac"))
            .expect("mac barcode");

        let native = listener.try_recv().expect("first record");
        assert_eq!(native.raw_value.as_deref(), Some("abc"));
        assert_eq!(native.format, BarcodeFormat::Ean13);
        assert_eq!(listener.try_recv(), Some(Barcode::from_raw_value("from-mac")));
        assert_eq!(listener.try_recv(), None);
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let (dispatcher, state, results) = dispatcher_with(Arc::new(NativeBarcodeDecoder));
        let mut listener = results.subscribe();

        let err = dispatcher
            .dispatch(RawDeviceEvent::new("unknown", json!(1)))
            .expect_err("unknown tag");
        assert_eq!(
            err,
            ProtocolViolation::UnknownEvent {
                name: "unknown".into()
            }
        );
        assert_eq!(state.torch_state(), TorchState::Off);
        assert_eq!(listener.try_recv(), None);
    }

    #[test]
    fn decoder_failures_surface_as_violations() {
        let (dispatcher, _, results) = dispatcher_with(Arc::new(RejectingDecoder));
        let mut listener = results.subscribe();

        assert!(dispatcher
            .dispatch(RawDeviceEvent::barcode(json!({ "rawValue": "abc" })))
            .is_err());
        assert_eq!(listener.try_recv(), None);
    }
}
