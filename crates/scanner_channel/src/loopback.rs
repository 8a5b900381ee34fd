use std::collections::HashMap;

use async_trait::async_trait;
use shared::{
    domain::{AuthorizationState, TorchState},
    error::PlatformError,
    protocol::{FrameSize, RawDeviceEvent, StartPayload, StartReply},
};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::{ScannerEventChannel, ScannerMethodChannel};

const LOOPBACK_EVENT_CAPACITY: usize = 256;
const LOOPBACK_TEXTURE_ID: i64 = 1;

/// A command as received by the loopback device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    State,
    Request,
    Start(StartPayload),
    Stop,
    Torch(i64),
    Analyze(i64),
}

impl DeviceCall {
    pub fn command(&self) -> &'static str {
        match self {
            DeviceCall::State => "state",
            DeviceCall::Request => "request",
            DeviceCall::Start(_) => "start",
            DeviceCall::Stop => "stop",
            DeviceCall::Torch(_) => "torch",
            DeviceCall::Analyze(_) => "analyze",
        }
    }
}

/// In-memory scanner device. Records every command, answers from scripted
/// state and lets callers inject events as if the hardware produced them.
pub struct LoopbackScanner {
    inner: Mutex<LoopbackState>,
    events: broadcast::Sender<RawDeviceEvent>,
}

struct LoopbackState {
    authorization: AuthorizationState,
    grant_on_request: bool,
    start_reply: Option<StartReply>,
    torch_echo: bool,
    running: bool,
    calls: Vec<DeviceCall>,
    pending_failures: HashMap<&'static str, PlatformError>,
}

impl LoopbackState {
    fn record(&mut self, call: DeviceCall) -> anyhow::Result<()> {
        let command = call.command();
        self.calls.push(call);
        match self.pending_failures.remove(command) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl Default for LoopbackScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackScanner {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(LOOPBACK_EVENT_CAPACITY);
        Self {
            inner: Mutex::new(LoopbackState {
                authorization: AuthorizationState::Authorized,
                grant_on_request: true,
                start_reply: Some(Self::default_reply()),
                torch_echo: true,
                running: false,
                calls: Vec::new(),
                pending_failures: HashMap::new(),
            }),
            events,
        }
    }

    pub fn default_reply() -> StartReply {
        StartReply::texture(
            LOOPBACK_TEXTURE_ID,
            FrameSize {
                width: 1280.0,
                height: 720.0,
            },
            true,
        )
    }

    pub fn with_authorization(mut self, authorization: AuthorizationState) -> Self {
        self.inner.get_mut().authorization = authorization;
        self
    }

    pub fn with_permission_grant(mut self, grant: bool) -> Self {
        self.inner.get_mut().grant_on_request = grant;
        self
    }

    pub fn with_start_reply(mut self, reply: Option<StartReply>) -> Self {
        self.inner.get_mut().start_reply = reply;
        self
    }

    /// When enabled, a torch command on a running session is confirmed with a
    /// `torchState` event.
    pub fn with_torch_echo(mut self, echo: bool) -> Self {
        self.inner.get_mut().torch_echo = echo;
        self
    }

    pub async fn set_authorization(&self, authorization: AuthorizationState) {
        self.inner.lock().await.authorization = authorization;
    }

    pub async fn set_start_reply(&self, reply: Option<StartReply>) {
        self.inner.lock().await.start_reply = reply;
    }

    /// Makes the next call of `command` fail with `error`.
    pub async fn fail_next(&self, command: &'static str, error: PlatformError) {
        self.inner
            .lock()
            .await
            .pending_failures
            .insert(command, error);
    }

    /// Pushes an event to every open subscription. Returns how many received it.
    pub fn emit(&self, event: RawDeviceEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub async fn calls(&self) -> Vec<DeviceCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }
}

#[async_trait]
impl ScannerMethodChannel for LoopbackScanner {
    async fn authorization_state(&self) -> anyhow::Result<i64> {
        let mut guard = self.inner.lock().await;
        guard.record(DeviceCall::State)?;
        Ok(guard.authorization.index())
    }

    async fn request_permission(&self) -> anyhow::Result<bool> {
        let mut guard = self.inner.lock().await;
        guard.record(DeviceCall::Request)?;
        let granted = guard.grant_on_request;
        guard.authorization = if granted {
            AuthorizationState::Authorized
        } else {
            AuthorizationState::Denied
        };
        Ok(granted)
    }

    async fn start(&self, payload: StartPayload) -> anyhow::Result<Option<StartReply>> {
        let mut guard = self.inner.lock().await;
        guard.record(DeviceCall::Start(payload))?;
        let reply = guard.start_reply.clone();
        guard.running = reply.is_some();
        debug!(running = guard.running, "loopback: start");
        Ok(reply)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        guard.record(DeviceCall::Stop)?;
        guard.running = false;
        Ok(())
    }

    async fn torch(&self, state: i64) -> anyhow::Result<()> {
        let echo = {
            let mut guard = self.inner.lock().await;
            guard.record(DeviceCall::Torch(state))?;
            guard.torch_echo && guard.running
        };
        let torch = TorchState::from_index(state).ok_or_else(|| {
            PlatformError::new("INVALID_ARGUMENT", format!("unknown torch state {state}"))
        })?;
        if echo {
            self.emit(RawDeviceEvent::torch_state(torch));
        }
        Ok(())
    }

    async fn analyze(&self, mode: i64) -> anyhow::Result<()> {
        self.inner.lock().await.record(DeviceCall::Analyze(mode))
    }
}

impl ScannerEventChannel for LoopbackScanner {
    fn subscribe_events(&self) -> broadcast::Receiver<RawDeviceEvent> {
        self.events.subscribe()
    }
}
