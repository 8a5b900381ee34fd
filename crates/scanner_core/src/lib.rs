use std::sync::Arc;

use scanner_channel::{LoopbackScanner, ScannerEventChannel, ScannerMethodChannel};
use serde::{Deserialize, Serialize};
use shared::{
    barcode::Barcode,
    domain::{AnalyzeMode, AuthorizationState, CameraFacing, Ratio, TorchState},
    error::ProtocolViolation,
    protocol::StartPayload,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

mod commands;
pub mod dispatch;
pub mod error;
pub mod liveness;
pub mod results;
pub mod state;

use commands::{CommandQueue, QueuedCommand};
pub use dispatch::{BarcodeDecoder, EventDispatcher, EventFeed, NativeBarcodeDecoder};
pub use error::ScannerError;
pub use liveness::{ControllerId, LiveSlot, LivenessPolicy};
pub use results::{ActivatedBroadcast, ActivationHooks, Subscription};
pub use state::{ScannerArguments, SessionState};

const RESULT_STREAM_CAPACITY: usize = 64;

pub type BarcodeSubscription = Subscription<Barcode>;

/// Options fixed for the lifetime of a controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerOptions {
    pub facing: CameraFacing,
    pub ratio: Option<Ratio>,
    pub torch_enabled: Option<bool>,
    pub liveness: LivenessPolicy,
}

/// The hardware a controller drives, plus the slot recording which
/// controller currently owns it. Clones share the slot.
#[derive(Clone)]
pub struct ScannerDevice {
    pub methods: Arc<dyn ScannerMethodChannel>,
    pub events: Arc<dyn ScannerEventChannel>,
    pub slot: Arc<LiveSlot>,
    pub decoder: Arc<dyn BarcodeDecoder>,
}

impl ScannerDevice {
    pub fn new(
        methods: Arc<dyn ScannerMethodChannel>,
        events: Arc<dyn ScannerEventChannel>,
    ) -> Self {
        Self {
            methods,
            events,
            slot: Arc::new(LiveSlot::new()),
            decoder: Arc::new(NativeBarcodeDecoder),
        }
    }

    pub fn loopback(scanner: Arc<LoopbackScanner>) -> Self {
        Self::new(scanner.clone(), scanner)
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn BarcodeDecoder>) -> Self {
        self.decoder = decoder;
        self
    }
}

pub struct ScannerController {
    id: ControllerId,
    options: ControllerOptions,
    device: ScannerDevice,
    state: Arc<SessionState>,
    results: Arc<ActivatedBroadcast<Barcode>>,
    commands: CommandQueue,
    command_gate: Mutex<()>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    feed: Arc<watch::Sender<EventFeed>>,
}

impl ScannerController {
    /// Attaches a controller to `device` and starts a session. A failed first
    /// start is logged; the controller stays live so `start` can be retried.
    pub async fn new(options: ControllerOptions, device: ScannerDevice) -> Arc<Self> {
        let controller = Self::attach(options, device).await;
        if let Err(err) = controller.start().await {
            error!(controller = %controller.id, code = err.code(), "scanner: initial start failed: {err}");
        }
        controller
    }

    /// Takes ownership of `device` without starting a session. A controller
    /// that was live on the same device has its session stopped first.
    pub async fn attach(options: ControllerOptions, device: ScannerDevice) -> Arc<Self> {
        let id = ControllerId::mint();

        if let Some(previous) = device.slot.current() {
            info!(controller = %id, %previous, "scanner: stopping session of superseded controller");
            if let Err(err) = device.methods.stop().await {
                warn!(controller = %id, %previous, "scanner: stopping superseded session failed: {err}");
            }
        }
        device.slot.install(id);

        let (commands, _pump) =
            CommandQueue::spawn(Arc::clone(&device.methods), Arc::clone(&device.slot), id);
        let state = Arc::new(SessionState::new(options.facing));
        let results = Arc::new(ActivatedBroadcast::new(
            RESULT_STREAM_CAPACITY,
            ActivationHooks::new(
                analyze_hook(&device.slot, id, &commands, AnalyzeMode::Barcode),
                analyze_hook(&device.slot, id, &commands, AnalyzeMode::None),
            ),
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&state),
            Arc::clone(&results),
            Arc::clone(&device.decoder),
        ));
        let feed = Arc::new(watch::channel(EventFeed::Open).0);

        let events = device.events.subscribe_events();
        let event_task = tokio::spawn(dispatch::run_event_feed(
            id,
            dispatcher,
            events,
            Arc::clone(&device.slot),
            Arc::clone(&feed),
        ));

        debug!(controller = %id, facing = ?options.facing, "scanner: controller attached");
        Arc::new(Self {
            id,
            options,
            device,
            state,
            results,
            commands,
            command_gate: Mutex::new(()),
            event_task: Mutex::new(Some(event_task)),
            feed,
        })
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.device.slot.is_live(self.id)
    }

    pub fn facing(&self) -> CameraFacing {
        self.state.facing()
    }

    pub fn has_torch(&self) -> bool {
        self.state.has_torch()
    }

    pub fn arguments(&self) -> watch::Receiver<Option<ScannerArguments>> {
        self.state.subscribe_arguments()
    }

    pub fn torch_state(&self) -> watch::Receiver<TorchState> {
        self.state.subscribe_torch()
    }

    pub fn facing_state(&self) -> watch::Receiver<CameraFacing> {
        self.state.subscribe_facing()
    }

    pub fn authorization_state(&self) -> watch::Receiver<AuthorizationState> {
        self.state.subscribe_authorization()
    }

    pub fn event_feed(&self) -> watch::Receiver<EventFeed> {
        self.feed.subscribe()
    }

    /// Attaches a listener to the decoded result stream. The device analyzes
    /// frames only while at least one listener is attached.
    pub fn barcodes(&self) -> BarcodeSubscription {
        self.results.subscribe()
    }

    pub async fn start(&self) -> Result<(), ScannerError> {
        self.ensure_live("start")?;
        let _gate = self.command_gate.lock().await;
        self.start_session().await
    }

    /// Stops the device session. Calling it on a stopped session, or on a
    /// controller that is no longer live, succeeds without effect.
    pub async fn stop(&self) -> Result<(), ScannerError> {
        if !self.is_live() {
            debug!(controller = %self.id, "scanner: stop ignored, controller not live");
            return Ok(());
        }
        let _gate = self.command_gate.lock().await;
        self.stop_session().await
    }

    /// Requests the opposite of the last device-confirmed torch state. The
    /// torch observable only changes once the device reports the new state.
    pub fn toggle_torch(&self) {
        if !self.is_live() {
            debug!(controller = %self.id, "scanner: toggle_torch ignored, controller not live");
            return;
        }
        if !self.state.has_torch() {
            debug!(controller = %self.id, "scanner: toggle_torch ignored, no torch");
            return;
        }
        let target = self.state.torch_state().toggled();
        self.commands.push(QueuedCommand::Torch(target));
    }

    /// Restarts the session on the other camera. `facing` is flipped before
    /// the restart and is not rolled back if the restart fails.
    pub async fn switch_camera(&self) -> Result<(), ScannerError> {
        self.ensure_live("switch_camera")?;
        let _gate = self.command_gate.lock().await;
        self.stop_session().await?;
        let facing = self.state.flip_facing();
        info!(controller = %self.id, ?facing, "scanner: switching camera");
        self.start_session().await
    }

    /// Releases the device if this controller still owns it and closes the
    /// result stream. Safe to call more than once.
    ///
    /// Dropping a controller without disposing only ends its event task; it
    /// stays the slot holder so the next controller attached to the device
    /// stops the orphaned session.
    pub async fn dispose(&self) {
        if self.device.slot.revoke(self.id) {
            if let Err(err) = self.stop_session().await {
                warn!(controller = %self.id, "scanner: stop during dispose failed: {err}");
            }
            if let Some(task) = self.event_task.lock().await.take() {
                task.abort();
            }
            self.feed.send_if_modified(|feed| {
                let open = *feed == EventFeed::Open;
                if open {
                    *feed = EventFeed::Closed;
                }
                open
            });
            self.state.clear_arguments();
            info!(controller = %self.id, "scanner: controller disposed");
        } else {
            debug!(controller = %self.id, "scanner: dispose skipped, controller not live");
        }
        self.results.close();
    }

    fn ensure_live(&self, operation: &'static str) -> Result<(), ScannerError> {
        if self.is_live() {
            return Ok(());
        }
        match self.options.liveness {
            LivenessPolicy::Panic => panic!(
                "ScannerController::{operation} called after dispose or supersession (controller {})",
                self.id
            ),
            LivenessPolicy::Report => {
                warn!(controller = %self.id, operation, "scanner: call on non-live controller");
                Err(ScannerError::UseAfterDispose { operation })
            }
        }
    }

    async fn start_session(&self) -> Result<(), ScannerError> {
        if let Err(err) = self
            .device
            .methods
            .analyze(AnalyzeMode::Barcode.index())
            .await
        {
            warn!(controller = %self.id, "scanner: analyze before start failed: {err}");
        }

        self.resolve_authorization().await?;
        if !self.is_live() {
            return Err(ScannerError::UseAfterDispose { operation: "start" });
        }

        let facing = self.state.facing();
        self.state.publish_facing(facing);

        let payload = StartPayload::new(facing, self.options.ratio, self.options.torch_enabled);
        let reply = self
            .device
            .methods
            .start(payload)
            .await
            .map_err(ScannerError::command("start"))?
            .ok_or_else(|| ScannerError::Initialization {
                reason: "device returned no session parameters".into(),
            })?;
        let arguments = ScannerArguments::from_reply(reply)?;

        if !self.is_live() {
            debug!(controller = %self.id, "scanner: discarding start reply of non-live controller");
            // Disposed mid-start: nobody owns the session that just opened.
            if self.device.slot.current().is_none() {
                if let Err(err) = self.stop_session().await {
                    warn!(controller = %self.id, "scanner: stopping orphaned session failed: {err}");
                }
            }
            return Err(ScannerError::UseAfterDispose { operation: "start" });
        }
        info!(
            controller = %self.id,
            ?facing,
            surface = ?arguments.surface,
            has_torch = arguments.has_torch,
            "scanner: session started"
        );
        self.state.install_arguments(arguments);
        Ok(())
    }

    async fn stop_session(&self) -> Result<(), ScannerError> {
        self.device
            .methods
            .stop()
            .await
            .map_err(ScannerError::command("stop"))
    }

    async fn resolve_authorization(&self) -> Result<AuthorizationState, ScannerError> {
        let index = self
            .device
            .methods
            .authorization_state()
            .await
            .map_err(ScannerError::command("state"))?;
        let mut authorization = AuthorizationState::from_index(index).ok_or_else(|| {
            ProtocolViolation::malformed_reply("state", format!("unknown authorization index {index}"))
        })?;

        if authorization == AuthorizationState::Undetermined {
            let granted = self
                .device
                .methods
                .request_permission()
                .await
                .map_err(ScannerError::command("request"))?;
            authorization = if granted {
                AuthorizationState::Authorized
            } else {
                AuthorizationState::Denied
            };
        }

        self.state.set_authorization(authorization);
        match authorization {
            AuthorizationState::Authorized => Ok(authorization),
            _ => Err(ScannerError::Permission),
        }
    }
}

impl Drop for ScannerController {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            debug!(controller = %self.id, "scanner: controller dropped without dispose");
            task.abort();
        }
    }
}

fn analyze_hook(
    slot: &Arc<LiveSlot>,
    controller: ControllerId,
    commands: &CommandQueue,
    mode: AnalyzeMode,
) -> impl Fn() + Send + Sync + 'static {
    let slot = Arc::clone(slot);
    let commands = commands.clone();
    move || {
        if slot.is_live(controller) {
            commands.push(QueuedCommand::Analyze(mode));
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
