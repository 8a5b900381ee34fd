use std::sync::Arc;

use scanner_channel::ScannerMethodChannel;
use shared::domain::{AnalyzeMode, TorchState};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::liveness::{ControllerId, LiveSlot};

/// Commands whose replies nobody waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueuedCommand {
    Torch(TorchState),
    Analyze(AnalyzeMode),
}

impl QueuedCommand {
    fn name(self) -> &'static str {
        match self {
            QueuedCommand::Torch(_) => "torch",
            QueuedCommand::Analyze(_) => "analyze",
        }
    }
}

/// FIFO of fire-and-forget commands, drained by one task per controller.
/// Commands still queued when the controller loses liveness are dropped.
#[derive(Clone)]
pub(crate) struct CommandQueue {
    tx: mpsc::UnboundedSender<QueuedCommand>,
}

impl CommandQueue {
    pub(crate) fn spawn(
        methods: Arc<dyn ScannerMethodChannel>,
        slot: Arc<LiveSlot>,
        controller: ControllerId,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if !slot.is_live(controller) {
                    debug!(%controller, ?command, "scanner: dropping command of non-live controller");
                    continue;
                }
                let result = match command {
                    QueuedCommand::Torch(state) => methods.torch(state.index()).await,
                    QueuedCommand::Analyze(mode) => methods.analyze(mode.index()).await,
                };
                if let Err(err) = result {
                    warn!(%controller, command = command.name(), "scanner: command failed: {err}");
                }
            }
        });
        (Self { tx }, task)
    }

    pub(crate) fn push(&self, command: QueuedCommand) {
        if self.tx.send(command).is_err() {
            debug!(?command, "scanner: command queue closed");
        }
    }
}
