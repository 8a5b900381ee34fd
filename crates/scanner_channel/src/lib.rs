use anyhow::anyhow;
use async_trait::async_trait;
use shared::protocol::{RawDeviceEvent, StartPayload, StartReply};
use tokio::sync::broadcast;

mod loopback;

pub use loopback::{DeviceCall, LoopbackScanner};

/// Request/response side of the platform boundary.
///
/// `torch` and `analyze` are fire-and-forget from the controller's point of
/// view: their results are logged, never surfaced. `stop` must succeed when no
/// session is running.
#[async_trait]
pub trait ScannerMethodChannel: Send + Sync {
    /// Current camera authorization as an `AuthorizationState` index.
    async fn authorization_state(&self) -> anyhow::Result<i64>;
    /// Shows the platform permission prompt; `true` when access was granted.
    async fn request_permission(&self) -> anyhow::Result<bool>;
    async fn start(&self, payload: StartPayload) -> anyhow::Result<Option<StartReply>>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn torch(&self, state: i64) -> anyhow::Result<()>;
    async fn analyze(&self, mode: i64) -> anyhow::Result<()>;
}

/// Push side of the platform boundary. Each call opens a new subscription that
/// observes events in the order the device emitted them.
pub trait ScannerEventChannel: Send + Sync {
    fn subscribe_events(&self) -> broadcast::Receiver<RawDeviceEvent>;
}

pub struct MissingScannerMethodChannel;

#[async_trait]
impl ScannerMethodChannel for MissingScannerMethodChannel {
    async fn authorization_state(&self) -> anyhow::Result<i64> {
        Err(anyhow!("scanner method channel is unavailable"))
    }

    async fn request_permission(&self) -> anyhow::Result<bool> {
        Err(anyhow!("scanner method channel is unavailable"))
    }

    async fn start(&self, _payload: StartPayload) -> anyhow::Result<Option<StartReply>> {
        Err(anyhow!("scanner method channel is unavailable"))
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn torch(&self, _state: i64) -> anyhow::Result<()> {
        Err(anyhow!("scanner method channel is unavailable"))
    }

    async fn analyze(&self, _mode: i64) -> anyhow::Result<()> {
        Err(anyhow!("scanner method channel is unavailable"))
    }
}

/// Event channel that never delivers anything; subscriptions end immediately.
pub struct MissingScannerEventChannel;

impl ScannerEventChannel for MissingScannerEventChannel {
    fn subscribe_events(&self) -> broadcast::Receiver<RawDeviceEvent> {
        let (_, receiver) = broadcast::channel(1);
        receiver
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
