use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Identity token minted for every controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(Uuid);

impl ControllerId {
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a non-live controller reacts to calls that must not be suppressed
/// silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPolicy {
    /// Return `ScannerError::UseAfterDispose`.
    Report,
    /// Panic with the offending operation's name.
    Panic,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::Report
        }
    }
}

/// The single "which controller owns the device" slot shared by every
/// controller attached to the same hardware.
#[derive(Debug)]
pub struct LiveSlot {
    current: watch::Sender<Option<ControllerId>>,
}

impl Default for LiveSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveSlot {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    pub fn current(&self) -> Option<ControllerId> {
        *self.current.borrow()
    }

    pub fn is_live(&self, id: ControllerId) -> bool {
        self.current() == Some(id)
    }

    /// Makes `id` the live controller, returning the one it replaced.
    pub(crate) fn install(&self, id: ControllerId) -> Option<ControllerId> {
        self.current.send_replace(Some(id))
    }

    /// Clears the slot if `id` still holds it.
    pub(crate) fn revoke(&self, id: ControllerId) -> bool {
        self.current.send_if_modified(|current| {
            if *current == Some(id) {
                *current = None;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Option<ControllerId>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_replaces_previous_holder() {
        let slot = LiveSlot::new();
        let first = ControllerId::mint();
        let second = ControllerId::mint();

        assert_eq!(slot.install(first), None);
        assert!(slot.is_live(first));
        assert_eq!(slot.install(second), Some(first));
        assert!(!slot.is_live(first));
        assert!(slot.is_live(second));
    }

    #[test]
    fn revoke_only_clears_own_token() {
        let slot = LiveSlot::new();
        let first = ControllerId::mint();
        let second = ControllerId::mint();
        slot.install(first);
        slot.install(second);

        assert!(!slot.revoke(first));
        assert_eq!(slot.current(), Some(second));
        assert!(slot.revoke(second));
        assert_eq!(slot.current(), None);
        assert!(!slot.revoke(second));
    }

    #[tokio::test]
    async fn watchers_observe_revocation() {
        let slot = LiveSlot::new();
        let id = ControllerId::mint();
        slot.install(id);
        let mut watcher = slot.watch();
        let _ = watcher.borrow_and_update();

        slot.revoke(id);
        watcher.changed().await.expect("slot alive");
        assert_eq!(*watcher.borrow(), None);
    }
}
