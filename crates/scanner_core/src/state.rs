use std::sync::atomic::{AtomicBool, Ordering};

use shared::{
    domain::{AuthorizationState, CameraFacing, TorchState},
    protocol::{FrameSize, StartReply, SurfaceHandle},
};
use tokio::sync::watch;

use crate::error::ScannerError;

/// Parameters negotiated by a successful `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerArguments {
    pub surface: SurfaceHandle,
    pub size: FrameSize,
    pub has_torch: bool,
}

impl ScannerArguments {
    pub fn from_reply(reply: StartReply) -> Result<Self, ScannerError> {
        let surface = reply
            .surface_handle()
            .ok_or_else(|| ScannerError::Initialization {
                reason: "start reply carried no texture or view id".into(),
            })?;
        Ok(Self {
            surface,
            size: reply.size,
            has_torch: reply.torchable,
        })
    }
}

/// Session snapshot owned by one controller. Every observable field is a
/// watch channel, so readers always see whole values.
pub struct SessionState {
    facing: watch::Sender<CameraFacing>,
    facing_state: watch::Sender<CameraFacing>,
    torch_state: watch::Sender<TorchState>,
    authorization: watch::Sender<AuthorizationState>,
    arguments: watch::Sender<Option<ScannerArguments>>,
    has_torch: AtomicBool,
}

impl SessionState {
    pub fn new(facing: CameraFacing) -> Self {
        Self {
            facing: watch::channel(facing).0,
            facing_state: watch::channel(facing).0,
            torch_state: watch::channel(TorchState::Off).0,
            authorization: watch::channel(AuthorizationState::Undetermined).0,
            arguments: watch::channel(None).0,
            has_torch: AtomicBool::new(false),
        }
    }

    /// The facing the next `start` will request.
    pub fn facing(&self) -> CameraFacing {
        *self.facing.borrow()
    }

    pub(crate) fn flip_facing(&self) -> CameraFacing {
        let mut flipped = CameraFacing::default();
        self.facing.send_modify(|facing| {
            *facing = facing.flipped();
            flipped = *facing;
        });
        flipped
    }

    pub(crate) fn publish_facing(&self, facing: CameraFacing) {
        self.facing_state.send_replace(facing);
    }

    /// Last torch state confirmed by the device.
    pub fn torch_state(&self) -> TorchState {
        *self.torch_state.borrow()
    }

    pub(crate) fn apply_torch_state(&self, torch: TorchState) {
        self.torch_state.send_replace(torch);
    }

    pub fn has_torch(&self) -> bool {
        self.has_torch.load(Ordering::Acquire)
    }

    pub fn authorization(&self) -> AuthorizationState {
        *self.authorization.borrow()
    }

    pub(crate) fn set_authorization(&self, authorization: AuthorizationState) {
        self.authorization.send_replace(authorization);
    }

    pub fn arguments(&self) -> Option<ScannerArguments> {
        self.arguments.borrow().clone()
    }

    /// Replaces the negotiated arguments wholesale.
    pub(crate) fn install_arguments(&self, arguments: ScannerArguments) {
        self.has_torch.store(arguments.has_torch, Ordering::Release);
        self.arguments.send_replace(Some(arguments));
    }

    pub(crate) fn clear_arguments(&self) {
        self.arguments.send_replace(None);
    }

    pub fn subscribe_facing(&self) -> watch::Receiver<CameraFacing> {
        self.facing_state.subscribe()
    }

    pub fn subscribe_torch(&self) -> watch::Receiver<TorchState> {
        self.torch_state.subscribe()
    }

    pub fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationState> {
        self.authorization.subscribe()
    }

    pub fn subscribe_arguments(&self) -> watch::Receiver<Option<ScannerArguments>> {
        self.arguments.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size() -> FrameSize {
        FrameSize {
            width: 640.0,
            height: 480.0,
        }
    }

    #[test]
    fn arguments_follow_reply_surface() {
        let arguments =
            ScannerArguments::from_reply(StartReply::view("view-3", size(), false)).expect("view");
        assert_eq!(arguments.surface, SurfaceHandle::View("view-3".into()));
        assert!(!arguments.has_torch);

        let reply = StartReply {
            torchable: true,
            texture_id: None,
            view_id: None,
            size: size(),
        };
        let err = ScannerArguments::from_reply(reply).expect_err("no surface");
        assert_eq!(err.code(), "INITIALIZATION ERROR");
    }

    #[test]
    fn starts_empty_with_requested_facing() {
        let state = SessionState::new(CameraFacing::Front);
        assert_eq!(state.facing(), CameraFacing::Front);
        assert_eq!(*state.subscribe_facing().borrow(), CameraFacing::Front);
        assert_eq!(state.torch_state(), TorchState::Off);
        assert_eq!(state.authorization(), AuthorizationState::Undetermined);
        assert!(!state.has_torch());
        assert!(state.arguments().is_none());
    }

    #[test]
    fn install_sets_capability_and_snapshot_together() {
        let state = SessionState::new(CameraFacing::Back);
        let mut observed = state.subscribe_arguments();
        state.install_arguments(
            ScannerArguments::from_reply(StartReply::texture(4, size(), true)).expect("texture"),
        );

        assert!(state.has_torch());
        assert!(observed.has_changed().expect("sender alive"));
        let snapshot = observed.borrow_and_update().clone().expect("arguments");
        assert_eq!(snapshot.surface, SurfaceHandle::Texture(4));
        assert!(snapshot.has_torch);

        state.clear_arguments();
        assert!(state.arguments().is_none());
        assert!(state.has_torch());
    }

    #[test]
    fn flip_changes_selection_but_not_published_facing() {
        let state = SessionState::new(CameraFacing::Back);
        assert_eq!(state.flip_facing(), CameraFacing::Front);
        assert_eq!(state.facing(), CameraFacing::Front);
        assert_eq!(*state.subscribe_facing().borrow(), CameraFacing::Back);

        state.publish_facing(state.facing());
        assert_eq!(*state.subscribe_facing().borrow(), CameraFacing::Front);
    }
}
