use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{CameraFacing, Ratio, TorchState},
    error::ProtocolViolation,
};

pub const TORCH_STATE_EVENT: &str = "torchState";
pub const BARCODE_EVENT: &str = "barcode";
pub const BARCODE_MAC_EVENT: &str = "barcodeMac";

/// Arguments of the `start` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPayload {
    pub facing: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torch: Option<bool>,
}

impl StartPayload {
    pub fn new(facing: CameraFacing, ratio: Option<Ratio>, torch: Option<bool>) -> Self {
        Self {
            facing: facing.index(),
            ratio: ratio.map(Ratio::index),
            torch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: f64,
    pub height: f64,
}

/// Where the embedding application finds the preview surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceHandle {
    /// Native texture registered with the host renderer.
    Texture(i64),
    /// Platform view element (web builds).
    View(String),
}

/// Reply of the `start` command. The device answers with either a texture id
/// or a view id depending on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartReply {
    pub torchable: bool,
    #[serde(rename = "textureId", default, skip_serializing_if = "Option::is_none")]
    pub texture_id: Option<i64>,
    #[serde(rename = "ViewID", default, skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,
    pub size: FrameSize,
}

impl StartReply {
    pub fn texture(texture_id: i64, size: FrameSize, torchable: bool) -> Self {
        Self {
            torchable,
            texture_id: Some(texture_id),
            view_id: None,
            size,
        }
    }

    pub fn view(view_id: impl Into<String>, size: FrameSize, torchable: bool) -> Self {
        Self {
            torchable,
            texture_id: None,
            view_id: Some(view_id.into()),
            size,
        }
    }

    pub fn surface_handle(&self) -> Option<SurfaceHandle> {
        match (&self.texture_id, &self.view_id) {
            (Some(texture_id), _) => Some(SurfaceHandle::Texture(*texture_id)),
            (None, Some(view_id)) => Some(SurfaceHandle::View(view_id.clone())),
            (None, None) => None,
        }
    }
}

/// A record as it arrives on the event channel, before interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeviceEvent {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl RawDeviceEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn torch_state(state: TorchState) -> Self {
        Self::new(TORCH_STATE_EVENT, Value::from(state.index()))
    }

    pub fn barcode(native: Value) -> Self {
        Self::new(BARCODE_EVENT, native)
    }

    pub fn barcode_mac(payload: impl Into<String>) -> Self {
        Self::new(
            BARCODE_MAC_EVENT,
            serde_json::json!({ "payload": payload.into() }),
        )
    }
}

/// Closed set of events the device subsystem may push.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    TorchState(TorchState),
    /// Device-native barcode structure, decoded later by a barcode decoder.
    Barcode(Value),
    /// Reduced barcode record sent by the macOS backend.
    BarcodeMac { payload: String },
    Unknown { name: String },
}

impl DeviceEvent {
    /// Interprets a raw record. Unrecognized tags come back as
    /// [`DeviceEvent::Unknown`]; known tags with unusable data are violations.
    pub fn decode(raw: RawDeviceEvent) -> Result<Self, ProtocolViolation> {
        let RawDeviceEvent { name, data } = raw;
        match name.as_str() {
            TORCH_STATE_EVENT => {
                let index = data.as_i64().ok_or_else(|| {
                    ProtocolViolation::malformed_event(&name, format!("expected integer, got {data}"))
                })?;
                TorchState::from_index(index)
                    .map(DeviceEvent::TorchState)
                    .ok_or_else(|| {
                        ProtocolViolation::malformed_event(
                            &name,
                            format!("unknown torch state index {index}"),
                        )
                    })
            }
            BARCODE_EVENT => {
                if !data.is_object() {
                    return Err(ProtocolViolation::malformed_event(
                        &name,
                        "expected a barcode map",
                    ));
                }
                Ok(DeviceEvent::Barcode(data))
            }
            BARCODE_MAC_EVENT => {
                let payload = data
                    .get("payload")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ProtocolViolation::malformed_event(&name, "missing string `payload`")
                    })?;
                Ok(DeviceEvent::BarcodeMac {
                    payload: payload.to_string(),
                })
            }
            _ => Ok(DeviceEvent::Unknown { name: name.clone() }),
        }
    }
}
