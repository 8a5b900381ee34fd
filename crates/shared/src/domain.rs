use serde::{Deserialize, Serialize};

/// Declares an enum whose variants travel over the platform channel as stable
/// integer indices.
macro_rules! indexed_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $index:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const fn index(self) -> i64 {
                match self {
                    $(Self::$variant => $index),+
                }
            }

            pub fn from_index(index: i64) -> Option<Self> {
                match index {
                    $($index => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

indexed_enum!(
    /// Which lens the device session is asked to open.
    CameraFacing { Front = 0, Back = 1 }
);

indexed_enum!(TorchState { Off = 0, On = 1 });

indexed_enum!(
    /// Camera permission as reported by the platform.
    AuthorizationState { Undetermined = 0, Authorized = 1, Denied = 2 }
);

indexed_enum!(
    /// Whether the device runs barcode analysis on preview frames.
    AnalyzeMode { None = 0, Barcode = 1 }
);

indexed_enum!(Ratio { Ratio4x3 = 0, Ratio16x9 = 1 });

impl CameraFacing {
    pub const fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

impl Default for CameraFacing {
    fn default() -> Self {
        Self::Back
    }
}

impl TorchState {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }
}

impl Default for TorchState {
    fn default() -> Self {
        Self::Off
    }
}

impl Default for AuthorizationState {
    fn default() -> Self {
        Self::Undetermined
    }
}
