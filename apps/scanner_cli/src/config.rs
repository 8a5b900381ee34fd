use std::{collections::HashMap, fs, path::Path};

use scanner_core::{ControllerOptions, LivenessPolicy};
use serde::de::DeserializeOwned;
use shared::domain::{AuthorizationState, CameraFacing, Ratio};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub facing: CameraFacing,
    pub ratio: Option<Ratio>,
    pub torch: Option<bool>,
    /// Authorization the loopback device reports before any request.
    pub authorization: AuthorizationState,
    pub liveness: LivenessPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            facing: CameraFacing::Back,
            ratio: None,
            torch: None,
            authorization: AuthorizationState::Undetermined,
            liveness: LivenessPolicy::Report,
        }
    }
}

impl Settings {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            facing: self.facing,
            ratio: self.ratio,
            torch_enabled: self.torch,
            liveness: self.liveness,
        }
    }
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => apply(&mut settings, |key| file_cfg.get(key).cloned()),
            Err(err) => warn!(path = %path.display(), "ignoring unreadable scanner config: {err}"),
        }
    }

    apply(&mut settings, |key| {
        std::env::var(format!("SCANNER_{}", key.to_uppercase())).ok()
    });

    settings
}

/// Parses a value by its serialized name, e.g. `"front"` or `"ratio16x9"`.
pub fn parse_named<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase())).ok()
}

fn apply(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("facing") {
        match parse_named(&v) {
            Some(facing) => settings.facing = facing,
            None => warn!(value = %v, "ignoring unknown facing"),
        }
    }
    if let Some(v) = lookup("ratio") {
        match parse_named(&v) {
            Some(ratio) => settings.ratio = Some(ratio),
            None => warn!(value = %v, "ignoring unknown ratio"),
        }
    }
    if let Some(v) = lookup("torch") {
        match v.trim().parse::<bool>() {
            Ok(torch) => settings.torch = Some(torch),
            Err(_) => warn!(value = %v, "ignoring non-boolean torch flag"),
        }
    }
    if let Some(v) = lookup("authorization") {
        match parse_named(&v) {
            Some(authorization) => settings.authorization = authorization,
            None => warn!(value = %v, "ignoring unknown authorization state"),
        }
    }
    if let Some(v) = lookup("liveness") {
        match parse_named(&v) {
            Some(liveness) => settings.liveness = liveness,
            None => warn!(value = %v, "ignoring unknown liveness policy"),
        }
    }
}
