use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::ProtocolViolation, protocol::BARCODE_EVENT};

/// Symbology reported by the native scanner. Native codes are bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeFormat {
    #[default]
    Unknown,
    All,
    Code128,
    Code39,
    Code93,
    Codabar,
    DataMatrix,
    Ean13,
    Ean8,
    Itf,
    QrCode,
    UpcA,
    UpcE,
    Pdf417,
    Aztec,
}

impl BarcodeFormat {
    pub fn from_native_code(code: i64) -> Self {
        match code {
            0 => Self::All,
            1 => Self::Code128,
            2 => Self::Code39,
            4 => Self::Code93,
            8 => Self::Codabar,
            16 => Self::DataMatrix,
            32 => Self::Ean13,
            64 => Self::Ean8,
            128 => Self::Itf,
            256 => Self::QrCode,
            512 => Self::UpcA,
            1024 => Self::UpcE,
            2048 => Self::Pdf417,
            4096 => Self::Aztec,
            _ => Self::Unknown,
        }
    }
}

/// Semantic content type of a decoded barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeType {
    #[default]
    Unknown,
    ContactInfo,
    Email,
    Isbn,
    Phone,
    Product,
    Sms,
    Text,
    Url,
    Wifi,
    Geo,
    CalendarEvent,
    DriverLicense,
}

impl BarcodeType {
    pub fn from_native_code(code: i64) -> Self {
        match code {
            1 => Self::ContactInfo,
            2 => Self::Email,
            3 => Self::Isbn,
            4 => Self::Phone,
            5 => Self::Product,
            6 => Self::Sms,
            7 => Self::Text,
            8 => Self::Url,
            9 => Self::Wifi,
            10 => Self::Geo,
            11 => Self::CalendarEvent,
            12 => Self::DriverLicense,
            _ => Self::Unknown,
        }
    }
}

/// A decoded payload as delivered on the result stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Barcode {
    pub raw_value: Option<String>,
    pub raw_bytes: Option<Vec<u8>>,
    pub display_value: Option<String>,
    pub format: BarcodeFormat,
    pub value_type: BarcodeType,
}

impl Barcode {
    pub fn from_raw_value(raw_value: impl Into<String>) -> Self {
        Self {
            raw_value: Some(raw_value.into()),
            ..Self::default()
        }
    }

    /// Reads the map the native scanner attaches to a `barcode` event.
    pub fn from_native(data: &Value) -> Result<Self, ProtocolViolation> {
        let map = data
            .as_object()
            .ok_or_else(|| ProtocolViolation::malformed_event(BARCODE_EVENT, "expected a map"))?;

        let raw_bytes = match map.get("rawBytes") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|byte| u8::try_from(byte).ok())
                            .ok_or_else(|| {
                                ProtocolViolation::malformed_event(
                                    BARCODE_EVENT,
                                    format!("`rawBytes` entry {item} is not a byte"),
                                )
                            })
                    })
                    .collect::<Result<Vec<u8>, _>>()?,
            ),
            Some(other) => {
                return Err(ProtocolViolation::malformed_event(
                    BARCODE_EVENT,
                    format!("`rawBytes` must be a list, got {other}"),
                ))
            }
        };

        Ok(Self {
            raw_value: optional_string(map.get("rawValue")),
            raw_bytes,
            display_value: optional_string(map.get("displayValue")),
            format: map
                .get("format")
                .and_then(Value::as_i64)
                .map(BarcodeFormat::from_native_code)
                .unwrap_or_default(),
            value_type: map
                .get("type")
                .and_then(Value::as_i64)
                .map(BarcodeType::from_native_code)
                .unwrap_or_default(),
        })
    }
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_native_fields() {
        let barcode = Barcode::from_native(&json!({
            "rawValue": "https://example.org",
            "rawBytes": [104, 105],
            "displayValue": "example.org",
            "format": 256,
            "type": 8
        }))
        .expect("decode");

        assert_eq!(barcode.raw_value.as_deref(), Some("https://example.org"));
        assert_eq!(barcode.raw_bytes, Some(vec![104, 105]));
        assert_eq!(barcode.display_value.as_deref(), Some("example.org"));
        assert_eq!(barcode.format, BarcodeFormat::QrCode);
        assert_eq!(barcode.value_type, BarcodeType::Url);
    }

    #[test]
    fn missing_fields_fall_back_to_unknown() {
        let barcode = Barcode::from_native(&json!({ "format": 3 })).expect("decode");
        assert_eq!(barcode.raw_value, None);
        assert_eq!(barcode.format, BarcodeFormat::Unknown);
        assert_eq!(barcode.value_type, BarcodeType::Unknown);
    }

    #[test]
    fn rejects_out_of_range_bytes() {
        let err = Barcode::from_native(&json!({ "rawBytes": [1, 300] })).expect_err("byte range");
        assert!(err.to_string().contains("300"));
        assert!(Barcode::from_native(&json!({ "rawBytes": "abc" })).is_err());
        assert!(Barcode::from_native(&json!("abc")).is_err());
    }

    #[test]
    fn minimal_record_only_carries_raw_value() {
        let barcode = Barcode::from_raw_value("mac-payload");
        assert_eq!(barcode.raw_value.as_deref(), Some("mac-payload"));
        assert_eq!(barcode.raw_bytes, None);
        assert_eq!(barcode.format, BarcodeFormat::Unknown);
    }
}
