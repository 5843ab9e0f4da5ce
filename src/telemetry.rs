use std::fmt;

use crate::cipher::Frame;

/// The plaintext prefix (as hex) of a frame carrying telemetry
pub const TELEMETRY_TAG: &str = "d15507";

/// The polarity byte (as hex) marking a temperature below zero
const NEGATIVE_POLARITY: &str = "01";

/// The reported state of a battery, as far as it has been received.
///
/// A record is built up from notification frames during a single session.
/// Each field is set independently; a later frame overwrites earlier values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryRecord {
    /// The battery voltage in V/100
    pub voltage_cv: Option<u16>,
    /// The state of charge of the battery in %
    pub state_of_charge_pct: Option<u8>,
    /// The temperature of the module in °C
    pub temperature_c: Option<i16>,
}

impl TelemetryRecord {
    /// The battery voltage in V
    pub fn voltage_v(&self) -> Option<f64> {
        self.voltage_cv.map(|cv| f64::from(cv) / 100.0)
    }

    /// True once every field has been received at least once
    pub fn is_complete(&self) -> bool {
        self.voltage_cv.is_some() && self.state_of_charge_pct.is_some() && self.temperature_c.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage_cv.is_none() && self.state_of_charge_pct.is_none() && self.temperature_c.is_none()
    }

    /// Apply the fields present in `update`, keeping the rest
    pub fn merge(&mut self, update: TelemetryRecord) {
        if update.voltage_cv.is_some() {
            self.voltage_cv = update.voltage_cv;
        }
        if update.state_of_charge_pct.is_some() {
            self.state_of_charge_pct = update.state_of_charge_pct;
        }
        if update.temperature_c.is_some() {
            self.temperature_c = update.temperature_c;
        }
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.voltage_v() {
            Some(v) => write!(f, "voltage={v:.2}V")?,
            None => write!(f, "voltage=-")?,
        }
        match self.state_of_charge_pct {
            Some(soc) => write!(f, " soc={soc}%")?,
            None => write!(f, " soc=-")?,
        }
        match self.temperature_c {
            Some(t) => write!(f, " temperature={t}°C"),
            None => write!(f, " temperature=-"),
        }
    }
}

/// Parse a decrypted frame, returning the fields it carries.
///
/// Returns `None` if the frame is not a telemetry frame.
pub fn parse_frame(decrypted: &Frame) -> Option<TelemetryRecord> {
    parse_hex(&hex::encode(decrypted))
}

/// Parse a decrypted frame given as hex.
///
/// The frame layout, in hex digit offsets, is:
///
/// Start | End | Meaning
/// 0     | 5   | The telemetry tag `d15507`
/// 6     | 7   | Temperature polarity, `01` means below zero
/// 8     | 9   | Temperature magnitude in °C
/// 12    | 13  | State of charge in %
/// 15    | 17  | Battery voltage in V/100 (12 bits)
///
/// Digits outside these ranges carry nothing we understand. A field whose
/// digits are missing or not hex is left unset rather than failing the frame.
pub fn parse_hex(message: &str) -> Option<TelemetryRecord> {
    let tag = message.get(0..6)?;
    if !tag.eq_ignore_ascii_case(TELEMETRY_TAG) {
        return None;
    }

    let negative = message.get(6..8) == Some(NEGATIVE_POLARITY);
    let temperature_c = hex_field(message, 8, 10).map(|magnitude| {
        let magnitude = magnitude as i16;
        if negative {
            -magnitude
        } else {
            magnitude
        }
    });
    let state_of_charge_pct = hex_field(message, 12, 14).map(|soc| soc as u8);
    let voltage_cv = hex_field(message, 15, 18);

    Some(TelemetryRecord { voltage_cv, state_of_charge_pct, temperature_c })
}

fn hex_field(message: &str, start: usize, end: usize) -> Option<u16> {
    message
        .get(start..end)
        .and_then(|digits| u16::from_str_radix(digits, 16).ok())
}

#[test]
fn test_parse_positive_temperature() {
    let record = parse_hex("d15507001e0032019000000000000000").unwrap();
    assert_eq!(record.temperature_c, Some(30));
    assert_eq!(record.state_of_charge_pct, Some(50));
    assert_eq!(record.voltage_cv, Some(400));
    assert_eq!(record.voltage_v(), Some(4.0));
    assert!(record.is_complete());
}

#[test]
fn test_parse_negative_temperature() {
    let record = parse_hex("d15507011e0032019000000000000000").unwrap();
    assert_eq!(record.temperature_c, Some(-30));
}

#[test]
fn test_parse_other_polarity_is_positive() {
    let record = parse_hex("d15507021e0032019000000000000000").unwrap();
    assert_eq!(record.temperature_c, Some(30));
}

#[test]
fn test_parse_ignores_untagged_frame() {
    assert_eq!(parse_hex("d15508001e0032019000000000000000"), None);
    assert_eq!(parse_hex("00000000000000000000000000000000"), None);
    assert_eq!(parse_hex("d155"), None);
}

#[test]
fn test_parse_uppercase_hex() {
    let record = parse_hex("D15507001E0032019000000000000000").unwrap();
    assert_eq!(record.temperature_c, Some(30));
    assert_eq!(record.state_of_charge_pct, Some(50));
}

#[test]
fn test_parse_voltage_precision() {
    // 0x4ed = 1261 -> 12.61V, the typical reading of a healthy lead acid battery
    let record = parse_hex("d155070014006404ed00000000000000").unwrap();
    assert_eq!(record.voltage_cv, Some(1261));
    assert_eq!(record.state_of_charge_pct, Some(100));
    assert_eq!(record.temperature_c, Some(20));
    assert_eq!(record.to_string(), "voltage=12.61V soc=100% temperature=20°C");
}

#[test]
fn test_parse_short_frame_yields_partial_update() {
    let record = parse_hex("d15507001e").unwrap();
    assert_eq!(record.temperature_c, Some(30));
    assert_eq!(record.state_of_charge_pct, None);
    assert_eq!(record.voltage_cv, None);
    assert!(!record.is_complete());
}

#[test]
fn test_parse_frame_bytes() {
    let mut frame = [0u8; 16];
    frame.copy_from_slice(&hex::decode("d15507001e0032019000000000000000").unwrap());
    assert_eq!(
        parse_frame(&frame),
        Some(TelemetryRecord { voltage_cv: Some(400), state_of_charge_pct: Some(50), temperature_c: Some(30) })
    );
}

#[test]
fn test_merge_overwrites_present_fields_only() {
    let mut record = TelemetryRecord { voltage_cv: Some(1200), state_of_charge_pct: None, temperature_c: Some(10) };
    record.merge(TelemetryRecord { voltage_cv: Some(1250), state_of_charge_pct: Some(80), temperature_c: None });
    assert_eq!(record, TelemetryRecord { voltage_cv: Some(1250), state_of_charge_pct: Some(80), temperature_c: Some(10) });
    assert!(record.is_complete());
}

#[test]
fn test_zero_values_count_as_received() {
    let record = parse_hex("d1550700000000000000000000000000").unwrap();
    assert_eq!(record, TelemetryRecord { voltage_cv: Some(0), state_of_charge_pct: Some(0), temperature_c: Some(0) });
    assert!(record.is_complete());
}

#[test]
fn test_empty_record_display() {
    let record = TelemetryRecord::default();
    assert!(record.is_empty());
    assert_eq!(record.to_string(), "voltage=- soc=- temperature=-");
}
