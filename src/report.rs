use std::collections::BTreeMap;
use std::fmt;

use crate::telemetry::TelemetryRecord;

/// Slots for the voltage of devices 1, 2 and 3
const VOLTAGE_SLOTS: [u8; 3] = [1, 2, 3];
/// Slots for the state of charge of devices 1, 2 and 3
const STATE_OF_CHARGE_SLOTS: [u8; 3] = [4, 5, 6];
/// Slots for the temperature of the first two devices that returned data
const TEMPERATURE_SLOTS: [u8; 2] = [7, 8];

/// A scalar reported in a slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Rendered with two decimal places
    Decimal(f64),
    Integer(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Decimal(v) => write!(f, "{v:.2}"),
            Value::Integer(v) => write!(f, "{v}"),
        }
    }
}

/// The readings of one cycle, laid out in numbered slots.
///
/// Slot | Content
/// 1-3  | Voltage of devices 1-3
/// 4-6  | State of charge of devices 1-3
/// 7-8  | Temperature of the first two devices that returned data
///
/// Voltage and state of charge stay in their device's slot when an earlier
/// device fails. Slots without a value are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    slots: BTreeMap<u8, Value>,
}

impl CycleReport {
    /// Build a report from per-device results, in configured device order.
    /// `None` marks a device that returned no data.
    pub fn build(records: &[Option<TelemetryRecord>]) -> Self {
        let mut slots = BTreeMap::new();

        for (record, slot) in records.iter().zip(VOLTAGE_SLOTS) {
            if let Some(v) = record.and_then(|r| r.voltage_v()) {
                slots.insert(slot, Value::Decimal(v));
            }
        }

        for (record, slot) in records.iter().zip(STATE_OF_CHARGE_SLOTS) {
            if let Some(soc) = record.and_then(|r| r.state_of_charge_pct) {
                slots.insert(slot, Value::Integer(soc.into()));
            }
        }

        for (record, slot) in records.iter().flatten().zip(TEMPERATURE_SLOTS) {
            if let Some(t) = record.temperature_c {
                slots.insert(slot, Value::Integer(t.into()));
            }
        }

        Self { slots }
    }

    pub fn get(&self, slot: u8) -> Option<Value> {
        self.slots.get(&slot).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Named fields (`field1`..`field8`) and their rendered values, in slot order
    pub fn fields(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.slots
            .iter()
            .map(|(slot, value)| (format!("field{slot}"), value.to_string()))
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self.fields().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", fields.join(" "))
    }
}

#[cfg(test)]
fn record(voltage_cv: u16, soc: u8, temperature_c: i16) -> Option<TelemetryRecord> {
    Some(TelemetryRecord {
        voltage_cv: Some(voltage_cv),
        state_of_charge_pct: Some(soc),
        temperature_c: Some(temperature_c),
    })
}

#[test]
fn test_build_all_devices() {
    let report = CycleReport::build(&[record(1261, 90, 21), record(1255, 85, -3), record(1240, 70, 19)]);
    assert_eq!(report.to_string(), "field1=12.61 field2=12.55 field3=12.40 field4=90 field5=85 field6=70 field7=21 field8=-3");
    assert_eq!(report.len(), 8);
}

#[test]
fn test_failed_device_keeps_its_slot_empty() {
    let report = CycleReport::build(&[record(1261, 90, 21), None, record(1240, 70, 19)]);
    assert_eq!(report.get(1), Some(Value::Decimal(12.61)));
    assert_eq!(report.get(2), None);
    assert_eq!(report.get(3), Some(Value::Decimal(12.40)));
    assert_eq!(report.get(4), Some(Value::Integer(90)));
    assert_eq!(report.get(5), None);
    assert_eq!(report.get(6), Some(Value::Integer(70)));
}

#[test]
fn test_temperature_from_first_two_successful_devices() {
    let report = CycleReport::build(&[None, record(1255, 85, -3), record(1240, 70, 19)]);
    assert_eq!(report.get(7), Some(Value::Integer(-3)));
    assert_eq!(report.get(8), Some(Value::Integer(19)));

    let report = CycleReport::build(&[record(1261, 90, 21), record(1255, 85, -3), record(1240, 70, 19)]);
    assert_eq!(report.get(7), Some(Value::Integer(21)));
    assert_eq!(report.get(8), Some(Value::Integer(-3)));
}

#[test]
fn test_absent_fields_are_omitted() {
    let partial = Some(TelemetryRecord { voltage_cv: Some(1261), state_of_charge_pct: None, temperature_c: None });
    let report = CycleReport::build(&[partial]);
    assert_eq!(report.fields().collect::<Vec<_>>(), vec![("field1".to_string(), "12.61".to_string())]);
}

#[test]
fn test_zero_values_are_reported() {
    let report = CycleReport::build(&[record(0, 0, 0)]);
    assert_eq!(report.to_string(), "field1=0.00 field4=0 field7=0");
}

#[test]
fn test_no_data_gives_empty_report() {
    assert!(CycleReport::build(&[None, None, None]).is_empty());
    assert!(CycleReport::build(&[]).is_empty());
    assert!(CycleReport::build(&[Some(TelemetryRecord::default())]).is_empty());
}

#[test]
fn test_devices_beyond_schema_are_ignored() {
    let report = CycleReport::build(&[record(1200, 1, 1), record(1200, 2, 2), record(1200, 3, 3), record(1300, 4, 4)]);
    assert_eq!(report.len(), 8);
    assert_eq!(report.get(6), Some(Value::Integer(3)));
}
