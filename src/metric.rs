use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use tracing::warn;

use crate::status::{self, Tags};
use crate::variables::{Value, Variables};

pub type Fields = BTreeMap<String, Option<Value>>;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

// Output field name, source variable. Passed through untouched.
const PASSTHROUGH_FIELDS: [(&str, &str); 13] = [
    ("ups.status", "ups.status"),
    ("input_voltage", "input.voltage"),
    ("load_percent", "ups.load"),
    ("battery_charge_percent", "battery.charge"),
    ("output_voltage", "output.voltage"),
    ("internal_temp", "ups.temperature"),
    ("battery_voltage", "battery.voltage"),
    ("input_frequency", "input.frequency"),
    ("nominal_input_voltage", "input.voltage.nominal"),
    ("nominal_battery_voltage", "battery.voltage.nominal"),
    ("nominal_power", "ups.realpower.nominal"),
    ("firmware", "ups.firmware"),
    ("battery_date", "battery.mfr.date"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub tags: Tags,
    pub fields: Fields,
}

/// Turns device variables into metrics. Holds the one-shot warning for a
/// `battery.runtime` that is not an integer.
#[derive(Debug, Default)]
pub struct MetricBuilder {
    runtime_warning_issued: AtomicBool,
}

impl MetricBuilder {
    pub fn new() -> MetricBuilder {
        MetricBuilder::default()
    }

    pub fn build(&self, name: &str, variables: &Variables) -> Metric {
        let mut tags = Tags::new();
        tags.insert("serial".to_string(), variables.text("device.serial"));
        tags.insert("ups_name".to_string(), name.to_string());
        tags.insert("model".to_string(), variables.text("device.model"));

        // apcupsd compatible bit word.
        let status = status::map_status(variables, &mut tags);

        let mut fields = Fields::new();
        fields.insert("status_flags".to_string(), Some(Value::UInt(status)));
        for (field, source) in PASSTHROUGH_FIELDS.iter() {
            fields.insert(field.to_string(), variables.get(source).cloned());
        }

        let time_left_ns = self.runtime_seconds(variables).saturating_mul(NANOS_PER_SECOND);
        fields.insert("time_left_ns".to_string(), Some(Value::Int(time_left_ns)));

        Metric { tags, fields }
    }

    // Anything other than an integer falls back to zero, warning only once.
    fn runtime_seconds(&self, variables: &Variables) -> i64 {
        match variables.get("battery.runtime") {
            Some(Value::Int(seconds)) => *seconds,
            other => {
                if !self.runtime_warning_issued.swap(true, Ordering::Relaxed) {
                    warn!("'battery.runtime' type is not int64: {:?}", other);
                }
                0
            }
        }
    }

    #[cfg(test)]
    pub fn runtime_warning_issued(&self) -> bool {
        self.runtime_warning_issued.load(Ordering::Relaxed)
    }
}
