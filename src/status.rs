use std::collections::BTreeMap;

use crate::variables::Variables;

pub type Tags = BTreeMap<String, String>;

#[derive(Debug)]
pub struct StatusCode {
    pub token: &'static str,
    pub bit: u8,
    pub tag: &'static str,
}

// Bit layout of the apcupsd STATFLAG word. These positions are shared with
// apcupsd consumers and must never be renumbered.
pub const STATUS_CODES: [StatusCode; 8] = [
    // Runtime calibration occurring.
    StatusCode { token: "CAL", bit: 0, tag: "status_CAL" },
    // SmartTrim.
    StatusCode { token: "TRIM", bit: 1, tag: "status_TRIM" },
    // SmartBoost.
    StatusCode { token: "BOOST", bit: 2, tag: "status_BOOST" },
    // On line, the normal condition.
    StatusCode { token: "OL", bit: 3, tag: "status_OL" },
    // On battery.
    StatusCode { token: "OB", bit: 4, tag: "status_OB" },
    // Overloaded output.
    StatusCode { token: "OVER", bit: 5, tag: "status_OVER" },
    // Battery low.
    StatusCode { token: "LB", bit: 6, tag: "status_LB" },
    // Replace battery.
    StatusCode { token: "RB", bit: 7, tag: "status_RB" },
];

/// Decodes a whitespace separated status string into the flag word, adding
/// a `status_<TOKEN>` tag for each recognised code. Unknown codes are ignored.
pub fn decode(status: &str, tags: &mut Tags) -> u64 {
    let tokens: Vec<&str> = status.split_ascii_whitespace().collect();

    let mut flags = 0;
    for code in STATUS_CODES.iter() {
        if tokens.contains(&code.token) {
            flags |= 1 << code.bit;
            tags.insert(code.tag.to_string(), "true".to_string());
        }
    }
    flags
}

pub fn map_status(variables: &Variables, tags: &mut Tags) -> u64 {
    decode(&variables.text("ups.status"), tags)
}
