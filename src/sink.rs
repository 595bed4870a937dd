use std::{
    io::Write,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, error};

use crate::metric::Fields;
use crate::status::Tags;
use crate::variables::Value;

pub trait MetricSink {
    fn add_fields(&mut self, measurement: &str, fields: &Fields, tags: &Tags);
}

pub struct LineProtocolSink<W: Write> {
    out: W,
    host: Option<String>,
}

impl<W: Write> LineProtocolSink<W> {
    pub fn new(out: W) -> LineProtocolSink<W> {
        let host = match hostname::get() {
            Ok(name) => Some(name.to_string_lossy().into_owned()),
            Err(e) => {
                debug!("No hostname for the host tag: {}", e);
                None
            }
        };
        LineProtocolSink { out, host }
    }

    #[cfg(test)]
    pub fn with_host(out: W, host: Option<String>) -> LineProtocolSink<W> {
        LineProtocolSink { out, host }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricSink for LineProtocolSink<W> {
    fn add_fields(&mut self, measurement: &str, fields: &Fields, tags: &Tags) {
        let timestamp = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos(),
            Err(_) => 0,
        };
        let line = match render(measurement, fields, tags, self.host.as_deref(), timestamp) {
            Some(line) => line,
            None => {
                debug!("Dropping {} metric with no fields.", measurement);
                return;
            }
        };

        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            error!("Failed to write metric: {}", e);
        }
    }
}

// Renders one line, or `None` when every field is absent.
pub fn render(
    measurement: &str,
    fields: &Fields,
    tags: &Tags,
    host: Option<&str>,
    timestamp: u128,
) -> Option<String> {
    let fields: Vec<String> = fields
        .iter()
        .filter_map(|(key, value)| {
            let value = match value.as_ref()? {
                Value::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
                Value::Int(i) => format!("{}i", i),
                // Written signed, plain InfluxDB 1.x refuses the `u` suffix.
                Value::UInt(u) => format!("{}i", i64::try_from(*u).unwrap_or(i64::MAX)),
                // No literal exists for NaN or infinity.
                Value::Float(x) if !x.is_finite() => return None,
                Value::Float(x) => format!("{}", x),
            };
            Some(format!("{}={}", escape(key), value))
        })
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(measurement);
    let host = host.filter(|_| !tags.contains_key("host"));
    let mut tags: Vec<(&str, &str)> = tags
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(host.map(|h| ("host", h)))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    tags.sort();
    for (key, value) in tags {
        line.push_str(&format!(",{}={}", escape(key), escape(value)));
    }

    line.push(' ');
    line.push_str(&fields.join(","));
    line.push_str(&format!(" {}", timestamp));
    Some(line)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}
