use super::types::{FieldValue, Record};
use crate::Result;
use std::fmt::Write;

/// Width the message column is padded to.
pub const MESSAGE_WIDTH: usize = 80;

/// Turns a record into the text delivered to the client.
pub trait RecordFormatter: Send + Sync {
    fn format(&self, record: Record) -> String;

    /// Decodes `payload` and applies [`RecordFormatter::format`].
    fn format_payload(&self, payload: &[u8]) -> Result<String> {
        Ok(self.format(Record::from_slice(payload)?))
    }
}

/// Four letter tag for a log level, `UNKNOWN` for anything unrecognised.
pub fn level_tag(level: Option<&str>) -> &'static str {
    match level {
        Some("info") => "INFO",
        Some("warning") => "WARN",
        Some("debug") => "DEBU",
        Some("error") => "ERRO",
        Some("panic") => "PANI",
        Some("fatal") => "FATA",
        _ => "UNKNOWN",
    }
}

/// Renders records as tab separated lines:
/// `LEVEL\t[time]\t[host]\tmsg(padded)\tkey=value ...\n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormatter;

impl RecordFormatter for LineFormatter {
    fn format(&self, mut record: Record) -> String {
        let host = take_text(&mut record, "host");
        record.take("topic");
        let level = take_text(&mut record, "level");
        let msg = take_text(&mut record, "msg");
        let time = take_text(&mut record, "time");

        let mut attributes = String::new();
        for (key, value) in record.iter() {
            // Writing into a String cannot fail.
            let _ = write!(attributes, "{}={} ", key, value);
        }

        format!(
            "{:>4}\t[{}]\t[{}]\t{:<width$}\t{}\n",
            level_tag(Some(level.as_str())),
            time,
            host,
            msg,
            attributes,
            width = MESSAGE_WIDTH,
        )
    }
}

fn take_text(record: &mut Record, field: &str) -> String {
    match record.take(field) {
        Some(FieldValue::String(s)) => s,
        Some(FieldValue::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
