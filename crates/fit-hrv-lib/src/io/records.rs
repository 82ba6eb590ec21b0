use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Decoded activity-log record, one per line of the input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// Explicit time zero for elapsed-time output.
    Start { timestamp: DateTime<Utc> },
    HeartRate {
        timestamp: DateTime<Utc>,
        #[serde(default)]
        heart_rate: Option<f64>,
    },
    /// Batch of R-R intervals in milliseconds; `null` marks an empty slot.
    Intervals {
        #[serde(default)]
        values: Vec<Option<f64>>,
    },
    Event {
        timestamp: DateTime<Utc>,
        #[serde(default)]
        event: Option<String>,
        #[serde(default)]
        event_type: Option<String>,
        #[serde(default)]
        data: Option<Value>,
    },
    Session {
        timestamp: DateTime<Utc>,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },
    Lap {
        timestamp: DateTime<Utc>,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },
}

impl Record {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Record::Start { timestamp }
            | Record::HeartRate { timestamp, .. }
            | Record::Event { timestamp, .. }
            | Record::Session { timestamp, .. }
            | Record::Lap { timestamp, .. } => Some(*timestamp),
            Record::Intervals { .. } => None,
        }
    }

    /// Human readable listing for events, sessions and laps.
    pub fn summary(&self) -> Option<String> {
        match self {
            Record::Event {
                timestamp,
                event,
                event_type,
                data,
            } => Some(format!(
                "{} Event: {} {} {}",
                timestamp,
                event.as_deref().unwrap_or("-"),
                event_type.as_deref().unwrap_or("-"),
                data.as_ref().map(display_value).unwrap_or_else(|| "-".into())
            )),
            Record::Session { timestamp, fields } => Some(summarize_fields(timestamp, "session", fields)),
            Record::Lap { timestamp, fields } => Some(summarize_fields(timestamp, "lap", fields)),
            _ => None,
        }
    }
}

fn summarize_fields(timestamp: &DateTime<Utc>, name: &str, fields: &BTreeMap<String, Value>) -> String {
    let mut out = format!("{} {}", timestamp, name);
    for (key, value) in fields {
        if value.is_null() || key == "timestamp" {
            continue;
        }
        let _ = write!(out, "\n        {} : {}", key, display_value(value));
    }
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse newline-delimited JSON records, ignoring blank/comment lines.
pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: Record = serde_json::from_str(trimmed)
            .with_context(|| format!("line {} is not a valid record: {}", idx + 1, trimmed))?;
        out.push(record);
    }
    if out.is_empty() {
        anyhow::bail!("no records found");
    }
    Ok(out)
}

/// Read newline-delimited JSON records from disk.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_records(&text)
}

/// Time zero of the stream: an explicit start record, else the first heart-rate sample.
pub fn stream_start(records: &[Record]) -> Option<DateTime<Utc>> {
    records.iter().find_map(|record| match record {
        Record::Start { timestamp } | Record::HeartRate { timestamp, .. } => Some(*timestamp),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"
# decoded ride
{"kind":"event","timestamp":"2014-05-01T10:00:00Z","event":"timer","event_type":"start","data":0}
{"kind":"heart_rate","timestamp":"2014-05-01T10:00:01Z","heart_rate":61}
{"kind":"intervals","values":[985.0,null,1002.0]}
{"kind":"heart_rate","timestamp":"2014-05-01T10:00:02Z"}

{"kind":"lap","timestamp":"2014-05-01T10:30:00Z","fields":{"total_distance":10021.5,"sport":"cycling","avg_heart_rate":null}}
"#;

    #[test]
    fn parses_tagged_records() {
        let records = parse_records(SAMPLE).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(
            records[1],
            Record::HeartRate {
                timestamp: Utc.with_ymd_and_hms(2014, 5, 1, 10, 0, 1).unwrap(),
                heart_rate: Some(61.0),
            }
        );
        assert_eq!(
            records[2],
            Record::Intervals {
                values: vec![Some(985.0), None, Some(1002.0)],
            }
        );
        assert!(matches!(
            records[3],
            Record::HeartRate {
                heart_rate: None,
                ..
            }
        ));
    }

    #[test]
    fn reports_offending_line() {
        let err = parse_records("{\"kind\":\"heart_rate\"}\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
        assert!(parse_records("# nothing\n\n").is_err());
    }

    #[test]
    fn start_prefers_explicit_marker() {
        let records = parse_records(SAMPLE).unwrap();
        assert_eq!(
            stream_start(&records),
            Some(Utc.with_ymd_and_hms(2014, 5, 1, 10, 0, 1).unwrap())
        );
        let mut with_start = vec![Record::Start {
            timestamp: Utc.with_ymd_and_hms(2014, 5, 1, 9, 59, 0).unwrap(),
        }];
        with_start.extend(records);
        assert_eq!(
            stream_start(&with_start),
            Some(Utc.with_ymd_and_hms(2014, 5, 1, 9, 59, 0).unwrap())
        );
    }

    #[test]
    fn summaries_skip_null_fields() {
        let records = parse_records(SAMPLE).unwrap();
        let event = records[0].summary().unwrap();
        assert!(event.contains("Event: timer start 0"));
        let lap = records[4].summary().unwrap();
        assert!(lap.contains("lap"));
        assert!(lap.contains("sport : cycling"));
        assert!(lap.contains("total_distance : 10021.5"));
        assert!(!lap.contains("avg_heart_rate"));
        assert!(records[1].summary().is_none());
    }
}
