//! Event-log record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical record kinds. The `data` payload schema is owned by the
/// subsystem that writes the kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Bar,
    Signal,
    Intent,
    OrderCreated,
    OrderTransition,
    Fill,
    PositionReconciled,
    Halt,
    Heartbeat,
    Metric,
}

/// One line of the log: `{"ts":"…Z","kind":"…","data":{…}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    pub kind: RecordKind,
    pub data: Value,
}

impl EventRecord {
    pub fn new(ts: DateTime<Utc>, kind: RecordKind, data: Value) -> Self {
        Self { ts, kind, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kind_serializes_screaming() {
        let j = serde_json::to_string(&RecordKind::OrderCreated).unwrap();
        assert_eq!(j, "\"ORDER_CREATED\"");
        let j = serde_json::to_string(&RecordKind::PositionReconciled).unwrap();
        assert_eq!(j, "\"POSITION_RECONCILED\"");
    }

    #[test]
    fn record_line_shape() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
        let r = EventRecord::new(ts, RecordKind::Bar, serde_json::json!({"symbol": "AAPL"}));
        let line = serde_json::to_string(&r).unwrap();
        assert!(line.starts_with("{\"ts\":\"2026-03-02T14:30:00Z\""));
        assert!(line.contains("\"kind\":\"BAR\""));
    }
}
