//! Stream protocol: JSON objects discriminated by `type`.

use crate::error::RelayError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Alert identifier; the backend uses both numeric and string ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertId {
    Number(i64),
    Text(String),
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertId::Number(n) => write!(f, "{}", n),
            AlertId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub alert_id: Option<AlertId>,
    pub camera_id: i64,
    pub severity: Severity,
    pub incident_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Any further keys (verification_id, persons_*, snapshot_path, ...)
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Frame {
    pub camera_id: i64,
    /// Base64-encoded image
    pub frame: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "ALERT")]
    Alert(Alert),
    #[serde(rename = "FRAME")]
    Frame(Frame),
    #[serde(rename = "STATS")]
    Stats(Map<String, Value>),
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Alert(_) => "ALERT",
            StreamEvent::Frame(_) => "FRAME",
            StreamEvent::Stats(_) => "STATS",
        }
    }
}

/// Parse one raw stream payload.
///
/// Invalid JSON, a missing or unknown `type` and a malformed body all
/// come back as `PARSE_ERROR`.
pub fn parse_event(raw: &str) -> Result<StreamEvent, RelayError> {
    serde_json::from_str(raw).map_err(|e| RelayError::Parse(e.to_string()))
}

/// RFC 3339, or a naive ISO-8601 datetime taken as UTC
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_alert() {
        let event = parse_event(
            r#"{"type":"ALERT","alert_id":7,"camera_id":3,"severity":"HIGH",
                "incident_type":"TAILGATING","message":"2 unauthorized persons",
                "timestamp":"2026-03-14T09:30:00Z"}"#,
        )
        .unwrap();

        let StreamEvent::Alert(alert) = event else {
            panic!("expected alert");
        };
        assert_eq!(alert.alert_id, Some(AlertId::Number(7)));
        assert_eq!(alert.camera_id, 3);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.message, "2 unauthorized persons");
        assert!(alert.details.is_empty());
    }

    #[test]
    fn test_parse_backend_alert_without_id_or_message() {
        let event = parse_event(
            r#"{"type":"ALERT","camera_id":1,"severity":"MEDIUM",
                "incident_type":"VERIFICATION_PENDING",
                "timestamp":"2026-03-14T09:30:00.123456",
                "verification_id":"c0ffee","persons_detected":2}"#,
        )
        .unwrap();

        let StreamEvent::Alert(alert) = event else {
            panic!("expected alert");
        };
        assert_eq!(alert.alert_id, None);
        assert_eq!(alert.message, "");
        assert_eq!(
            alert.timestamp,
            "2026-03-14T09:30:00.123456Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(alert.details.get("verification_id"), Some(&json!("c0ffee")));
        assert_eq!(alert.details.get("persons_detected"), Some(&json!(2)));
        assert!(!alert.details.contains_key("type"));
    }

    #[test]
    fn test_parse_string_alert_id() {
        let event = parse_event(
            r#"{"type":"ALERT","alert_id":"a-19","camera_id":2,"severity":"LOW",
                "incident_type":"GUEST_VERIFIED","timestamp":"2026-03-14T09:30:00+05:30"}"#,
        )
        .unwrap();
        let StreamEvent::Alert(alert) = event else {
            panic!("expected alert");
        };
        assert_eq!(alert.alert_id, Some(AlertId::Text("a-19".into())));
        assert_eq!(alert.timestamp.to_rfc3339(), "2026-03-14T04:00:00+00:00");
    }

    #[test]
    fn test_parse_frame_and_stats() {
        assert_eq!(
            parse_event(r#"{"type":"FRAME","camera_id":1,"frame":"aGVsbG8="}"#).unwrap(),
            StreamEvent::Frame(Frame {
                camera_id: 1,
                frame: "aGVsbG8=".into()
            })
        );

        let StreamEvent::Stats(stats) =
            parse_event(r#"{"type":"STATS","total_incidents":4,"active_cameras":2}"#).unwrap()
        else {
            panic!("expected stats");
        };
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.get("total_incidents"), Some(&json!(4)));
    }

    #[test]
    fn test_parse_rejects_bad_payloads() {
        for raw in [
            "not json",
            r#"{"camera_id":1,"frame":"x"}"#,
            r#"{"type":"HEARTBEAT"}"#,
            r#"{"type":"FRAME","camera_id":"one","frame":"x"}"#,
            r#"{"type":"ALERT","camera_id":1,"severity":"CRITICAL","incident_type":"X","timestamp":"2026-03-14T09:30:00Z"}"#,
            r#"{"type":"ALERT","camera_id":1,"severity":"LOW","incident_type":"X","timestamp":"yesterday"}"#,
        ] {
            let err = parse_event(raw).unwrap_err();
            assert_eq!(err.code(), "PARSE_ERROR", "{}", raw);
        }
    }
}
