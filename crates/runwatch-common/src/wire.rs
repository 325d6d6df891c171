//! Persisted document shape and codec for scheduled alerts.
//!
//! Canonical field names (written on every encode):
//!
//! ```text
//! {id, instanceId, instanceName, region, threshold, launchTime, scheduledTime,
//!  status, notificationSent, deleted, deliveryToken, instanceState, createdAt}
//! ```
//!
//! Field aliasing for records written by older clients (decode only):
//!
//! | canonical       | also accepted              |
//! |-----------------|----------------------------|
//! | `instanceId`    | `instanceID`               |
//! | `deliveryToken` | `fcmToken`, `deviceToken`  |
//! | `status`        | value `"active"` = pending |
//!
//! An alias is only honoured when the canonical name is absent; a document
//! carrying both spellings is rejected as a duplicate field. Unknown fields
//! (`hours`, `minutes`, `type`, `regions`, ...) are ignored.
//!
//! Timestamps are written as RFC 3339 in UTC with `Z` and the shortest of
//! 0/3/6/9 fractional digits that represents the value exactly, so a
//! canonical document re-encodes byte-for-byte. On decode, integer epoch
//! milliseconds and `{_seconds, _nanoseconds}` objects are also accepted.

use crate::types::{HistoryRecord, ScheduledAlert};

/// Encodes a scheduled alert into its canonical JSON document.
pub fn encode_alert(alert: &ScheduledAlert) -> serde_json::Result<String> {
    serde_json::to_string(alert)
}

/// Decodes a scheduled alert document, applying the aliasing rules above.
pub fn decode_alert(doc: &str) -> serde_json::Result<ScheduledAlert> {
    serde_json::from_str(doc)
}

pub fn encode_history(record: &HistoryRecord) -> serde_json::Result<String> {
    serde_json::to_string(record)
}

pub fn decode_history(doc: &str) -> serde_json::Result<HistoryRecord> {
    serde_json::from_str(doc)
}

/// `#[serde(with = "timestamp")]` helpers for `DateTime<Utc>`.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Millis(i64),
        Parts {
            #[serde(rename = "_seconds", alias = "seconds")]
            seconds: i64,
            #[serde(default, rename = "_nanoseconds", alias = "nanoseconds")]
            nanos: u32,
        },
    }

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, String> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid RFC 3339 timestamp '{s}': {e}"))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => parse(&s).map_err(de::Error::custom),
            Repr::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| de::Error::custom(format!("epoch millis out of range: {ms}"))),
            Repr::Parts { seconds, nanos } => DateTime::from_timestamp(seconds, nanos)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {seconds}s"))),
        }
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapped(#[serde(with = "super")] DateTime<Utc>);

            Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(ts)| ts))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKey, AlertStatus};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn sample() -> ScheduledAlert {
        let launch = Utc.with_ymd_and_hms(2024, 3, 9, 22, 15, 7).unwrap()
            + Duration::nanoseconds(123_456_789);
        let created = Utc.with_ymd_and_hms(2024, 3, 9, 22, 16, 0).unwrap()
            + Duration::milliseconds(250);
        ScheduledAlert::materialize(
            &AlertKey::new("us-east-1", "i-0abc", 90),
            "build-box",
            launch,
            "device-token-1",
            created,
        )
        .unwrap()
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let alert = sample();
        let doc = encode_alert(&alert).unwrap();
        let decoded = decode_alert(&doc).unwrap();
        assert_eq!(decoded, alert);
        assert_eq!(decoded.launch_time.timestamp_subsec_nanos(), 123_456_789);
        assert_eq!(encode_alert(&decoded).unwrap(), doc);
    }

    #[test]
    fn canonical_document_shape() {
        let doc: serde_json::Value = serde_json::from_str(&encode_alert(&sample()).unwrap()).unwrap();
        let obj = doc.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "createdAt",
                "deleted",
                "deliveryToken",
                "id",
                "instanceId",
                "instanceName",
                "instanceState",
                "launchTime",
                "notificationSent",
                "region",
                "scheduledTime",
                "status",
                "threshold",
            ]
        );
        assert_eq!(obj["threshold"], 90);
        assert_eq!(obj["launchTime"], "2024-03-09T22:15:07.123456789Z");
        assert_eq!(obj["createdAt"], "2024-03-09T22:16:00.250Z");
    }

    #[test]
    fn legacy_document_decodes_through_aliases() {
        let doc = r#"{
            "id": "us-east-1_i-9_60",
            "instanceID": "i-9",
            "instanceName": "legacy",
            "region": "us-east-1",
            "hours": 1,
            "minutes": 0,
            "threshold": 60,
            "launchTime": 1709900000000,
            "scheduledTime": {"_seconds": 1709903600, "_nanoseconds": 0},
            "status": "active",
            "notificationSent": false,
            "deleted": false,
            "fcmToken": "tok",
            "instanceState": "running",
            "createdAt": "2024-03-08T12:13:20+00:00",
            "type": "runtime_alert"
        }"#;
        let alert = decode_alert(doc).unwrap();
        assert_eq!(alert.instance_id, "i-9");
        assert_eq!(alert.delivery_token, "tok");
        assert_eq!(alert.status, AlertStatus::Pending);
        assert_eq!(alert.launch_time, DateTime::from_timestamp_millis(1709900000000).unwrap());
        assert_eq!(alert.scheduled_time, alert.launch_time + Duration::minutes(60));

        let reencoded: serde_json::Value =
            serde_json::from_str(&encode_alert(&alert).unwrap()).unwrap();
        assert_eq!(reencoded["instanceId"], "i-9");
        assert_eq!(reencoded["deliveryToken"], "tok");
        assert_eq!(reencoded["createdAt"], "2024-03-08T12:13:20Z");
        assert!(reencoded.get("fcmToken").is_none());
    }

    #[test]
    fn both_spellings_of_a_field_are_rejected() {
        let mut doc: serde_json::Value =
            serde_json::from_str(&encode_alert(&sample()).unwrap()).unwrap();
        doc["fcmToken"] = serde_json::json!("other");
        assert!(decode_alert(&doc.to_string()).is_err());
    }

    #[test]
    fn history_round_trip() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let record = crate::types::HistoryRecord::retire(
            sample(),
            AlertStatus::Failed,
            Some("permanent: token unregistered".into()),
            None,
            now,
        );
        let doc = encode_history(&record).unwrap();
        let back = decode_history(&doc).unwrap();
        assert_eq!(back, record);
        assert!(back.alert.deleted);
        assert!(!back.alert.notification_sent);
        assert_eq!(back.alert.status, AlertStatus::Failed);
    }
}
