use chrono::{DateTime, Utc};
use runwatch_common::types::ScheduledAlert;
use runwatch_common::wire::timestamp;
use std::collections::BTreeMap;

use crate::NotificationPayload;

pub const RUNTIME_ALERT_TITLE: &str = "⏰ Runtime Alert";
pub const RUNTIME_ALERT_TYPE: &str = "runtime_alert";

/// Formats minutes as `"{h}h {m}m"`.
///
/// # Examples
///
/// ```
/// use runwatch_notify::payload::format_runtime;
///
/// assert_eq!(format_runtime(135), "2h 15m");
/// assert_eq!(format_runtime(45), "0h 45m");
/// ```
pub fn format_runtime(minutes: i64) -> String {
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// Builds the runtime notification for a due alert at `now`.
pub fn runtime_alert(alert: &ScheduledAlert, now: DateTime<Utc>) -> NotificationPayload {
    let runtime = alert.runtime_minutes(now);
    let data = BTreeMap::from([
        ("type".to_string(), RUNTIME_ALERT_TYPE.to_string()),
        ("alertId".to_string(), alert.id.clone()),
        ("instanceId".to_string(), alert.instance_id.clone()),
        ("instanceName".to_string(), alert.instance_name.clone()),
        ("region".to_string(), alert.region.clone()),
        ("runtime".to_string(), runtime.to_string()),
        ("threshold".to_string(), alert.threshold_minutes.to_string()),
        ("launchTime".to_string(), timestamp::format(&alert.launch_time)),
    ]);
    NotificationPayload {
        title: RUNTIME_ALERT_TITLE.to_string(),
        body: format!(
            "{} has been running for {}",
            alert.instance_name,
            format_runtime(runtime)
        ),
        data,
    }
}
