use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::wire::timestamp;

/// Largest accepted threshold: 366 days.
pub const MAX_THRESHOLD_MINUTES: i64 = 366 * 24 * 60;

/// Converts an `hours`/`minutes` pair into a threshold in minutes.
///
/// Fails only when the arithmetic overflows; range checks are left to the
/// caller.
///
/// # Examples
///
/// ```
/// use runwatch_common::types::threshold_minutes;
///
/// assert_eq!(threshold_minutes(2, 30), Ok(150));
/// assert_eq!(threshold_minutes(0, 45), Ok(45));
/// assert!(threshold_minutes(i64::MAX, 0).is_err());
/// ```
pub fn threshold_minutes(hours: i64, minutes: i64) -> Result<i64, String> {
    hours
        .checked_mul(60)
        .and_then(|h| h.checked_add(minutes))
        .ok_or_else(|| format!("threshold of {hours}h {minutes}m is out of range"))
}

/// A user-authored "alert me after N minutes of runtime" rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDefinition {
    pub id: String,
    pub enabled: bool,
    pub threshold_minutes: i64,
    /// Regions the rule applies to. Empty means every region.
    #[serde(default)]
    pub regions: BTreeSet<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl AlertDefinition {
    pub fn is_global(&self) -> bool {
        self.regions.is_empty()
    }

    /// Whether this definition covers `region`.
    pub fn applies_to(&self, region: &str) -> bool {
        self.is_global() || self.regions.contains(region)
    }

    /// Whether this definition's scope shares at least one region with `regions`.
    /// An empty set on either side covers every region and always overlaps.
    pub fn overlaps(&self, regions: &BTreeSet<String>) -> bool {
        self.is_global() || regions.is_empty() || !self.regions.is_disjoint(regions)
    }

    pub fn hours(&self) -> i64 {
        self.threshold_minutes / 60
    }

    pub fn minutes(&self) -> i64 {
        self.threshold_minutes % 60
    }
}

/// Partial update of an [`AlertDefinition`]; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionUpdate {
    pub enabled: Option<bool>,
    pub threshold_minutes: Option<i64>,
    pub regions: Option<BTreeSet<String>>,
}

impl DefinitionUpdate {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.threshold_minutes.is_none() && self.regions.is_none()
    }
}

/// Deterministic identity of a scheduled alert: `{region}_{instanceId}_{thresholdMinutes}`.
///
/// # Examples
///
/// ```
/// use runwatch_common::types::AlertKey;
///
/// let key = AlertKey::new("us-east-1", "i-0abc", 45);
/// assert_eq!(key.to_string(), "us-east-1_i-0abc_45");
/// assert_eq!("us-east-1_i-0abc_45".parse::<AlertKey>().unwrap(), key);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey {
    pub region: String,
    pub instance_id: String,
    pub threshold_minutes: i64,
}

impl AlertKey {
    pub fn new(region: &str, instance_id: &str, threshold_minutes: i64) -> Self {
        Self {
            region: region.to_string(),
            instance_id: instance_id.to_string(),
            threshold_minutes,
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.region, self.instance_id, self.threshold_minutes
        )
    }
}

impl FromStr for AlertKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Region ids never contain '_', instance ids may.
        let (region, rest) = s
            .split_once('_')
            .ok_or_else(|| format!("alert key '{s}' has no region separator"))?;
        let (instance_id, threshold) = rest
            .rsplit_once('_')
            .ok_or_else(|| format!("alert key '{s}' has no threshold separator"))?;
        let threshold_minutes = threshold
            .parse::<i64>()
            .map_err(|e| format!("alert key '{s}' has invalid threshold: {e}"))?;
        if region.is_empty() || instance_id.is_empty() {
            return Err(format!("alert key '{s}' has an empty component"));
        }
        Ok(Self::new(region, instance_id, threshold_minutes))
    }
}

/// Lifecycle status of a scheduled alert.
///
/// Older records used `"active"` for the pending state; it is accepted on
/// decode and always written back as `"pending"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[serde(alias = "active")]
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl AlertStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "active" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Instance lifecycle state as reported by the owning application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "shutting-down" | "shutting_down" => Ok(Self::ShuttingDown),
            "terminated" => Ok(Self::Terminated),
            _ => Err(format!("unknown instance state: {s}")),
        }
    }
}

/// Instance state as answered by an instance-state oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedState {
    Running,
    Stopped,
    Unknown,
}

impl From<InstanceState> for ObservedState {
    fn from(state: InstanceState) -> Self {
        match state {
            InstanceState::Running => Self::Running,
            InstanceState::Pending => Self::Unknown,
            _ => Self::Stopped,
        }
    }
}

/// The materialized, instance-bound obligation to notify once.
///
/// Field names and aliases are described in [`crate::wire`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledAlert {
    pub id: String,
    #[serde(alias = "instanceID")]
    pub instance_id: String,
    pub instance_name: String,
    pub region: String,
    #[serde(rename = "threshold")]
    pub threshold_minutes: i64,
    #[serde(with = "timestamp")]
    pub launch_time: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub scheduled_time: DateTime<Utc>,
    pub status: AlertStatus,
    pub notification_sent: bool,
    pub deleted: bool,
    #[serde(alias = "fcmToken", alias = "deviceToken")]
    pub delivery_token: String,
    pub instance_state: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl ScheduledAlert {
    /// Builds a fresh pending alert for a running instance.
    ///
    /// Fails when `launch_time + threshold` is not a representable time.
    pub fn materialize(
        key: &AlertKey,
        instance_name: &str,
        launch_time: DateTime<Utc>,
        delivery_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        let scheduled_time = Duration::try_minutes(key.threshold_minutes)
            .and_then(|threshold| launch_time.checked_add_signed(threshold))
            .ok_or_else(|| {
                format!(
                    "alert {key} cannot be scheduled: threshold of {} minutes is out of range",
                    key.threshold_minutes
                )
            })?;
        Ok(Self {
            id: key.to_string(),
            instance_id: key.instance_id.clone(),
            instance_name: instance_name.to_string(),
            region: key.region.clone(),
            threshold_minutes: key.threshold_minutes,
            launch_time,
            scheduled_time,
            status: AlertStatus::Pending,
            notification_sent: false,
            deleted: false,
            delivery_token: delivery_token.to_string(),
            instance_state: InstanceState::Running.to_string(),
            created_at: now,
        })
    }

    pub fn key(&self) -> AlertKey {
        AlertKey::new(&self.region, &self.instance_id, self.threshold_minutes)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.deleted
            && self.status == AlertStatus::Pending
            && !self.notification_sent
            && self.scheduled_time <= now
    }

    /// Whole minutes the instance has been running at `now`.
    pub fn runtime_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.launch_time).num_minutes().max(0)
    }
}

/// Terminal record written when a scheduled alert is retired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    /// Snapshot of the live record, with its terminal status applied.
    pub alert: ScheduledAlert,
    pub status: AlertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
    #[serde(with = "timestamp")]
    pub processed_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Retires `alert` with a terminal `status`.
    pub fn retire(
        mut alert: ScheduledAlert,
        status: AlertStatus,
        detail: Option<String>,
        delivery_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        alert.status = status;
        alert.notification_sent = status == AlertStatus::Completed;
        alert.deleted = true;
        Self {
            id: crate::id::history_id(),
            alert,
            status,
            detail,
            delivery_id,
            processed_at: now,
        }
    }
}

/// Per-region switch gating materialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionAlertStatus {
    pub region: String,
    pub enabled: bool,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Latest observed state of an instance, as reported by the owning application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedInstance {
    pub instance_id: String,
    pub instance_name: String,
    pub region: String,
    pub state: InstanceState,
    #[serde(default, with = "timestamp::option")]
    pub launch_time: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Alert overview for one region: applicable rules plus live alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionAlerts {
    pub region: String,
    pub enabled: bool,
    pub definitions: Vec<AlertDefinition>,
    pub scheduled: Vec<ScheduledAlert>,
}
