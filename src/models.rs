use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdGroupStatus {
    #[serde(rename = "ENABLE")]
    Enable,
    #[serde(rename = "DISABLE")]
    Disable,
}

impl AdGroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdGroupStatus::Enable => "ENABLE",
            AdGroupStatus::Disable => "DISABLE",
        }
    }

    /// Maps a raw vendor status onto the two states we track. Anything that
    /// is not explicitly `ENABLE` is not monitored.
    pub fn from_vendor(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("ENABLE") {
            AdGroupStatus::Enable
        } else {
            AdGroupStatus::Disable
        }
    }
}

impl fmt::Display for AdGroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdGroupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENABLE" => Ok(AdGroupStatus::Enable),
            "DISABLE" => Ok(AdGroupStatus::Disable),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdGroupRecord {
    pub advertiser_id: String,
    pub adgroup_id: String,
    pub status: AdGroupStatus,
}

/// A metric as reported by the ads platform. The vendor sends most values
/// as strings, while other sources hand back plain numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(MetricValue::Number),
            serde_json::Value::String(s) => Some(MetricValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Numeric reading of the value. `NaN` and infinities are not costs.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(s) => s.trim().parse::<f64>().ok(),
        };
        value.filter(|v| v.is_finite())
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{}", n),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

/// Per-ad-group metrics fetched for one date range, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub advertiser_id: String,
    pub adgroup_id: String,
    pub date_range: String,
    pub spend: Option<MetricValue>,
    pub conversion: Option<MetricValue>,
    pub cost_per_conversion: Option<MetricValue>,
    pub click: Option<MetricValue>,
    pub cpc: Option<MetricValue>,
    pub ctr: Option<MetricValue>,
}

/// A persisted metrics row.
///
/// Invariant: `alert_id.is_some()` implies `status == Disable`. Rows with no
/// alert are pending evaluation; setting the alert consumes the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub id: i64,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub status: AdGroupStatus,
    pub alert_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl MetricsRow {
    pub fn is_pending(&self) -> bool {
        self.status == AdGroupStatus::Enable && self.alert_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub adgroup_id: String,
    pub cost_per_conversion: f64,
    pub trigger_time: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub adgroup_id: String,
    pub cost_per_conversion: f64,
    pub trigger_time: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}
