//! Cost-per-conversion alerting over stored metrics.
//!
//! Each run looks at the rows that have not been evaluated into an alert
//! yet, keeps only the newest one per ad group and raises an alert for every
//! survivor whose cost per conversion is strictly above the threshold.
//! Raising an alert consumes the row, so it is never alerted twice. Rows at
//! or under the threshold stay pending and are looked at again on the next
//! run until a fresher row supersedes them.

use crate::db::{AdStore, DatabaseError};
use crate::email::Notifier;
use crate::models::{EmailNotification, MetricsRow, NewAlert};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct EvaluationSummary {
    /// Distinct ad groups with a pending row.
    pub candidates: usize,
    pub alerts_raised: usize,
    pub within_threshold: usize,
    /// Rows whose cost per conversion could not be read as a number.
    pub unparseable: usize,
    /// Rows consumed concurrently by another run.
    pub already_consumed: usize,
    pub emails_failed: usize,
}

pub struct AlertEvaluator {
    store: Arc<dyn AdStore>,
    notifier: Arc<dyn Notifier>,
    threshold: f64,
}

/// Keeps the newest row per ad group. Ordering is `(created_at, id)`; ids
/// increase monotonically so two rows never tie.
pub fn latest_per_adgroup(rows: Vec<MetricsRow>) -> Vec<MetricsRow> {
    let mut latest: HashMap<String, MetricsRow> = HashMap::new();

    for row in rows {
        let newer = latest
            .get(&row.metrics.adgroup_id)
            .map_or(true, |current| {
                (row.created_at, row.id) > (current.created_at, current.id)
            });
        if newer {
            latest.insert(row.metrics.adgroup_id.clone(), row);
        }
    }

    let mut rows: Vec<MetricsRow> = latest.into_values().collect();
    rows.sort_by(|a, b| a.metrics.adgroup_id.cmp(&b.metrics.adgroup_id));
    rows
}

pub fn exceeds_threshold(cost_per_conversion: f64, threshold: f64) -> bool {
    cost_per_conversion > threshold
}

pub fn alert_subject(adgroup_id: &str) -> String {
    format!("[ALERT] CPC Exceeded for {}", adgroup_id)
}

/// The threshold keeps its shortest float form, so `1.0` stays `1.0`.
pub fn alert_message(adgroup_id: &str, cost_per_conversion: f64, threshold: f64) -> String {
    format!(
        "AdGroup {} has CPC={:.2} > {:?}",
        adgroup_id, cost_per_conversion, threshold
    )
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn AdStore>, notifier: Arc<dyn Notifier>, threshold: f64) -> Self {
        Self {
            store,
            notifier,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluates every pending ad group of one advertiser. A storage error
    /// aborts the remainder of the run; email failures do not.
    pub async fn scan_and_alert(
        &self,
        advertiser_id: &str,
    ) -> Result<EvaluationSummary, DatabaseError> {
        let rows = latest_per_adgroup(self.store.pending_metrics(advertiser_id).await?);
        let mut summary = EvaluationSummary {
            candidates: rows.len(),
            ..Default::default()
        };

        if rows.is_empty() {
            info!(advertiser_id, "No pending metrics rows to evaluate");
            return Ok(summary);
        }

        for row in rows {
            let adgroup_id = row.metrics.adgroup_id.as_str();

            let cpc = match &row.metrics.cost_per_conversion {
                None => 0.0,
                Some(value) => match value.as_f64() {
                    Some(cpc) => cpc,
                    None => {
                        warn!(adgroup_id, value = %value, "Unreadable cost_per_conversion, skipping");
                        summary.unparseable += 1;
                        continue;
                    }
                },
            };

            if !exceeds_threshold(cpc, self.threshold) {
                info!(
                    adgroup_id,
                    cpc,
                    threshold = self.threshold,
                    "Ad group is within CPC threshold"
                );
                summary.within_threshold += 1;
                continue;
            }

            let message = alert_message(adgroup_id, cpc, self.threshold);
            let alert = NewAlert {
                adgroup_id: adgroup_id.to_string(),
                cost_per_conversion: cpc,
                trigger_time: Utc::now(),
                message: message.clone(),
            };

            let Some(record) = self.store.record_alert(row.id, &alert).await? else {
                summary.already_consumed += 1;
                continue;
            };
            summary.alerts_raised += 1;
            info!(adgroup_id, alert_id = record.id, cpc, "CPC alert raised");

            let notification = EmailNotification {
                recipient: self.notifier.recipient().to_string(),
                subject: alert_subject(adgroup_id),
                body: message,
            };
            if let Err(e) = self.notifier.send(&notification).await {
                warn!(adgroup_id, alert_id = record.id, error = %e, "Failed to send alert email");
                summary.emails_failed += 1;
            }
        }

        Ok(summary)
    }
}
