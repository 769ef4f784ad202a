#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Notify;

use ad_metrics_worker::db::{AdStore, DatabaseError};
use ad_metrics_worker::email::{EmailError, Notifier};
use ad_metrics_worker::models::{
    AdGroupRecord, AdGroupStatus, AlertRecord, EmailNotification, MetricValue, MetricsRow,
    MetricsSnapshot, NewAlert,
};
use ad_metrics_worker::tiktok::{date_range_label, AdsPlatform, TikTokError};
use ad_metrics_worker::worker::AdWorker;

pub const RECIPIENT: &str = "ops@example.com";

pub fn ad_group(advertiser_id: &str, adgroup_id: &str, status: AdGroupStatus) -> AdGroupRecord {
    AdGroupRecord {
        advertiser_id: advertiser_id.to_string(),
        adgroup_id: adgroup_id.to_string(),
        status,
    }
}

pub fn snapshot(advertiser_id: &str, adgroup_id: &str, cpc: MetricValue) -> MetricsSnapshot {
    MetricsSnapshot {
        advertiser_id: advertiser_id.to_string(),
        adgroup_id: adgroup_id.to_string(),
        date_range: "2025-03-01 to 2025-03-01".to_string(),
        spend: Some(MetricValue::Text("20.00".to_string())),
        conversion: Some(MetricValue::Text("10".to_string())),
        cost_per_conversion: Some(cpc),
        click: Some(MetricValue::Text("40".to_string())),
        cpc: Some(MetricValue::Text("0.50".to_string())),
        ctr: Some(MetricValue::Text("1.25".to_string())),
    }
}

pub fn text(value: &str) -> MetricValue {
    MetricValue::Text(value.to_string())
}

/// Scripted ads platform.
#[derive(Default)]
pub struct FakeAds {
    pub ad_groups: Mutex<Vec<AdGroupRecord>>,
    pub metrics: Mutex<Vec<MetricsSnapshot>>,
    pub fail_metrics: bool,
    pub ad_group_calls: AtomicUsize,
    pub metrics_calls: AtomicUsize,
    pub requested_ids: Mutex<Vec<String>>,
    /// When set, `fetch_ad_groups` waits for a notification first.
    pub gate: Option<Arc<Notify>>,
}

impl FakeAds {
    pub fn new(ad_groups: Vec<AdGroupRecord>, metrics: Vec<MetricsSnapshot>) -> Self {
        Self {
            ad_groups: Mutex::new(ad_groups),
            metrics: Mutex::new(metrics),
            ..Default::default()
        }
    }

    pub fn metrics_calls(&self) -> usize {
        self.metrics_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdsPlatform for FakeAds {
    async fn fetch_ad_groups(
        &self,
        advertiser_id: &str,
    ) -> Result<Vec<AdGroupRecord>, TikTokError> {
        self.ad_group_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self
            .ad_groups
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.advertiser_id == advertiser_id)
            .cloned()
            .collect())
    }

    async fn fetch_metrics(
        &self,
        advertiser_id: &str,
        adgroup_ids: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<MetricsSnapshot>, TikTokError> {
        self.metrics_calls.fetch_add(1, Ordering::SeqCst);
        self.requested_ids
            .lock()
            .unwrap()
            .extend(adgroup_ids.iter().cloned());
        if self.fail_metrics {
            return Err(TikTokError::Vendor {
                code: 40100,
                message: "Too many requests".to_string(),
            });
        }
        let date_range = date_range_label(start_date, end_date);
        Ok(self
            .metrics
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.advertiser_id == advertiser_id && adgroup_ids.contains(&m.adgroup_id))
            .cloned()
            .map(|mut m| {
                m.date_range = date_range.clone();
                m
            })
            .collect())
    }
}

/// In-memory store with the same semantics as the Postgres tables.
#[derive(Default)]
pub struct MemoryStore {
    pub ad_groups: Mutex<BTreeMap<(String, String), AdGroupStatus>>,
    pub metrics: Mutex<Vec<MetricsRow>>,
    pub alerts: Mutex<Vec<AlertRecord>>,
    /// When set, `record_alert` fails as if the connection dropped.
    pub fail_record_alert: AtomicBool,
}

impl MemoryStore {
    pub fn seed_metrics(
        &self,
        advertiser_id: &str,
        adgroup_id: &str,
        cpc: MetricValue,
        created_at: DateTime<Utc>,
    ) -> i64 {
        let mut metrics = self.metrics.lock().unwrap();
        let id = metrics.len() as i64 + 1;
        metrics.push(MetricsRow {
            id,
            metrics: snapshot(advertiser_id, adgroup_id, cpc),
            status: AdGroupStatus::Enable,
            alert_id: None,
            created_at,
        });
        id
    }

    pub fn metrics_row(&self, id: i64) -> MetricsRow {
        self.metrics
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .expect("metrics row exists")
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn ad_group_status(&self, advertiser_id: &str, adgroup_id: &str) -> Option<AdGroupStatus> {
        self.ad_groups
            .lock()
            .unwrap()
            .get(&(advertiser_id.to_string(), adgroup_id.to_string()))
            .copied()
    }
}

#[async_trait]
impl AdStore for MemoryStore {
    async fn upsert_ad_groups(&self, records: &[AdGroupRecord]) -> Result<u64, DatabaseError> {
        let mut ad_groups = self.ad_groups.lock().unwrap();
        for record in records {
            ad_groups.insert(
                (record.advertiser_id.clone(), record.adgroup_id.clone()),
                record.status,
            );
        }
        Ok(records.len() as u64)
    }

    async fn list_enabled_ad_groups(
        &self,
        advertiser_id: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        Ok(self
            .ad_groups
            .lock()
            .unwrap()
            .iter()
            .filter(|((adv, _), status)| adv == advertiser_id && **status == AdGroupStatus::Enable)
            .map(|((_, adgroup_id), _)| adgroup_id.clone())
            .collect())
    }

    async fn insert_metrics(&self, rows: &[MetricsSnapshot]) -> Result<u64, DatabaseError> {
        let created_at = Utc::now();
        let mut metrics = self.metrics.lock().unwrap();
        for row in rows {
            let id = metrics.len() as i64 + 1;
            metrics.push(MetricsRow {
                id,
                metrics: row.clone(),
                status: AdGroupStatus::Enable,
                alert_id: None,
                created_at,
            });
        }
        Ok(rows.len() as u64)
    }

    async fn pending_metrics(&self, advertiser_id: &str) -> Result<Vec<MetricsRow>, DatabaseError> {
        Ok(self
            .metrics
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.metrics.advertiser_id == advertiser_id && r.is_pending())
            .cloned()
            .collect())
    }

    async fn latest_metrics(&self, advertiser_id: &str) -> Result<Vec<MetricsRow>, DatabaseError> {
        let rows: Vec<MetricsRow> = self
            .metrics
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.metrics.advertiser_id == advertiser_id)
            .cloned()
            .collect();
        Ok(ad_metrics_worker::evaluation::latest_per_adgroup(rows))
    }

    async fn record_alert(
        &self,
        metrics_row_id: i64,
        alert: &NewAlert,
    ) -> Result<Option<AlertRecord>, DatabaseError> {
        if self.fail_record_alert.load(Ordering::SeqCst) {
            return Err(DatabaseError::InvalidRow("connection closed".to_string()));
        }
        let mut metrics = self.metrics.lock().unwrap();
        let Some(row) = metrics
            .iter_mut()
            .find(|r| r.id == metrics_row_id && r.alert_id.is_none())
        else {
            return Ok(None);
        };

        let mut alerts = self.alerts.lock().unwrap();
        let record = AlertRecord {
            id: alerts.len() as i64 + 100,
            adgroup_id: alert.adgroup_id.clone(),
            cost_per_conversion: alert.cost_per_conversion,
            trigger_time: alert.trigger_time,
            message: alert.message.clone(),
        };
        alerts.push(record.clone());

        row.alert_id = Some(record.id);
        row.status = AdGroupStatus::Disable;
        Ok(Some(record))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<EmailNotification>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<EmailNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn recipient(&self) -> &str {
        RECIPIENT
    }

    async fn send(&self, notification: &EmailNotification) -> Result<(), EmailError> {
        if self.fail {
            let err = "no-at-sign"
                .parse::<lettre::message::Mailbox>()
                .expect_err("address is invalid");
            return Err(EmailError::Address {
                address: "no-at-sign".to_string(),
                source: err,
            });
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub ads: Arc<FakeAds>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub worker: Arc<AdWorker>,
}

pub fn harness(ads: FakeAds, notifier: RecordingNotifier) -> Harness {
    let ads = Arc::new(ads);
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(notifier);
    let worker = Arc::new(AdWorker::new(
        ads.clone(),
        store.clone(),
        notifier.clone(),
        1.0,
    ));
    Harness {
        ads,
        store,
        notifier,
        worker,
    }
}
