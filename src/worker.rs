use crate::db::{AdStore, DatabaseError};
use crate::email::Notifier;
use crate::evaluation::{AlertEvaluator, EvaluationSummary};
use crate::models::{AdGroupRecord, MetricsRow, MetricsSnapshot};
use crate::tiktok::{date_range_label, AdsPlatform, TikTokError};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    TikTok(#[from] TikTokError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("A run for advertiser {0} is already in progress")]
    AlreadyRunning(String),
}

/// Outcome of one pipeline cycle for one advertiser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub advertiser_id: String,
    pub date_range: String,
    pub ad_groups_fetched: usize,
    pub enabled_ad_groups: usize,
    pub metrics_inserted: u64,
    /// `None` when no ad group was enabled and the cycle stopped early.
    pub evaluation: Option<EvaluationSummary>,
}

/// Rejects a second concurrent run for the same key.
#[derive(Default)]
pub struct SingleFlight {
    active: Arc<Mutex<HashSet<String>>>,
}

pub struct FlightGuard {
    active: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl SingleFlight {
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(key.to_string()) {
            return None;
        }
        Some(FlightGuard {
            active: Arc::clone(&self.active),
            key: key.to_string(),
        })
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(key)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub struct AdWorker {
    ads: Arc<dyn AdsPlatform>,
    store: Arc<dyn AdStore>,
    evaluator: AlertEvaluator,
    in_flight: SingleFlight,
}

impl AdWorker {
    pub fn new(
        ads: Arc<dyn AdsPlatform>,
        store: Arc<dyn AdStore>,
        notifier: Arc<dyn Notifier>,
        alert_threshold_cpc: f64,
    ) -> Self {
        let evaluator = AlertEvaluator::new(Arc::clone(&store), notifier, alert_threshold_cpc);
        Self {
            ads,
            store,
            evaluator,
            in_flight: SingleFlight::default(),
        }
    }

    pub fn is_running(&self, advertiser_id: &str) -> bool {
        self.in_flight.is_running(advertiser_id)
    }

    /// Runs the full pipeline once for one advertiser. Any stage failure
    /// aborts the rest of the cycle; the next cycle starts from scratch.
    pub async fn run_cycle(
        &self,
        advertiser_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<CycleReport, WorkerError> {
        let _guard = self
            .in_flight
            .try_acquire(advertiser_id)
            .ok_or_else(|| WorkerError::AlreadyRunning(advertiser_id.to_string()))?;

        info!(advertiser_id, %start_date, %end_date, "Starting ad metrics cycle");

        let ad_groups = self.refresh_ad_groups(advertiser_id).await?;

        let enabled = self.store.list_enabled_ad_groups(advertiser_id).await?;
        let mut report = CycleReport {
            advertiser_id: advertiser_id.to_string(),
            date_range: date_range_label(start_date, end_date),
            ad_groups_fetched: ad_groups.len(),
            enabled_ad_groups: enabled.len(),
            metrics_inserted: 0,
            evaluation: None,
        };

        if enabled.is_empty() {
            info!(advertiser_id, "No enabled ad groups, skipping metrics and evaluation");
            return Ok(report);
        }

        let metrics = self
            .ads
            .fetch_metrics(advertiser_id, &enabled, start_date, end_date)
            .await?;
        report.metrics_inserted = self.store.insert_metrics(&metrics).await?;

        report.evaluation = Some(self.evaluator.scan_and_alert(advertiser_id).await?);

        info!(advertiser_id, ?report, "Ad metrics cycle complete");
        Ok(report)
    }

    /// Pulls the current ad groups from the platform and stores them.
    pub async fn refresh_ad_groups(
        &self,
        advertiser_id: &str,
    ) -> Result<Vec<AdGroupRecord>, WorkerError> {
        let ad_groups = self.ads.fetch_ad_groups(advertiser_id).await?;
        self.store.upsert_ad_groups(&ad_groups).await?;
        Ok(ad_groups)
    }

    /// Live metrics without persisting them. When no ids are given the
    /// stored enabled ad groups are used; `None` means there were none.
    pub async fn real_time_metrics(
        &self,
        advertiser_id: &str,
        adgroup_ids: Option<Vec<String>>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Option<Vec<MetricsSnapshot>>, WorkerError> {
        let adgroup_ids = match adgroup_ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => ids,
            None => self.store.list_enabled_ad_groups(advertiser_id).await?,
        };
        if adgroup_ids.is_empty() {
            return Ok(None);
        }

        let metrics = self
            .ads
            .fetch_metrics(advertiser_id, &adgroup_ids, start_date, end_date)
            .await?;
        Ok(Some(metrics))
    }

    pub async fn latest_metrics(&self, advertiser_id: &str) -> Result<Vec<MetricsRow>, WorkerError> {
        Ok(self.store.latest_metrics(advertiser_id).await?)
    }

    /// One pass over all advertisers for today. Returns the number of
    /// advertisers whose cycle failed.
    pub async fn run_once(&self, advertiser_ids: &[String]) -> usize {
        let today = today();
        let mut failures = 0;

        for advertiser_id in advertiser_ids {
            match self.run_cycle(advertiser_id, today, today).await {
                Ok(_) => {}
                Err(WorkerError::AlreadyRunning(_)) => {
                    warn!(%advertiser_id, "Previous cycle still running, skipping");
                }
                Err(e) => {
                    error!(%advertiser_id, error = %e, "Ad metrics cycle failed");
                    failures += 1;
                }
            }
        }

        failures
    }

    /// Runs immediately, then once per `period`, forever.
    pub async fn run(self: Arc<Self>, advertiser_ids: Vec<String>, period: Duration) {
        if advertiser_ids.is_empty() {
            info!("No advertisers configured, scheduler idle");
            return;
        }

        info!(
            advertisers = advertiser_ids.len(),
            period_secs = period.as_secs(),
            "Ad metrics scheduler started"
        );
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.run_once(&advertiser_ids).await;
        }
    }
}
