use crate::config::TikTokConfig;
use crate::constants::{
    ACCESS_TOKEN_HEADER, DATE_FORMAT, REPORT_DATA_LEVEL, REPORT_DIMENSIONS, REPORT_METRICS,
    REPORT_TYPE, TIKTOK_ADGROUP_PATH, TIKTOK_REPORT_PATH,
};
use crate::models::{AdGroupRecord, AdGroupStatus, MetricValue, MetricsSnapshot};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TikTokError {
    #[error("API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("TikTok API error {code}: {message}")]
    Vendor { code: i64, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Read access to the advertising platform.
#[async_trait]
pub trait AdsPlatform: Send + Sync {
    /// Current ad groups and their status. A vendor-level error yields an
    /// empty list; transport failures are returned as errors.
    async fn fetch_ad_groups(&self, advertiser_id: &str)
        -> Result<Vec<AdGroupRecord>, TikTokError>;

    /// Per-ad-group metrics for an inclusive date range. Any vendor-level
    /// error is returned as an error.
    async fn fetch_metrics(
        &self,
        advertiser_id: &str,
        adgroup_ids: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<MetricsSnapshot>, TikTokError>;
}

pub struct TikTokApi {
    client: Client,
    access_token: String,
    base_url: String,
    adgroup_page_size: u32,
    adgroup_max_pages: u32,
    metrics_chunk_size: usize,
}

impl TikTokApi {
    pub fn new(config: &TikTokConfig) -> Result<Self, TikTokError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            access_token: config.access_token.clone(),
            base_url: config.base_url.clone(),
            adgroup_page_size: config.adgroup_page_size,
            adgroup_max_pages: config.adgroup_max_pages,
            metrics_chunk_size: config.metrics_chunk_size.max(1),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, TikTokError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .query(query)
            .send()
            .await?
            .error_for_status()?;

        response
            .json()
            .await
            .map_err(|e| TikTokError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AdsPlatform for TikTokApi {
    async fn fetch_ad_groups(
        &self,
        advertiser_id: &str,
    ) -> Result<Vec<AdGroupRecord>, TikTokError> {
        let mut records = Vec::new();

        for page in 1..=self.adgroup_max_pages {
            let body = self
                .get(
                    TIKTOK_ADGROUP_PATH,
                    &[
                        ("advertiser_id", advertiser_id.to_string()),
                        ("page", page.to_string()),
                        ("page_size", self.adgroup_page_size.to_string()),
                    ],
                )
                .await?;

            if let Err(e) = check_code(&body) {
                // Missing ad groups are not fatal; later pages keep what was read.
                warn!(advertiser_id, page, error = %e, "TikTok ad group fetch returned an error");
                break;
            }

            let (page_records, total_pages) = parse_ad_groups(advertiser_id, &body);
            records.extend(page_records);

            if u64::from(page) >= total_pages {
                break;
            }
        }

        info!(advertiser_id, count = records.len(), "Fetched ad groups");
        Ok(records)
    }

    async fn fetch_metrics(
        &self,
        advertiser_id: &str,
        adgroup_ids: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<MetricsSnapshot>, TikTokError> {
        let date_range = date_range_label(start_date, end_date);
        let mut snapshots = Vec::new();

        for chunk in adgroup_ids.chunks(self.metrics_chunk_size) {
            let filtering = json!({ "adgroup_id": chunk.join(",") }).to_string();

            let body = self
                .get(
                    TIKTOK_REPORT_PATH,
                    &[
                        ("advertiser_id", advertiser_id.to_string()),
                        ("report_type", REPORT_TYPE.to_string()),
                        ("dimensions", REPORT_DIMENSIONS.to_string()),
                        ("metrics", REPORT_METRICS.to_string()),
                        ("data_level", REPORT_DATA_LEVEL.to_string()),
                        ("start_date", start_date.format(DATE_FORMAT).to_string()),
                        ("end_date", end_date.format(DATE_FORMAT).to_string()),
                        ("filtering", filtering),
                        ("page_size", self.metrics_chunk_size.to_string()),
                    ],
                )
                .await?;

            check_code(&body)?;
            snapshots.extend(parse_metrics(advertiser_id, &date_range, &body));
        }

        info!(advertiser_id, count = snapshots.len(), %date_range, "Fetched ad group metrics");
        Ok(snapshots)
    }
}

pub fn date_range_label(start_date: NaiveDate, end_date: NaiveDate) -> String {
    format!(
        "{} to {}",
        start_date.format(DATE_FORMAT),
        end_date.format(DATE_FORMAT)
    )
}

fn check_code(body: &Value) -> Result<(), TikTokError> {
    match body["code"].as_i64() {
        Some(0) => Ok(()),
        Some(code) => Err(TikTokError::Vendor {
            code,
            message: body["message"].as_str().unwrap_or("").to_string(),
        }),
        None => Err(TikTokError::InvalidResponse(
            "response has no numeric code".to_string(),
        )),
    }
}

/// Ids come back as strings or as bare numbers depending on the endpoint.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Returns the records on this page and the vendor's total page count.
fn parse_ad_groups(advertiser_id: &str, body: &Value) -> (Vec<AdGroupRecord>, u64) {
    let total_pages = body["data"]["page_info"]["total_page"].as_u64().unwrap_or(1);
    let mut records = Vec::new();

    if let Some(list) = body["data"]["list"].as_array() {
        for adgroup in list {
            let Some(adgroup_id) = id_string(&adgroup["adgroup_id"]) else {
                warn!(advertiser_id, "Skipping ad group without an id");
                continue;
            };

            // Field naming differs between API versions.
            let raw_status = adgroup["operation_status"]
                .as_str()
                .filter(|s| !s.is_empty())
                .or_else(|| adgroup["status"].as_str().filter(|s| !s.is_empty()));

            let Some(raw_status) = raw_status else {
                warn!(advertiser_id, %adgroup_id, "Skipping ad group without a status");
                continue;
            };

            records.push(AdGroupRecord {
                advertiser_id: advertiser_id.to_string(),
                adgroup_id,
                status: AdGroupStatus::from_vendor(raw_status),
            });
        }
    }

    (records, total_pages)
}

fn report_adgroup_id(dimensions: &Value) -> Option<String> {
    match dimensions {
        Value::Array(items) => items.iter().find_map(|d| id_string(&d["adgroup_id"])),
        Value::Object(_) => id_string(&dimensions["adgroup_id"]),
        _ => None,
    }
}

fn parse_metrics(advertiser_id: &str, date_range: &str, body: &Value) -> Vec<MetricsSnapshot> {
    let mut snapshots = Vec::new();

    if let Some(list) = body["data"]["list"].as_array() {
        for item in list {
            let Some(adgroup_id) = report_adgroup_id(&item["dimensions"]) else {
                debug!(advertiser_id, "Dropping report row without adgroup_id");
                continue;
            };

            let metrics = &item["metrics"];
            let metric = |name: &str| MetricValue::from_json(&metrics[name]);

            snapshots.push(MetricsSnapshot {
                advertiser_id: advertiser_id.to_string(),
                adgroup_id,
                date_range: date_range.to_string(),
                spend: metric("spend"),
                conversion: metric("conversion"),
                cost_per_conversion: metric("cost_per_conversion"),
                click: metric("click"),
                cpc: metric("cpc"),
                ctr: metric("ctr"),
            });
        }
    }

    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_status_is_preferred_over_status() {
        let body = json!({
            "code": 0,
            "message": "OK",
            "data": {
                "list": [
                    { "adgroup_id": "1", "operation_status": "ENABLE", "status": "DISABLE" },
                    { "adgroup_id": "2", "status": "ENABLE" },
                    { "adgroup_id": 3, "operation_status": "", "status": "DISABLE" },
                    { "adgroup_id": "4" },
                    { "operation_status": "ENABLE" }
                ],
                "page_info": { "page": 1, "total_page": 3 }
            }
        });

        let (records, total_pages) = parse_ad_groups("A1", &body);

        assert_eq!(total_pages, 3);
        let summary: Vec<_> = records
            .iter()
            .map(|r| (r.adgroup_id.as_str(), r.status))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("1", AdGroupStatus::Enable),
                ("2", AdGroupStatus::Enable),
                ("3", AdGroupStatus::Disable),
            ]
        );
        assert!(records.iter().all(|r| r.advertiser_id == "A1"));
    }

    #[test]
    fn vendor_codes() {
        assert!(check_code(&json!({ "code": 0 })).is_ok());
        assert!(matches!(
            check_code(&json!({ "code": 40001, "message": "bad token" })),
            Err(TikTokError::Vendor { code: 40001, .. })
        ));
        assert!(matches!(
            check_code(&json!({ "message": "??" })),
            Err(TikTokError::InvalidResponse(_))
        ));
    }

    #[test]
    fn report_rows_are_flattened() {
        let body = json!({
            "code": 0,
            "data": {
                "list": [
                    {
                        "dimensions": [{ "adgroup_id": "G1" }],
                        "metrics": {
                            "spend": "20.00",
                            "conversion": "10",
                            "cost_per_conversion": "2.00",
                            "click": "40",
                            "cpc": "0.50",
                            "ctr": "1.25"
                        }
                    },
                    {
                        "dimensions": { "adgroup_id": "G2" },
                        "metrics": { "cost_per_conversion": 0.75 }
                    },
                    {
                        "dimensions": [{ "campaign_id": "C1" }],
                        "metrics": { "cost_per_conversion": "9.99" }
                    }
                ]
            }
        });

        let rows = parse_metrics("A1", "2025-03-01 to 2025-03-01", &body);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].adgroup_id, "G1");
        assert_eq!(rows[0].cost_per_conversion, Some(MetricValue::Text("2.00".into())));
        assert_eq!(rows[0].ctr, Some(MetricValue::Text("1.25".into())));
        assert_eq!(rows[1].adgroup_id, "G2");
        assert_eq!(rows[1].cost_per_conversion, Some(MetricValue::Number(0.75)));
        assert_eq!(rows[1].spend, None);
        assert_eq!(rows[1].date_range, "2025-03-01 to 2025-03-01");
    }

    #[test]
    fn date_range_is_inclusive_label() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(date_range_label(start, end), "2025-03-01 to 2025-03-07");
    }
}
