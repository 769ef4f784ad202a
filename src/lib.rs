//! Ad group metrics monitoring.
//!
//! Each cycle pulls the current ad groups of an advertiser from the TikTok
//! Business API, stores them, fetches metrics for the enabled ones and raises
//! an email alert for every ad group whose latest cost per conversion is
//! above the configured threshold. Cycles run on a timer or on demand over
//! HTTP.

pub mod api;
pub mod config;
pub mod constants;
pub mod db;
pub mod email;
pub mod evaluation;
pub mod models;
pub mod tiktok;
pub mod worker;
