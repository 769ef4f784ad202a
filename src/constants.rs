// API Base URLs
pub const TIKTOK_BASE_URL: &str = "https://business-api.tiktok.com/open_api/v1.3";

// TikTok API Paths
pub const TIKTOK_ADGROUP_PATH: &str = "/adgroup/get/";
pub const TIKTOK_REPORT_PATH: &str = "/report/integrated/get/";

// Headers
pub const ACCESS_TOKEN_HEADER: &str = "Access-Token";

// TikTok Report Fields
pub const REPORT_TYPE: &str = "BASIC";
pub const REPORT_DATA_LEVEL: &str = "ADGROUP";
pub const REPORT_DIMENSIONS: &str = r#"["adgroup_id"]"#;
pub const REPORT_METRICS: &str =
    r#"["spend", "conversion", "cost_per_conversion", "click", "cpc", "ctr"]"#;

// Worker Settings
pub const WORKER_INTERVAL_SECS: u64 = 3600; // 1 hour
pub const DEFAULT_ALERT_THRESHOLD_CPC: f64 = 1.0;
pub const DEFAULT_ADGROUP_PAGE_SIZE: u32 = 50;
pub const DEFAULT_ADGROUP_MAX_PAGES: u32 = 1;
pub const DEFAULT_METRICS_CHUNK_SIZE: usize = 100;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DB_POOL_SIZE: usize = 4;

// SMTP
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const SMTP_TIMEOUT_SECS: u64 = 10;

// HTTP trigger
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

pub const DATE_FORMAT: &str = "%Y-%m-%d";
