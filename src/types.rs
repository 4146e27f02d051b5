use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("dtm_pattern_unmatched: no launch identifiers found in {0}")]
    DtmPatternUnmatched(String),
    #[error("dtm_fetch: could not fetch {url}: {reason}")]
    DtmFetch { url: String, reason: String },
    #[error("page_inspection: {0}")]
    PageInspection(String),
}

/// What the browser saw for a single requested url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    pub requested_url: String,
    pub final_url: String,
    pub scripts: Vec<String>,
}

/// Adobe Launch identifiers, either read from a modern launch script url or
/// recovered from the body of a legacy DTM `satelliteLib`.
///
/// `is_production` and `is_minified` are only known for modern launch urls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchInfo {
    pub org_id: Option<String>,
    pub property_id: Option<String>,
    pub environment_id: Option<String>,
    pub is_production: Option<bool>,
    pub is_minified: Option<bool>,
    pub is_legacy_dtm: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DapInfo {
    pub has_dap: bool,
    pub agency: Option<String>,
    pub sub_agency: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyticsFlags {
    pub has_launch_adobe_analytics: bool,
    pub has_static_adobe_analytics: bool,
    pub has_self_hosted_adobe_analytics: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageReport {
    pub requested_url: String,
    pub final_url: String,
    pub launch: LaunchInfo,
    pub dap: DapInfo,
    pub analytics: AnalyticsFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRecord {
    Success(PageReport),
    Failure {
        requested_url: String,
        error_msg: String,
    },
}

impl OutputRecord {
    pub fn requested_url(&self) -> &str {
        match self {
            OutputRecord::Success(report) => &report.requested_url,
            OutputRecord::Failure { requested_url, .. } => requested_url,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OutputRecord::Failure { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}
