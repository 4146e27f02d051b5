//! Script url signatures for the analytics platforms we report on.
//!
//! Every matcher is a pure function over the ordered list of script urls a page
//! loaded. The only exception is the legacy DTM path of [`classify_launch`],
//! which has to read the `satelliteLib` body through a [`ScriptFetcher`].

use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use reqwest::Url;

use crate::types::{AnalyticsFlags, DapInfo, LaunchInfo, ScanError};

// org id / property id / environment id
const LAUNCH_PATH: &str =
    r"assets\.adobedtm\.com/([0-9a-f]{12})/([0-9a-f]{12})/launch-([0-9a-f]{12})";

pub const STATIC_S_CODE_URL: &str = "https://static.cancer.gov/webanalytics/s_code.js";
const S_CODE_FILE: &str = "s_code.js";

lazy_static! {
    static ref LAUNCH_URL: Regex = Regex::new(&format!(
        r"^https://{}(-development|-staging)?(\.min)?\.js(?:$|[?#])",
        LAUNCH_PATH
    ))
    .unwrap();
    static ref LAUNCH_EMBEDDED: Regex = Regex::new(LAUNCH_PATH).unwrap();
    static ref DTM_URL: Regex = Regex::new(
        r"^https://assets\.adobedtm\.com/[0-9a-f]{40}/satelliteLib-[0-9a-f]{40}\.js(?:$|[?#])"
    )
    .unwrap();
    static ref DAP_URL: Regex = Regex::new(
        r"^https://dap\.digitalgov\.gov/Universal-Federated-Analytics-Min\.js(?:$|[?#])"
    )
    .unwrap();
    static ref LAUNCH_APP_MEASUREMENT_URL: Regex = Regex::new(
        r"^https://assets\.adobedtm\.com/extensions/EP[0-9a-fA-F]+/AppMeasurement(?:\.min)?\.js(?:$|[?#])"
    )
    .unwrap();
    static ref STATIC_S_CODE: Regex = Regex::new(&format!(
        r"^{}(?:$|[?#])",
        regex::escape(STATIC_S_CODE_URL)
    ))
    .unwrap();
}

/// Retrieves the raw text of a script.
pub trait ScriptFetcher: Send + Sync {
    fn fetch_text(&self, url: &str) -> anyhow::Result<String>;
}

pub struct HttpScriptFetcher {
    client: reqwest::blocking::Client,
}

impl HttpScriptFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("could not build script fetching client")?;
        Ok(HttpScriptFetcher { client })
    }
}

impl ScriptFetcher for HttpScriptFetcher {
    fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
        debug!("fetching script body of {}", url);
        let res = self
            .client
            .get(url)
            .send()
            .context(format!("request for {} failed", url))?
            .error_for_status()
            .context(format!("bad status for {}", url))?;
        let body = res
            .text()
            .context(format!("could not read body of {}", url))?;
        Ok(body)
    }
}

/// Finds the Launch identifiers of a page.
///
/// A modern launch url wins over a legacy DTM one, whatever their order. When
/// only a DTM library is present its body must mention a launch url, otherwise
/// the whole page is considered unclassifiable.
pub fn classify_launch(
    scripts: &[String],
    fetcher: &dyn ScriptFetcher,
) -> Result<LaunchInfo, ScanError> {
    if let Some(caps) = scripts.iter().find_map(|s| LAUNCH_URL.captures(s)) {
        return Ok(LaunchInfo {
            org_id: Some(caps[1].to_string()),
            property_id: Some(caps[2].to_string()),
            environment_id: Some(caps[3].to_string()),
            is_production: Some(caps.get(4).is_none()),
            is_minified: Some(caps.get(5).is_some()),
            is_legacy_dtm: false,
        });
    }

    let dtm = match scripts.iter().find(|s| DTM_URL.is_match(s)) {
        Some(d) => d,
        None => return Ok(LaunchInfo::default()),
    };

    let body = fetcher
        .fetch_text(dtm)
        .map_err(|e| ScanError::DtmFetch {
            url: dtm.clone(),
            reason: format!("{:#}", e),
        })?;

    let caps = LAUNCH_EMBEDDED
        .captures(&body)
        .ok_or_else(|| ScanError::DtmPatternUnmatched(dtm.clone()))?;

    Ok(LaunchInfo {
        org_id: Some(caps[1].to_string()),
        property_id: Some(caps[2].to_string()),
        environment_id: Some(caps[3].to_string()),
        is_production: None,
        is_minified: None,
        is_legacy_dtm: true,
    })
}

pub fn has_dap(scripts: &[String]) -> bool {
    scripts.iter().any(|s| DAP_URL.is_match(s))
}

pub fn get_dap_info(scripts: &[String]) -> DapInfo {
    if !has_dap(scripts) {
        return DapInfo::default();
    }

    let (mut agency, mut sub_agency) = (None, None);
    let dap = scripts
        .iter()
        .find(|s| DAP_URL.is_match(s))
        .and_then(|d| Url::parse(d).ok());
    if let Some(u) = dap {
        for (key, value) in u.query_pairs() {
            match &*key {
                "agency" if agency.is_none() => agency = Some(value.into_owned()),
                "subagency" if sub_agency.is_none() => sub_agency = Some(value.into_owned()),
                _ => {}
            }
        }
    }

    DapInfo {
        has_dap: true,
        agency,
        sub_agency,
    }
}

pub fn has_launch_adobe_analytics(scripts: &[String]) -> bool {
    scripts.iter().any(|s| LAUNCH_APP_MEASUREMENT_URL.is_match(s))
}

pub fn has_static_adobe_analytics(scripts: &[String]) -> bool {
    scripts.iter().any(|s| STATIC_S_CODE.is_match(s))
}

/// Guesses whether the page serves its own copy of `s_code.js`.
///
/// Any url containing `s_code.js` counts, unless the known static host copy is
/// present. This is a heuristic: a renamed file is missed and an unrelated file
/// with that name is reported.
pub fn has_self_hosted_adobe_analytics(scripts: &[String]) -> bool {
    !has_static_adobe_analytics(scripts) && scripts.iter().any(|s| s.contains(S_CODE_FILE))
}

pub fn analytics_flags(scripts: &[String]) -> AnalyticsFlags {
    AnalyticsFlags {
        has_launch_adobe_analytics: has_launch_adobe_analytics(scripts),
        has_static_adobe_analytics: has_static_adobe_analytics(scripts),
        has_self_hosted_adobe_analytics: has_self_hosted_adobe_analytics(scripts),
    }
}
