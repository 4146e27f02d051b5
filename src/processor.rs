use std::sync::Arc;

use tokio::{sync::Mutex, task};

use crate::{
    browser_controller::PageInspector,
    runner::RecordSink,
    signatures::{analytics_flags, classify_launch, get_dap_info, ScriptFetcher},
    types::{OutputRecord, PageReport, PageResult, ScanError},
};

/// Turns one url into exactly one [`OutputRecord`].
pub struct PageProcessor {
    inspector: Arc<dyn PageInspector>,
    fetcher: Arc<dyn ScriptFetcher>,
}

impl PageProcessor {
    pub fn new(inspector: Arc<dyn PageInspector>, fetcher: Arc<dyn ScriptFetcher>) -> Self {
        PageProcessor { inspector, fetcher }
    }

    /// Inspects and classifies `url`, hands the record to `sink` and returns it.
    ///
    /// Page failures never surface as an `Err`: they become a
    /// [`OutputRecord::Failure`]. The only error returned is the sink refusing
    /// the record.
    pub async fn process<S: RecordSink>(
        &self,
        url: &str,
        sink: &Mutex<S>,
    ) -> anyhow::Result<OutputRecord> {
        info!("processing {}", url);

        let inspector = self.inspector.clone();
        let fetcher = self.fetcher.clone();
        let u = url.to_string();

        // headless chrome and the script fetch are blocking
        let outcome = task::spawn_blocking(move || -> Result<PageReport, ScanError> {
            let page = inspector
                .inspect(&u)
                .map_err(|e| ScanError::PageInspection(format!("{:#}", e)))?;
            Self::classify(page, fetcher.as_ref())
        })
        .await;

        let record = match outcome {
            Ok(Ok(report)) => {
                info!("finished {} (final url {})", url, report.final_url);
                OutputRecord::Success(report)
            }
            Ok(Err(e)) => {
                warn!("failed {}: {}", url, e);
                Self::failure(url, &e.to_string())
            }
            Err(e) => {
                error!("problem spawning a blocking thread for {}: {}", url, e);
                Self::failure(url, &e.to_string())
            }
        };

        sink.lock().await.accept(&record)?;

        Ok(record)
    }

    fn classify(page: PageResult, fetcher: &dyn ScriptFetcher) -> Result<PageReport, ScanError> {
        let launch = classify_launch(&page.scripts, fetcher)?;
        let dap = get_dap_info(&page.scripts);
        let analytics = analytics_flags(&page.scripts);

        Ok(PageReport {
            requested_url: page.requested_url,
            final_url: page.final_url,
            launch,
            dap,
            analytics,
        })
    }

    fn failure(url: &str, msg: &str) -> OutputRecord {
        // one record per line, whatever the browser put in its message
        let error_msg = msg.split_whitespace().collect::<Vec<&str>>().join(" ");
        OutputRecord::Failure {
            requested_url: url.to_string(),
            error_msg,
        }
    }
}
