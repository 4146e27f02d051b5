use futures::{stream, TryStreamExt};
use tokio::sync::Mutex;

use crate::{
    processor::PageProcessor,
    types::{OutputRecord, RunSummary},
};

/// Receives every record produced by a run, in completion order.
pub trait RecordSink {
    /// Called once before the first record.
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn accept(&mut self, record: &OutputRecord) -> anyhow::Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn start(&mut self) -> anyhow::Result<()> {
        (**self).start()
    }

    fn accept(&mut self, record: &OutputRecord) -> anyhow::Result<()> {
        (**self).accept(record)
    }
}

/// Keeps records in memory.
impl RecordSink for Vec<OutputRecord> {
    fn accept(&mut self, record: &OutputRecord) -> anyhow::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // pages loaded at the same time, each in its own browser
    #[builder(default = "2")]
    concurrency: usize,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }
}

pub struct Runner {
    processor: PageProcessor,
    options: RunnerOptions,
}

impl Runner {
    pub fn new(processor: PageProcessor, options: RunnerOptions) -> Self {
        Runner { processor, options }
    }

    /// Processes every url and streams the records into `sink`.
    ///
    /// A failing page only produces a failure record; the run stops early only
    /// when the sink itself fails.
    pub async fn run<S: RecordSink>(&self, urls: &[String], sink: S) -> anyhow::Result<RunSummary> {
        let concurrency = self.options.concurrency.max(1);
        info!(
            "inspecting {} urls with {} concurrent browsers",
            urls.len(),
            concurrency
        );

        let sink = Mutex::new(sink);
        sink.lock().await.start()?;

        let summary = Mutex::new(RunSummary::default());

        stream::iter(urls.iter().map(Ok::<&String, anyhow::Error>))
            .try_for_each_concurrent(concurrency, |url| {
                let sink = &sink;
                let summary = &summary;
                async move {
                    let record = self.processor.process(url, sink).await?;
                    let mut s = summary.lock().await;
                    s.total += 1;
                    if record.is_failure() {
                        s.failed += 1;
                    } else {
                        s.succeeded += 1;
                    }
                    Ok(())
                }
            })
            .await?;

        let summary = summary.into_inner();
        info!(
            "Total of {} urls inspected, {} failed",
            summary.total, summary.failed
        );

        Ok(summary)
    }
}
