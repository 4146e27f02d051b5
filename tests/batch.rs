use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::sleep,
    time::Duration,
};

use analytics_inspector::{
    browser_controller::{ChromeInspector, InspectorOptions, PageInspector},
    csv_writer::{CsvWriter, CSV_HEADER},
    processor::PageProcessor,
    runner::{Runner, RunnerOptions},
    signatures::{HttpScriptFetcher, ScriptFetcher},
    types::{OutputRecord, PageResult},
};
use anyhow::anyhow;

macro_rules! aw {
    ($e:expr) => {
        tokio_test::block_on($e)
    };
}

const DTM: &str = "https://assets.adobedtm.com/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa/satelliteLib-bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb.js";

/// Serves canned script lists and tracks how many pages are loading at once.
#[derive(Default)]
struct FakeInspector {
    pages: HashMap<String, Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
}

impl FakeInspector {
    fn with_page(mut self, url: &str, scripts: &[&str]) -> Self {
        self.pages
            .insert(url.into(), scripts.iter().map(|s| s.to_string()).collect());
        self
    }
}

impl PageInspector for FakeInspector {
    fn inspect(&self, url: &str) -> anyhow::Result<PageResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.pages.get(url) {
            Some(scripts) => Ok(PageResult {
                requested_url: url.into(),
                final_url: url.into(),
                scripts: scripts.clone(),
            }),
            None => Err(anyhow!("navigation to {} failed: net::ERR_NAME_NOT_RESOLVED", url)),
        }
    }
}

#[derive(Default)]
struct FakeFetcher(HashMap<String, String>);

impl ScriptFetcher for FakeFetcher {
    fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
        self.0
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {}", url))
    }
}

fn runner(inspector: Arc<FakeInspector>, fetcher: FakeFetcher, concurrency: usize) -> Runner {
    let options = RunnerOptions::default_builder()
        .concurrency(concurrency)
        .build()
        .unwrap();
    Runner::new(PageProcessor::new(inspector, Arc::new(fetcher)), options)
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| u.to_string()).collect()
}

fn csv_lines(out: Vec<u8>) -> Vec<String> {
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}

#[test]
fn one_row_per_url_even_when_everything_fails() {
    let inspector = Arc::new(FakeInspector::default());
    let r = runner(inspector, FakeFetcher::default(), 2);
    let list = urls(&["https://a.gov", "https://b.gov", "https://c.gov"]);

    let mut writer = CsvWriter::new(vec![]);
    let summary = aw!(r.run(&list, &mut writer)).unwrap();
    let lines = csv_lines(writer.into_inner().unwrap());

    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 3);
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], CSV_HEADER.join(","));
    for line in &lines[1..] {
        assert_eq!(line.split(',').count(), CSV_HEADER.len());
        assert!(line.contains("ERR_NAME_NOT_RESOLVED"));
    }
}

#[test]
fn failure_is_isolated_to_its_url() {
    let inspector = Arc::new(
        FakeInspector::default()
            .with_page(
                "https://a.gov",
                &["https://dap.digitalgov.gov/Universal-Federated-Analytics-Min.js?agency=HHS&subagency=NIH"],
            )
            .with_page("https://c.gov", &["https://other.example.com/path/s_code.js"]),
    );
    let r = runner(inspector, FakeFetcher::default(), 2);
    let list = urls(&["https://a.gov", "https://broken.gov", "https://c.gov"]);

    let mut records: Vec<OutputRecord> = vec![];
    let summary = aw!(r.run(&list, &mut records)).unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(records.len(), 3);

    for record in &records {
        match record {
            OutputRecord::Success(report) if report.requested_url == "https://a.gov" => {
                assert!(report.dap.has_dap);
                assert_eq!(report.dap.agency.as_deref(), Some("HHS"));
                assert_eq!(report.dap.sub_agency.as_deref(), Some("NIH"));
            }
            OutputRecord::Success(report) if report.requested_url == "https://c.gov" => {
                assert!(report.analytics.has_self_hosted_adobe_analytics);
                assert!(!report.analytics.has_static_adobe_analytics);
            }
            OutputRecord::Failure { requested_url, .. } => {
                assert_eq!(requested_url, "https://broken.gov");
            }
            other => panic!("unexpected record {:?}", other),
        }
    }
}

#[test]
fn legacy_dtm_row() {
    let inspector = Arc::new(FakeInspector::default().with_page("https://a.gov", &[DTM]));
    let mut bodies = HashMap::new();
    bodies.insert(
        DTM.to_string(),
        "/* https://assets.adobedtm.com/abc123abc123/def456def456/launch-0a1b2c3d4e5f.min.js */"
            .to_string(),
    );
    let r = runner(inspector, FakeFetcher(bodies), 2);

    let mut writer = CsvWriter::new(vec![]);
    aw!(r.run(&urls(&["https://a.gov"]), &mut writer)).unwrap();
    let lines = csv_lines(writer.into_inner().unwrap());

    assert_eq!(
        lines[1],
        "https://a.gov,https://a.gov,yes,abc123abc123,def456def456,0a1b2c3d4e5f,,,no,,,no,no,no,"
    );
}

#[test]
fn launch_tiers_in_rows() {
    let inspector = Arc::new(
        FakeInspector::default()
            .with_page(
                "https://prod.gov",
                &["https://assets.adobedtm.com/0123456789ab/cdef01234567/launch-89abcdef0123.min.js"],
            )
            .with_page(
                "https://stage.gov",
                &["https://assets.adobedtm.com/0123456789ab/cdef01234567/launch-89abcdef0123-staging.js"],
            ),
    );
    let r = runner(inspector, FakeFetcher::default(), 1);

    let mut writer = CsvWriter::new(vec![]);
    aw!(r.run(&urls(&["https://prod.gov", "https://stage.gov"]), &mut writer)).unwrap();
    let lines = csv_lines(writer.into_inner().unwrap());

    // a single slot keeps input order
    let prod: Vec<&str> = lines[1].split(',').collect();
    let stage: Vec<&str> = lines[2].split(',').collect();
    assert_eq!(prod[0], "https://prod.gov");
    assert_eq!((prod[2], prod[6], prod[7]), ("no", "yes", "yes"));
    assert_eq!(stage[0], "https://stage.gov");
    assert_eq!((stage[6], stage[7]), ("no", "no"));
}

#[test]
fn no_more_than_two_pages_at_once() {
    let mut inspector = FakeInspector::default();
    inspector.delay = Duration::from_millis(50);
    let list = urls(&[
        "https://1.gov",
        "https://2.gov",
        "https://3.gov",
        "https://4.gov",
        "https://5.gov",
        "https://6.gov",
    ]);
    for u in &list {
        inspector = inspector.with_page(u, &[]);
    }
    let inspector = Arc::new(inspector);
    let r = runner(inspector.clone(), FakeFetcher::default(), 2);

    let mut records: Vec<OutputRecord> = vec![];
    aw!(r.run(&list, &mut records)).unwrap();

    assert_eq!(records.len(), 6);
    let max = inspector.max_active.load(Ordering::SeqCst);
    assert_eq!(max, 2, "saw {} pages at once", max);
}

#[test]
fn zero_concurrency_still_runs() {
    let inspector = Arc::new(FakeInspector::default().with_page("https://a.gov", &[]));
    let r = runner(inspector, FakeFetcher::default(), 0);

    let mut records: Vec<OutputRecord> = vec![];
    let summary = aw!(r.run(&urls(&["https://a.gov"]), &mut records)).unwrap();
    assert_eq!(summary.succeeded, 1);
}

/*
RUST_LOG=debug cargo test --test batch -- live_batch --exact --ignored
 */
#[test]
#[ignore = "browser"]
fn live_batch() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let options = InspectorOptions::default_builder().build()?;
    let timeout = options.timeout();
    let fetcher = std::thread::spawn(move || HttpScriptFetcher::new(timeout))
        .join()
        .map_err(|_| anyhow!("fetcher setup panicked"))??;
    let processor = PageProcessor::new(
        Arc::new(ChromeInspector::new(options)),
        Arc::new(fetcher),
    );
    let r = Runner::new(processor, RunnerOptions::default_builder().build()?);

    let mut writer = CsvWriter::new(vec![]);
    aw!(r.run(
        &urls(&["https://www.cancer.gov/", "https://www.usa.gov/"]),
        &mut writer
    ))?;
    let out = String::from_utf8(writer.into_inner()?)?;
    println!("{out}");
    assert_eq!(out.lines().count(), 3);
    Ok(())
}
