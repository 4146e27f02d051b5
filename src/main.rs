use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use analytics_inspector::{
    browser_controller::{ChromeInspector, InspectorOptions},
    csv_writer::CsvWriter,
    processor::PageProcessor,
    runner::{Runner, RunnerOptions},
    signatures::HttpScriptFetcher,
    utils::read_url_list,
};
use anyhow::Context;
use clap::Parser;
use log::debug;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Reports the analytics platforms loaded by a list of web pages", long_about = None)]
struct Args {
    /// File with one url per line
    input: PathBuf,
    /// File to write the CSV to, standard output when absent
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Total number of pages inspected at the same time
    #[arg(short = 'c', long, default_value_t = 2)]
    concurrency: usize,
    /// Maximum time in seconds the browser will wait for an event before timing out
    #[arg(short = 't', long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    debug!("Starting with {:#?}", args);

    let urls = read_url_list(&args.input)?;

    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).context(format!("could not create output file {:?}", path))?,
        ),
        None => Box::new(io::stdout()),
    };

    let inspector_options = InspectorOptions::default_builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()?;
    // the blocking client owns a runtime of its own, so build it off the async threads
    let fetch_timeout = inspector_options.timeout();
    let fetcher = tokio::task::spawn_blocking(move || HttpScriptFetcher::new(fetch_timeout))
        .await
        .context("could not spawn script fetcher setup")??;
    let processor = PageProcessor::new(
        Arc::new(ChromeInspector::new(inspector_options)),
        Arc::new(fetcher),
    );

    let runner_options = RunnerOptions::default_builder()
        .concurrency(args.concurrency)
        .build()?;
    let runner = Runner::new(processor, runner_options);

    let mut writer = CsvWriter::new(output);
    runner.run(&urls, &mut writer).await?;
    writer.into_inner()?.flush()?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["analytics_inspector", "urls.txt"]).unwrap();
        assert_eq!(args.input, PathBuf::from("urls.txt"));
        assert_eq!(args.output, None);
        assert_eq!(args.concurrency, 2);
        assert_eq!(args.timeout, 30);
    }

    #[test]
    fn output_flag() {
        let args =
            Args::try_parse_from(["analytics_inspector", "urls.txt", "-o", "out.csv"]).unwrap();
        assert_eq!(args.output, Some(PathBuf::from("out.csv")));
    }

    #[test]
    fn exactly_one_input_file() {
        assert!(Args::try_parse_from(["analytics_inspector"]).is_err());
        assert!(Args::try_parse_from(["analytics_inspector", "a.txt", "b.txt"]).is_err());
    }

    #[test]
    fn idle_window_is_not_a_flag() {
        assert!(Args::try_parse_from(["analytics_inspector", "a.txt", "--idle-window", "10"]).is_err());
    }
}
