use std::io::Write;

use anyhow::{anyhow, Context};
use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::{runner::RecordSink, types::OutputRecord};

pub const CSV_HEADER: [&str; 15] = [
    "requestedUrl",
    "finalUrl",
    "launchIsLegacyDTM",
    "launchOrgId",
    "launchPropertyId",
    "launchEnvironmentId",
    "launchIsProduction",
    "launchIsMinified",
    "hasDap",
    "dapAgency",
    "dapSubAgency",
    "hasLaunchAdobeAnalytics",
    "hasStaticAdobeAnalytics",
    "hasSelfHostedAdobeAnalytics",
    "errorMsg",
];

/// Writes records as unquoted CSV lines, flushing after each one.
///
/// Fields are never quoted or escaped, so a comma inside a url or an error
/// message shifts the remaining columns of that line.
pub struct CsvWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(output: W) -> Self {
        let writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Never)
            .has_headers(false)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(output);
        CsvWriter { writer }
    }

    pub fn into_inner(self) -> anyhow::Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow!("could not flush csv output: {}", e.error()))
    }

    fn write_line<I, T>(&mut self, fields: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .context("could not write csv line")?;
        self.writer.flush().context("could not flush csv output")?;
        Ok(())
    }
}

impl<W: Write> RecordSink for CsvWriter<W> {
    fn start(&mut self) -> anyhow::Result<()> {
        self.write_line(CSV_HEADER)
    }

    fn accept(&mut self, record: &OutputRecord) -> anyhow::Result<()> {
        self.write_line(record_row(record))
    }
}

fn yes_no(value: bool) -> String {
    let token = if value { "yes" } else { "no" };
    token.to_string()
}

fn opt_yes_no(value: Option<bool>) -> String {
    value.map(yes_no).unwrap_or_default()
}

fn opt_str(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Flattens a record into the [`CSV_HEADER`] column order.
pub fn record_row(record: &OutputRecord) -> [String; 15] {
    match record {
        OutputRecord::Success(r) => [
            r.requested_url.clone(),
            r.final_url.clone(),
            yes_no(r.launch.is_legacy_dtm),
            opt_str(&r.launch.org_id),
            opt_str(&r.launch.property_id),
            opt_str(&r.launch.environment_id),
            opt_yes_no(r.launch.is_production),
            opt_yes_no(r.launch.is_minified),
            yes_no(r.dap.has_dap),
            opt_str(&r.dap.agency),
            opt_str(&r.dap.sub_agency),
            yes_no(r.analytics.has_launch_adobe_analytics),
            yes_no(r.analytics.has_static_adobe_analytics),
            yes_no(r.analytics.has_self_hosted_adobe_analytics),
            String::new(),
        ],
        OutputRecord::Failure {
            requested_url,
            error_msg,
        } => {
            let mut row: [String; 15] = Default::default();
            row[0] = requested_url.clone();
            row[14] = error_msg.clone();
            row
        }
    }
}
