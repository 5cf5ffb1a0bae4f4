//! `zmon check`: parse a device configuration and show what the actor
//! would use.

use owo_colors::OwoColorize;
use serde::Serialize;

use zmon_config::DeviceConfig;
use zmon_core::config::{ADDRESS_PATH, ENDPOINT_PATH};

use crate::cli::{CheckArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

const UNSET: &str = "(unset)";

#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    file: String,
    endpoint: Option<&'a str>,
    address: Option<&'a str>,
    producer: Option<&'a str>,
    consumers: Vec<ConsumerEntry<'a>>,
    device_file: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConsumerEntry<'a> {
    stream: &'a str,
    pattern: &'a str,
}

pub fn handle(args: &CheckArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let device = DeviceConfig::load(&args.file)?;
    let consumers = device.tree.consumers();

    let report = CheckReport {
        file: device.path.display().to_string(),
        endpoint: device.tree.endpoint(),
        address: device.tree.address(),
        producer: device.tree.producer(),
        consumers: consumers
            .iter()
            .map(|c| ConsumerEntry {
                stream: &c.stream,
                pattern: &c.pattern,
            })
            .collect(),
        device_file: device.tree.file().map(|p| p.display().to_string()),
    };

    let rendered = match args.output {
        OutputFormat::Json => output::render_json(&report)?,
        OutputFormat::Text => render_text(&report, output::should_color(&global.color)),
    };
    output::print_output(&rendered);

    for (key, value) in [(ENDPOINT_PATH, report.endpoint), (ADDRESS_PATH, report.address)] {
        if value.is_none() {
            return Err(CliError::MissingSetting {
                key: key.into(),
                path: report.file,
            });
        }
    }
    Ok(())
}

// ── Text rendering ───────────────────────────────────────────────────

fn render_text(report: &CheckReport<'_>, color: bool) -> String {
    let mut lines = vec![
        field("file", Some(report.file.as_str()), color),
        field("endpoint", report.endpoint, color),
        field("address", report.address, color),
        field("producer", report.producer, color),
        field("store", report.device_file.as_deref(), color),
    ];

    if report.consumers.is_empty() {
        lines.push(field("consumers", None, color));
    }
    for consumer in &report.consumers {
        let value = format!("{} ~ {}", consumer.stream, consumer.pattern);
        lines.push(field("consumer", Some(value.as_str()), color));
    }
    lines.join("\n")
}

fn field(label: &str, value: Option<&str>, color: bool) -> String {
    let label = format!("{label:<10}");
    match (value, color) {
        (Some(value), true) => format!("{} {}", label.bold(), value.green()),
        (Some(value), false) => format!("{label} {value}"),
        (None, true) => format!("{} {}", label.bold(), UNSET.yellow()),
        (None, false) => format!("{label} {UNSET}"),
    }
}
