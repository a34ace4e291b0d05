use std::io::{self, Write};

use serde::Serialize;

use crate::sync::{ProgressEvent, ProgressSink, SyncReport};

/// Prints progress lines to stdout as they happen.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => println!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => println!("{}", event.message),
        }
    }
}

impl ConsoleOutput {
    pub fn print_summary(report: &SyncReport) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";

        println!("{cyan}Collection {} summary{reset}", report.collection);
        println!(
            "{cyan}  catalog items: {}, needed: {}{reset}",
            report.catalog_items, report.fetch_set
        );
        println!("{green}  fetched: {}{reset}", report.fetched());
        println!("{yellow}  failed: {}{reset}", report.failed());
        for item in report.items.iter().filter(|item| item.error.is_some()) {
            println!(
                "{yellow}    {} ({}){reset}",
                item.id,
                item.error.as_deref().unwrap_or_default()
            );
        }
        if let Some(reason) = &report.aborted {
            println!("{red}  aborted: {reason}{reset}");
        }
        println!("  manifest entries: {}", report.manifest_entries);
    }
}

/// Machine-readable report; progress events are dropped.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &SyncReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
