use std::io::{self, Write};

use serde::Serialize;

use crate::app::ImportSummary;
use crate::locate::LocateSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_import(summary: &ImportSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_locate(summary: &LocateSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_import(summary: &ImportSummary) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "import summary: {} -> {}", summary.volume, summary.project)?;
        writeln!(
            stdout,
            "  identifiers: {} requested, {} resolved",
            summary.requested, summary.resolved
        )?;
        writeln!(stdout, "  completed jobs: {}", summary.completed)?;
        writeln!(stdout, "  failed jobs: {}", summary.failed)?;
        writeln!(
            stdout,
            "  metadata: {} updated, {} failed",
            summary.metadata.updated, summary.metadata.failed
        )?;
        writeln!(stdout, "  report: {}", summary.job_report)?;
        writeln!(stdout, "  errors: {}", summary.error_report)?;
        Ok(())
    }

    pub fn print_locate(summary: &LocateSummary) -> io::Result<()> {
        writeln!(
            io::stdout(),
            "located {} of {} listed files",
            summary.matched, summary.listed
        )
    }
}
