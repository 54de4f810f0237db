use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    AnnotatedTermsResult, EnsureResult, FileListResult, PathwayEnrichmentResult, TaxonInfo,
    TaxonSummary, TermEnrichmentResult,
};
use crate::genesets::Availability;
use crate::store::FileInfo;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_taxa(result: &[TaxonSummary]) -> io::Result<()> {
        Self::print_json(&result)
    }

    pub fn print_taxon(result: &TaxonInfo) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_terms(result: &TermEnrichmentResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_annotated(result: &AnnotatedTermsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_pathways(result: &PathwayEnrichmentResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_availability(result: &[Availability]) -> io::Result<()> {
        Self::print_json(&result)
    }

    pub fn print_files(result: &FileListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_ensure(result: &EnsureResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_file_info(result: &FileInfo) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress reporter for the binary: whole-percent steps on stderr, only
/// when stderr is a terminal.
pub struct StderrProgress {
    label: String,
    last: std::cell::Cell<i64>,
    enabled: bool,
}

impl StderrProgress {
    pub fn new(label: &str) -> Self {
        use std::io::IsTerminal;
        Self {
            label: label.to_string(),
            last: std::cell::Cell::new(-1),
            enabled: io::stderr().is_terminal(),
        }
    }

    pub fn finish(&self) {
        if self.enabled && self.last.get() >= 0 {
            eprintln!();
        }
    }
}

impl crate::progress::ProgressSink for StderrProgress {
    fn progress(&self, percent: f64) {
        if !self.enabled {
            return;
        }
        let step = percent.clamp(0.0, 100.0).floor() as i64;
        if step <= self.last.get() {
            return;
        }
        self.last.set(step);
        eprint!("\r{}: {step:>3}%", self.label);
        let _ = io::stderr().flush();
    }
}
